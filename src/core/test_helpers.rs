//! Shared test utilities for core module tests
//!
//! Provides fixture listings, rule constructors and [`FakeFilter`], an
//! in-memory [`PacketFilter`] that records every call. This module is only
//! compiled in test mode.

use crate::core::error::{Error, Result};
use crate::core::iptables::PacketFilter;
use crate::core::parser::parse_listing;
use crate::core::rule::Rule;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Mutex for tests that need exclusive access to environment variables.
///
/// # Example
///
/// ```ignore
/// let _guard = ENV_VAR_MUTEX.lock().unwrap();
/// unsafe {
///     std::env::set_var("IPTKEEPER_ELEVATION_METHOD", "sudo");
/// }
/// // ... test with custom env state ...
/// unsafe {
///     std::env::remove_var("IPTKEEPER_ELEVATION_METHOD");
/// }
/// ```
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

/// `iptables -t filter -L -n -v -x --line-numbers` output with five rules
pub const FILTER_LISTING: &str = "\
Chain INPUT (policy DROP 0 packets, 0 bytes)
num      pkts      bytes target     prot opt in     out     source               destination
1         120     9600 ACCEPT     tcp  --  *      *       0.0.0.0/0            0.0.0.0/0            tcp dpt:22
2        4821   612034 ACCEPT     all  --  *      *       192.168.1.0/24       0.0.0.0/0
3          17     1020 DROP       tcp  --  *      *       203.0.113.0/24       0.0.0.0/0            tcp dpt:3306

Chain FORWARD (policy DROP 0 packets, 0 bytes)
num      pkts      bytes target     prot opt in     out     source               destination
1           0        0 DOCKER-USER  all  --  *      *       0.0.0.0/0            0.0.0.0/0

Chain OUTPUT (policy ACCEPT 0 packets, 0 bytes)
num      pkts      bytes target     prot opt in     out     source               destination
1         310    23014 ACCEPT     udp  --  *      *       0.0.0.0/0            0.0.0.0/0            udp spt:53
";

/// Builds a live rule with wildcard addresses.
pub fn live_rule(
    chain: &str,
    line_number: u32,
    target: &str,
    protocol: &str,
    dport: Option<&str>,
) -> Rule {
    Rule {
        table: "filter".to_string(),
        chain: chain.to_string(),
        line_number,
        target: target.to_string(),
        protocol: protocol.to_string(),
        in_interface: "*".to_string(),
        out_interface: "*".to_string(),
        source: "0.0.0.0/0".to_string(),
        destination: "0.0.0.0/0".to_string(),
        destination_port: dport.map(String::from),
        options: dport
            .map(|p| format!("{protocol} dpt:{p}"))
            .unwrap_or_default(),
        ..Rule::default()
    }
}

/// A delete issued against [`FakeFilter`]
#[derive(Debug, Clone)]
pub struct DeleteCall {
    pub table: String,
    pub chain: String,
    pub line_number: u32,
    pub at: Instant,
}

/// An add issued against [`FakeFilter`]
#[derive(Debug, Clone)]
pub struct AddCall {
    pub table: String,
    pub chain: String,
    pub position: Option<u32>,
    pub spec: Vec<String>,
}

#[derive(Debug, Default)]
struct FakeTable {
    /// Chains in header order, so empty chains still render
    chains: Vec<String>,
    rules: Vec<Rule>,
}

impl FakeTable {
    fn from_listing(raw: &str, table: &str) -> Self {
        let chains = raw
            .lines()
            .filter_map(|line| line.strip_prefix("Chain "))
            .filter_map(|header| header.split_whitespace().next())
            .map(String::from)
            .collect();
        Self {
            chains,
            rules: parse_listing(raw, table),
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for chain in &self.chains {
            let _ = writeln!(out, "Chain {chain} (policy ACCEPT 0 packets, 0 bytes)");
            out.push_str(
                "num      pkts      bytes target     prot opt in     out     source               destination\n",
            );
            for (index, rule) in self.rules.iter().filter(|r| &r.chain == chain).enumerate() {
                let _ = writeln!(
                    out,
                    "{} {} {} {} {} -- {} {} {} {} {}",
                    index + 1,
                    rule.packets,
                    rule.bytes,
                    rule.target,
                    rule.protocol,
                    rule.in_interface,
                    rule.out_interface,
                    rule.source,
                    rule.destination,
                    rule.options
                );
            }
            out.push('\n');
        }
        out
    }

    fn chain_indices(&self, chain: &str) -> Vec<usize> {
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.chain == chain)
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Debug, Default)]
struct FakeState {
    tables: HashMap<String, FakeTable>,
    list_failures: HashMap<String, String>,
    delete_failure: Option<String>,
    deletes: Vec<DeleteCall>,
    adds: Vec<AddCall>,
    list_calls: usize,
    in_flight: usize,
    max_in_flight: usize,
}

/// In-memory packet filter that keeps line numbers consistent across
/// add/delete and records every call
#[derive(Debug, Default)]
pub struct FakeFilter {
    state: Mutex<FakeState>,
    delete_delay: Option<Duration>,
}

/// Decrements the in-flight counter when a call finishes
struct InFlight<'a>(&'a FakeFilter);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.state.lock().unwrap().in_flight -= 1;
    }
}

impl FakeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fake whose deletes take `delay` to complete
    pub fn with_delete_delay(delay: Duration) -> Self {
        Self {
            delete_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Replaces a table's contents with a parsed listing
    pub fn set_listing(&self, table: &str, raw: &str) {
        self.state
            .lock()
            .unwrap()
            .tables
            .insert(table.to_string(), FakeTable::from_listing(raw, table));
    }

    /// Makes listing `table` fail with `stderr`
    pub fn fail_listing(&self, table: &str, stderr: &str) {
        self.state
            .lock()
            .unwrap()
            .list_failures
            .insert(table.to_string(), stderr.to_string());
    }

    /// Makes every delete fail with `stderr`
    pub fn fail_deletes(&self, stderr: &str) {
        self.state.lock().unwrap().delete_failure = Some(stderr.to_string());
    }

    /// Removes the first live rule in `chain` whose target is `target`,
    /// as another administrator would
    pub fn remove_externally(&self, table: &str, chain: &str, target: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(t) = state.tables.get_mut(table)
            && let Some(pos) = t
                .rules
                .iter()
                .position(|r| r.chain == chain && r.target == target)
        {
            t.rules.remove(pos);
        }
    }

    pub fn deletes(&self) -> Vec<DeleteCall> {
        self.state.lock().unwrap().deletes.clone()
    }

    pub fn adds(&self) -> Vec<AddCall> {
        self.state.lock().unwrap().adds.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    /// Highest number of calls that were ever running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    /// Live rules of `chain` in `table` as they would be listed now
    pub fn rules(&self, table: &str, chain: &str) -> Vec<Rule> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(table)
            .map(|t| parse_listing(&t.render(), table))
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.chain == chain)
            .collect()
    }

    fn enter(&self) -> InFlight<'_> {
        let mut state = self.state.lock().unwrap();
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        InFlight(self)
    }
}

fn tool_error(action: &str, stderr: &str, exit_code: i32) -> Error {
    Error::Iptables {
        message: format!("failed to {action}: {stderr}"),
        stderr: Some(stderr.to_string()),
        exit_code: Some(exit_code),
    }
}

/// Builds the live form of a rule from `-p/-s/-d/--sport/--dport/-j` tokens
fn rule_from_spec(table: &str, chain: &str, spec: &[String]) -> Rule {
    let mut rule = Rule {
        table: table.to_string(),
        chain: chain.to_string(),
        protocol: "all".to_string(),
        in_interface: "*".to_string(),
        out_interface: "*".to_string(),
        source: "0.0.0.0/0".to_string(),
        destination: "0.0.0.0/0".to_string(),
        ..Rule::default()
    };

    let mut options = Vec::new();
    for pair in spec.chunks(2) {
        let [flag, value] = pair else { continue };
        match flag.as_str() {
            "-p" => rule.protocol.clone_from(value),
            "-s" => rule.source.clone_from(value),
            "-d" => rule.destination.clone_from(value),
            "--sport" => options.push(format!("spt:{value}")),
            "--dport" => options.push(format!("dpt:{value}")),
            "-j" => rule.target.clone_from(value),
            "--comment" => options.push(format!("/* {value} */")),
            _ => {}
        }
    }
    if !options.is_empty() {
        rule.options = format!("{} {}", rule.protocol, options.join(" "));
    }
    rule
}

#[async_trait]
impl PacketFilter for FakeFilter {
    async fn list_rules(&self, table: &str) -> Result<String> {
        let _guard = self.enter();
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;

        if let Some(stderr) = state.list_failures.get(table) {
            return Err(tool_error("list rules", stderr, 3));
        }

        Ok(state
            .tables
            .get(table)
            .map(FakeTable::render)
            .unwrap_or_default())
    }

    async fn add_rule(
        &self,
        table: &str,
        chain: &str,
        position: Option<u32>,
        spec: &[String],
    ) -> Result<()> {
        let _guard = self.enter();
        let mut state = self.state.lock().unwrap();
        state.adds.push(AddCall {
            table: table.to_string(),
            chain: chain.to_string(),
            position,
            spec: spec.to_vec(),
        });

        let fake = state.tables.entry(table.to_string()).or_default();
        if !fake.chains.iter().any(|c| c == chain) {
            fake.chains.push(chain.to_string());
        }

        let rule = rule_from_spec(table, chain, spec);
        let indices = fake.chain_indices(chain);
        let insert_at = match position.filter(|&p| p > 0) {
            Some(p) => indices
                .get(p as usize - 1)
                .copied()
                .unwrap_or(fake.rules.len()),
            None => indices.last().map_or(fake.rules.len(), |&i| i + 1),
        };
        fake.rules.insert(insert_at, rule);
        Ok(())
    }

    async fn delete_rule(&self, table: &str, chain: &str, line_number: u32) -> Result<()> {
        let _guard = self.enter();
        if let Some(delay) = self.delete_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.deletes.push(DeleteCall {
            table: table.to_string(),
            chain: chain.to_string(),
            line_number,
            at: Instant::now(),
        });

        if let Some(stderr) = state.delete_failure.clone() {
            return Err(tool_error("delete rule", &stderr, 1));
        }

        let fake = state.tables.get_mut(table);
        let index = fake.as_ref().and_then(|t| {
            t.chain_indices(chain)
                .get((line_number as usize).wrapping_sub(1))
                .copied()
        });
        match (fake, index) {
            (Some(t), Some(i)) => {
                t.rules.remove(i);
                Ok(())
            }
            _ => Err(tool_error(
                "delete rule",
                "iptables: Index of deletion too big.",
                1,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_renumbers_after_delete() {
        let filter = FakeFilter::new();
        filter.set_listing("filter", FILTER_LISTING);

        filter.delete_rule("filter", "INPUT", 1).await.unwrap();
        let input = filter.rules("filter", "INPUT");
        assert_eq!(input.len(), 2);
        assert_eq!(input[0].line_number, 1);
        assert_eq!(input[0].source, "192.168.1.0/24");

        assert!(filter.delete_rule("filter", "INPUT", 3).await.is_err());
        assert_eq!(filter.deletes().len(), 2);
    }

    #[tokio::test]
    async fn test_fake_add_appends_and_inserts() {
        let filter = FakeFilter::new();
        filter.set_listing("filter", FILTER_LISTING);

        let spec: Vec<String> = ["-p", "tcp", "--dport", "8080", "-j", "ACCEPT"]
            .map(String::from)
            .to_vec();
        filter.add_rule("filter", "INPUT", None, &spec).await.unwrap();
        filter.add_rule("filter", "INPUT", Some(1), &spec).await.unwrap();

        let input = filter.rules("filter", "INPUT");
        assert_eq!(input.len(), 5);
        assert_eq!(input[0].destination_port.as_deref(), Some("8080"));
        assert_eq!(input[4].destination_port.as_deref(), Some("8080"));
        assert_eq!(input[1].destination_port.as_deref(), Some("22"));
    }
}
