//! Parser for `iptables -L -n -v -x --line-numbers` output
//!
//! The listing is semi-structured text:
//!
//! ```text
//! Chain INPUT (policy ACCEPT 0 packets, 0 bytes)
//! num      pkts      bytes target     prot opt in     out     source               destination
//! 1         120     9600 ACCEPT     tcp  --  *      *       0.0.0.0/0            0.0.0.0/0            tcp dpt:22
//! ```
//!
//! Parsing is lenient. A row that does not fit the expected shape is dropped
//! and the rest of the table is still returned; tool version differences and
//! locale quirks are expected, not errors.

use crate::core::rule::Rule;
use regex::Regex;
use std::sync::LazyLock;

/// Data row: num, pkts, bytes, target, prot, `--`, in, out, source, destination, options
static ROW_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(\d+)\s+(\S+)\s+(\S+)\s+(\S+)\s+(\S+)\s+--\s+(\S+)\s+(\S+)\s+(\S+)\s+(\S+)\s*(.*)$",
    )
    .expect("row pattern is valid")
});

static SOURCE_PORT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:spt|source-port):(\d+(?::\d+)?)").expect("source port pattern is valid")
});

static DESTINATION_PORT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:dpt|destination-port):(\d+(?::\d+)?)")
        .expect("destination port pattern is valid")
});

/// Parses one table's listing into rules, in document order.
///
/// Rows appearing before the first `Chain` header have no chain to belong to
/// and are dropped along with anything that fails the row pattern.
pub fn parse_listing(raw: &str, table: &str) -> Vec<Rule> {
    let mut rules = Vec::new();
    let mut current_chain: Option<&str> = None;

    for line in raw.lines() {
        if let Some(header) = line.strip_prefix("Chain ") {
            current_chain = header.split_whitespace().next();
            continue;
        }

        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with("num ") || trimmed.starts_with("pkts ") {
            continue;
        }

        let Some(chain) = current_chain else {
            continue;
        };

        if let Some(rule) = parse_row(line, table, chain) {
            rules.push(rule);
        }
    }

    rules
}

fn parse_row(line: &str, table: &str, chain: &str) -> Option<Rule> {
    let caps = ROW_PATTERN.captures(line)?;
    let line_number = caps[1].parse().ok()?;
    let options = caps[10].trim();

    Some(Rule {
        table: table.to_string(),
        chain: chain.to_string(),
        line_number,
        packets: parse_counter(&caps[2]),
        bytes: parse_counter(&caps[3]),
        target: caps[4].to_string(),
        protocol: caps[5].to_string(),
        in_interface: caps[6].to_string(),
        out_interface: caps[7].to_string(),
        source: caps[8].to_string(),
        destination: caps[9].to_string(),
        source_port: extract_port(&SOURCE_PORT_PATTERN, options),
        destination_port: extract_port(&DESTINATION_PORT_PATTERN, options),
        options: options.to_string(),
        raw: line.to_string(),
    })
}

/// Counter column value; anything that isn't a plain u64 counts as zero
fn parse_counter(token: &str) -> u64 {
    token.parse().unwrap_or(0)
}

fn extract_port(pattern: &Regex, options: &str) -> Option<String> {
    pattern
        .captures(options)
        .map(|caps| caps[1].to_string())
}
