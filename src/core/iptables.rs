//! iptables process driver
//!
//! [`PacketFilter`] is the boundary to the external tool: list a table, add a
//! rule, delete a rule by line number. [`IptablesCli`] implements it by
//! spawning `iptables` (through [`crate::elevation`]) and waiting for it to
//! exit. There is no timeout; a hung tool stalls the calling task.

use crate::core::error::{Error, Result};
use crate::core::rule::{DEFAULT_TABLES, Table};
use crate::validators;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// Operations the rule lifecycle needs from the packet-filter tool
#[async_trait]
pub trait PacketFilter: Send + Sync {
    /// Raw listing text for one table, with line numbers and exact counters
    async fn list_rules(&self, table: &str) -> Result<String>;

    /// Appends (or inserts at `position` when positive) a rule to `chain`
    async fn add_rule(
        &self,
        table: &str,
        chain: &str,
        position: Option<u32>,
        spec: &[String],
    ) -> Result<()>;

    /// Removes the rule currently at 1-based `line_number` in `chain`
    async fn delete_rule(&self, table: &str, chain: &str, line_number: u32) -> Result<()>;

    /// Lists each of `tables`, skipping tables the kernel hasn't loaded
    async fn list_tables(&self, tables: &[Table]) -> Result<BTreeMap<Table, String>> {
        let mut listings = BTreeMap::new();
        for &table in tables {
            match self.list_rules(table.as_str()).await {
                Ok(raw) => {
                    listings.insert(table, raw);
                }
                Err(e) if is_table_unavailable(&e) => {
                    debug!("Skipping table {table}: not available");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(listings)
    }

    /// Lists filter, nat, mangle and raw
    async fn list_all_tables(&self) -> Result<BTreeMap<Table, String>> {
        self.list_tables(&DEFAULT_TABLES).await
    }
}

fn is_table_unavailable(err: &Error) -> bool {
    err.diagnostics()
        .is_some_and(|d| d.contains("can't initialize iptables"))
}

fn validation(field: &str) -> impl FnOnce(String) -> Error + '_ {
    move |message| Error::validation(field, message)
}

/// Argument vector for listing one table
pub fn list_args(table: &str) -> Result<Vec<String>> {
    validators::validate_table(table).map_err(validation("table"))?;
    Ok(["-t", table, "-L", "-n", "-v", "-x", "--line-numbers"]
        .iter()
        .map(ToString::to_string)
        .collect())
}

/// Argument vector for adding a rule
pub fn add_args(
    table: &str,
    chain: &str,
    position: Option<u32>,
    spec: &[String],
) -> Result<Vec<String>> {
    validators::validate_table(table).map_err(validation("table"))?;
    validators::validate_chain(chain).map_err(validation("chain"))?;
    for token in spec {
        validators::check_denylist(token).map_err(validation("spec"))?;
    }

    let mut args = vec!["-t".to_string(), table.to_string()];
    match position.filter(|&p| p > 0) {
        Some(p) => args.extend(["-I".to_string(), chain.to_string(), p.to_string()]),
        None => args.extend(["-A".to_string(), chain.to_string()]),
    }
    args.extend(spec.iter().cloned());
    Ok(args)
}

/// Argument vector for deleting a rule by position
pub fn delete_args(table: &str, chain: &str, line_number: u32) -> Result<Vec<String>> {
    validators::validate_table(table).map_err(validation("table"))?;
    validators::validate_chain(chain).map_err(validation("chain"))?;
    if line_number < 1 {
        return Err(Error::validation(
            "line_number",
            format!("Invalid line number: {line_number}"),
        ));
    }

    Ok(vec![
        "-t".to_string(),
        table.to_string(),
        "-D".to_string(),
        chain.to_string(),
        line_number.to_string(),
    ])
}

/// Drives the real `iptables` binary
#[derive(Debug, Clone)]
pub struct IptablesCli {
    binary: String,
}

impl Default for IptablesCli {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_IPTABLES_BINARY)
    }
}

impl IptablesCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Runs iptables and returns stdout, or an error carrying stderr
    async fn run(&self, args: &[String], action: &str) -> Result<String> {
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();

        let output = crate::elevation::create_elevated_iptables_command(&self.binary, &argv)?
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                error!("Failed to spawn {}: {e}", self.binary);
                Error::Internal(format!("Failed to spawn {}: {e}", self.binary))
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("iptables {action} failed: {stderr}");
            Err(Error::Iptables {
                message: format!("failed to {action}: {stderr}"),
                stderr: Some(stderr),
                exit_code: output.status.code(),
            })
        }
    }
}

#[async_trait]
impl PacketFilter for IptablesCli {
    async fn list_rules(&self, table: &str) -> Result<String> {
        let args = list_args(table)?;
        self.run(&args, "list rules").await
    }

    async fn add_rule(
        &self,
        table: &str,
        chain: &str,
        position: Option<u32>,
        spec: &[String],
    ) -> Result<()> {
        let args = add_args(table, chain, position, spec)?;
        self.run(&args, "add rule").await?;
        info!("Added rule to {table}/{chain}");
        Ok(())
    }

    async fn delete_rule(&self, table: &str, chain: &str, line_number: u32) -> Result<()> {
        let args = delete_args(table, chain, line_number)?;
        self.run(&args, "delete rule").await?;
        info!("Deleted rule {table}/{chain} line {line_number}");
        Ok(())
    }
}
