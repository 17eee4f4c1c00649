//! Rule data structures
//!
//! This module defines the records exchanged between the listing parser, the
//! rule service and the expiry scheduler.
//!
//! # Rule Identity
//!
//! A parsed [`Rule`] carries a `line_number`, but that number is only valid at
//! the instant of the listing that produced it. Any insertion or deletion in
//! the same chain, by us or by another actor, renumbers every rule below it.
//! Nothing in this crate persists a line number; temporary rules are tracked
//! by their canonical spec instead (see [`crate::core::spec`]).
//!
//! # Example
//!
//! ```
//! use iptkeeper::core::rule::{RuleRequest, Table};
//!
//! let request = RuleRequest::new(Table::Filter, "INPUT", "DROP")
//!     .with_protocol("tcp")
//!     .with_dport("22")
//!     .with_ttl(300);
//! assert_eq!(request.ttl_seconds(), Some(300));
//! ```

use serde::{Deserialize, Serialize};

/// Tables listed by default when reading the whole ruleset
///
/// `security` is accepted for writes but is rarely loaded, so it is not part
/// of the default listing set.
pub const DEFAULT_TABLES: [Table; 4] = [Table::Filter, Table::Nat, Table::Mangle, Table::Raw];

/// An iptables table
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    #[strum(serialize = "filter")]
    Filter,
    #[strum(serialize = "nat")]
    Nat,
    #[strum(serialize = "mangle")]
    Mangle,
    #[strum(serialize = "raw")]
    Raw,
    #[strum(serialize = "security")]
    Security,
}

impl Table {
    /// Returns the table name as passed to `iptables -t`
    pub const fn as_str(self) -> &'static str {
        match self {
            Table::Filter => "filter",
            Table::Nat => "nat",
            Table::Mangle => "mangle",
            Table::Raw => "raw",
            Table::Security => "security",
        }
    }
}

/// A single rule as read from a listing
///
/// Rebuilt on every read. `line_number` is a snapshot position, not an
/// identifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rule {
    pub table: String,
    pub chain: String,
    /// 1-based position within `chain` at listing time
    pub line_number: u32,
    pub target: String,
    pub protocol: String,
    pub in_interface: String,
    pub out_interface: String,
    pub source: String,
    pub destination: String,
    pub source_port: Option<String>,
    pub destination_port: Option<String>,
    pub packets: u64,
    pub bytes: u64,
    /// Trailing option text after the destination column
    pub options: String,
    /// The listing line this rule was parsed from
    pub raw: String,
}

impl Rule {
    /// Returns `true` if any searchable field contains `query` (already lowercased)
    pub fn matches_query(&self, query: &str) -> bool {
        [
            self.table.as_str(),
            self.chain.as_str(),
            self.target.as_str(),
            self.protocol.as_str(),
            self.source.as_str(),
            self.destination.as_str(),
            self.source_port.as_deref().unwrap_or_default(),
            self.destination_port.as_deref().unwrap_or_default(),
            self.options.as_str(),
            self.raw.as_str(),
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(query))
    }
}

/// Request to install a new rule
///
/// Optional fields left `None` (or set to an empty string) are omitted from
/// the generated argument list.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleRequest {
    pub table: String,
    pub chain: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub sport: Option<String>,
    #[serde(default)]
    pub dport: Option<String>,
    pub target: String,
    /// Insert at this 1-based position instead of appending
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub comment: Option<String>,
    /// Seconds until automatic deletion (0 or `None` = permanent)
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl RuleRequest {
    pub fn new(table: Table, chain: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            table: table.as_str().to_string(),
            chain: chain.into(),
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_sport(mut self, port: impl Into<String>) -> Self {
        self.sport = Some(port.into());
        self
    }

    pub fn with_dport(mut self, port: impl Into<String>) -> Self {
        self.dport = Some(port.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_position(mut self, position: u32) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_ttl(mut self, seconds: u64) -> Self {
        self.expires_in = Some(seconds);
        self
    }

    /// Positive TTL, if any
    pub fn ttl_seconds(&self) -> Option<u64> {
        self.expires_in.filter(|&s| s > 0)
    }

    /// Human-readable summary written to the history log
    pub fn describe(&self) -> String {
        fn or_any(value: Option<&String>) -> &str {
            value.map(String::as_str).filter(|v| !v.is_empty()).unwrap_or("any")
        }

        format!(
            "Protocol: {}, Source: {}, Dest: {}, DPort: {}, Target: {}",
            or_any(self.protocol.as_ref()),
            or_any(self.source.as_ref()),
            or_any(self.destination.as_ref()),
            or_any(self.dport.as_ref()),
            self.target
        )
    }
}

/// Request to remove the rule currently at `line_number`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleDeleteRequest {
    pub table: String,
    pub chain: String,
    pub line_number: u32,
}

impl RuleDeleteRequest {
    pub fn describe(&self) -> String {
        format!("Line: {}", self.line_number)
    }
}
