//! Core rule-lifecycle functionality
//!
//! - [`rule`]: Rule records, tables and add/delete requests
//! - [`parser`]: `iptables -L` listing parser
//! - [`spec`]: Deterministic rule specs for the add call and later matching
//! - [`matcher`]: Re-locating a stored spec in a fresh listing
//! - [`iptables`]: The `PacketFilter` seam and the `iptables` process driver
//! - [`error`]: Error types and tool-diagnostic translation

pub mod error;
pub mod iptables;
pub mod matcher;
pub mod parser;
pub mod rule;
pub mod spec;

#[cfg(test)]
pub mod test_helpers;
