//! iptkeeper - iptables rule manager
//!
//! Drives the `iptables` command-line tool to list, add and delete rules,
//! keeps an audit history of every change, and retracts temporary rules
//! automatically once their time-to-live has passed.
//!
//! # Architecture
//!
//! - [`core`] - Rule records, listing parser, spec canonicalizer, expiry matcher and the iptables driver
//! - [`scheduler`] - Background worker that deletes expired temporary rules
//! - [`service`] - Request-path operations (list, search, add, delete, stats)
//! - [`store`] - SQLite persistence for history and temporary rules
//! - [`audit`] - History record types and best-effort recording
//! - [`stats`] - Traffic and rule statistics
//! - [`validators`] - Input validation and sanitization
//! - [`elevation`] - Privilege escalation for iptables calls
//! - [`config`] - Configuration persistence
//! - [`utils`] - XDG directories and formatting helpers
//!
//! # Rule Identity
//!
//! iptables addresses rules only by their current line number in a chain.
//! Temporary rules are therefore stored by canonical spec and re-located in
//! a fresh listing when they expire (see [`core::matcher`]).

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod elevation;
pub mod scheduler;
pub mod service;
pub mod stats;
pub mod store;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::error::{Error, Result};
pub use core::parser::parse_listing;
pub use core::rule::{Rule, RuleDeleteRequest, RuleRequest, Table};
