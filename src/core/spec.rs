//! Canonical rule specifications
//!
//! A [`RuleSpec`] is the ordered argument list handed to `iptables` after the
//! table/chain selectors. Its space-joined form is persisted for temporary
//! rules and later compared against live listings by
//! [`crate::core::matcher`], so the token order must not depend on how the
//! request was assembled.
//!
//! Field order is fixed: protocol, source, destination, source port,
//! destination port, target, comment. Unset and empty fields are omitted.

use crate::core::error::{Error, Result};
use crate::core::rule::RuleRequest;
use crate::validators;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered iptables argument tokens for one rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    tokens: Vec<String>,
}

impl RuleSpec {
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn into_tokens(self) -> Vec<String> {
        self.tokens
    }

    /// Space-joined token string stored for later matching
    pub fn canonical(&self) -> String {
        self.tokens.join(" ")
    }
}

impl fmt::Display for RuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Trims and drops empty values so `Some("")` and `None` canonicalize alike
fn present(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn check(field: &str, value: &str, extra: fn(&str) -> std::result::Result<(), String>) -> Result<()> {
    validators::check_denylist(value).map_err(|message| Error::validation(field, message))?;
    extra(value).map_err(|message| Error::validation(field, message))
}

/// Builds the canonical spec for a request.
///
/// Every field is checked against the denylist and its own format rules
/// before any token is produced; nothing is returned for a request that
/// would need escaping.
///
/// # Errors
///
/// Returns [`Error::Validation`] naming the first offending field.
pub fn build_rule_spec(request: &RuleRequest) -> Result<RuleSpec> {
    let protocol = present(request.protocol.as_ref());
    let source = present(request.source.as_ref());
    let destination = present(request.destination.as_ref());
    let sport = present(request.sport.as_ref());
    let dport = present(request.dport.as_ref());
    let target = request.target.trim();
    let comment = present(request.comment.as_ref());

    if let Some(value) = protocol {
        check("protocol", value, validators::validate_protocol)?;
    }
    if let Some(value) = source {
        check("source", value, validators::validate_address)?;
    }
    if let Some(value) = destination {
        check("destination", value, validators::validate_address)?;
    }
    if let Some(value) = sport {
        check("sport", value, validators::validate_port_spec)?;
    }
    if let Some(value) = dport {
        check("dport", value, validators::validate_port_spec)?;
    }
    if !target.is_empty() {
        check("target", target, validators::validate_target)?;
    }
    if let Some(value) = comment {
        check("comment", value, validators::validate_comment)?;
    }

    let mut tokens = Vec::with_capacity(14);
    let mut push = |flag: &str, value: &str| {
        tokens.push(flag.to_string());
        tokens.push(value.to_string());
    };

    if let Some(value) = protocol {
        push("-p", value);
    }
    if let Some(value) = source {
        push("-s", value);
    }
    if let Some(value) = destination {
        push("-d", value);
    }
    if let Some(value) = sport {
        push("--sport", value);
    }
    if let Some(value) = dport {
        push("--dport", value);
    }
    if !target.is_empty() {
        push("-j", target);
    }
    if let Some(value) = comment {
        push("-m", "comment");
        push("--comment", value);
    }

    Ok(RuleSpec { tokens })
}
