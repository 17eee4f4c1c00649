//! Input validation for iptables arguments
//!
//! Every value that ends up on an `iptables` command line passes through this
//! module first. Arguments are never interpreted by a shell, but a denylist is
//! still enforced so that nothing resembling shell syntax reaches the tool or
//! the history log. Validation always runs before any process is spawned.

use crate::core::rule::Table;
use std::str::FromStr;

/// Characters that could alter command interpretation
pub const DENIED_CHARS: [char; 10] = [';', '|', '&', '`', '$', '(', ')', '<', '>', '\\'];

/// iptables limits chain names to 28 characters (XT_EXTENSION_MAXNAMELEN - 1)
pub const MAX_CHAIN_LEN: usize = 28;

/// Built-in chains accepted without further checks
pub const BUILTIN_CHAINS: [&str; 5] = ["INPUT", "OUTPUT", "FORWARD", "PREROUTING", "POSTROUTING"];

/// Standard targets accepted without further checks
pub const STANDARD_TARGETS: [&str; 8] = [
    "ACCEPT",
    "DROP",
    "REJECT",
    "LOG",
    "MASQUERADE",
    "SNAT",
    "DNAT",
    "RETURN",
];

/// Comments are capped by the kernel's comment match at 256 bytes
pub const MAX_COMMENT_LEN: usize = 256;

/// Rejects values containing a denied character or any control character.
///
/// # Examples
///
/// ```
/// use iptkeeper::validators::check_denylist;
///
/// assert!(check_denylist("192.168.1.0/24").is_ok());
/// assert!(check_denylist("22; rm -rf /").is_err());
/// assert!(check_denylist("ssh\nDROP").is_err());
/// ```
///
/// # Errors
///
/// Returns `Err` naming the first offending character.
pub fn check_denylist(value: &str) -> Result<(), String> {
    if let Some(c) = value
        .chars()
        .find(|c| DENIED_CHARS.contains(c) || c.is_control())
    {
        return Err(format!("Disallowed character {c:?}"));
    }
    Ok(())
}

/// Validates a table name against the known tables.
///
/// # Errors
///
/// Returns `Err` for anything other than filter, nat, mangle, raw or security.
pub fn validate_table(name: &str) -> Result<Table, String> {
    Table::from_str(name).map_err(|_| format!("Invalid table: {name}"))
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
}

/// Validates a chain name.
///
/// Built-in chains pass directly. User chains must be ASCII alphanumeric plus
/// `_` and `-`, at most [`MAX_CHAIN_LEN`] characters.
///
/// # Errors
///
/// Returns `Err` if the name is empty, too long or has invalid characters.
pub fn validate_chain(name: &str) -> Result<(), String> {
    if BUILTIN_CHAINS.contains(&name) {
        return Ok(());
    }

    if name.len() > MAX_CHAIN_LEN {
        return Err(format!("Chain name too long (max {MAX_CHAIN_LEN} characters)"));
    }

    if !is_identifier(name) {
        return Err(format!("Invalid chain: {name}"));
    }

    Ok(())
}

/// Validates a jump target. User chains can be targets too.
///
/// # Errors
///
/// Returns `Err` if the target is not a standard target or a valid chain name.
pub fn validate_target(target: &str) -> Result<(), String> {
    if STANDARD_TARGETS.contains(&target) {
        return Ok(());
    }

    validate_chain(target).map_err(|_| format!("Invalid target: {target}"))
}

/// Validates an address or CIDR network.
///
/// Empty, `0.0.0.0/0` and `::/0` mean "any" and pass.
///
/// # Errors
///
/// Returns `Err` if the value does not parse as an IPv4/IPv6 address or network.
pub fn validate_address(value: &str) -> Result<(), String> {
    if value.is_empty() || value == "0.0.0.0/0" || value == "::/0" {
        return Ok(());
    }

    value
        .parse::<ipnetwork::IpNetwork>()
        .map(|_| ())
        .map_err(|_| format!("Invalid IP address or CIDR: {value}"))
}

/// Validates a port specification: single port, range (`80:443`) or
/// comma-separated list.
///
/// # Errors
///
/// Returns `Err` if any component is not a port in 1..=65535 or a range is
/// reversed.
pub fn validate_port_spec(spec: &str) -> Result<(), String> {
    if spec.is_empty() {
        return Ok(());
    }

    for part in spec.split(',') {
        let mut bounds = part.splitn(2, ':');
        let start = parse_port(bounds.next().unwrap_or_default())?;
        if let Some(end) = bounds.next() {
            let end = parse_port(end)?;
            validate_port_range(start, end)?;
        }
    }

    Ok(())
}

fn parse_port(token: &str) -> Result<u16, String> {
    token
        .parse::<u16>()
        .map_err(|_| format!("Invalid port specification: {token}"))
        .and_then(validate_port)
}

/// Validates a single port number.
///
/// # Errors
///
/// Returns `Err` if port is 0 (reserved).
pub fn validate_port(port: u16) -> Result<u16, String> {
    if port == 0 {
        Err("Port must be between 1 and 65535".to_string())
    } else {
        Ok(port)
    }
}

/// Validates a port range.
///
/// # Errors
///
/// Returns `Err` if:
/// - Either port is 0
/// - Start port is greater than end port
pub fn validate_port_range(start: u16, end: u16) -> Result<(u16, u16), String> {
    validate_port(start)?;
    validate_port(end)?;

    if start > end {
        Err("Start port must be less than or equal to end port".to_string())
    } else {
        Ok((start, end))
    }
}

/// Validates a protocol name or number (`tcp`, `udp`, `icmp`, `all`, `47`).
///
/// # Errors
///
/// Returns `Err` for anything that isn't alphanumeric.
pub fn validate_protocol(protocol: &str) -> Result<(), String> {
    if protocol.is_empty()
        || protocol.len() > 16
        || !protocol.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(format!("Invalid protocol: {protocol}"));
    }
    Ok(())
}

/// Validates a rule comment.
///
/// # Errors
///
/// Returns `Err` if the comment exceeds [`MAX_COMMENT_LEN`] bytes or contains
/// a quote character.
pub fn validate_comment(comment: &str) -> Result<(), String> {
    if comment.len() > MAX_COMMENT_LEN {
        return Err(format!("Comment too long (max {MAX_COMMENT_LEN} bytes)"));
    }
    if comment.contains(['"', '\'']) {
        return Err("Comment cannot contain quotes".to_string());
    }
    Ok(())
}

/// Checks if a port is well-known and returns informational message.
///
/// This is informational only and does not block the request.
pub fn check_well_known_port(port: u16) -> Option<String> {
    if port <= 1024 {
        let name = match port {
            22 => "SSH",
            80 => "HTTP",
            443 => "HTTPS",
            53 => "DNS",
            25 => "SMTP",
            21 => "FTP",
            _ => return Some(format!("Privileged port {port}")),
        };
        Some(format!("Port {port}: {name}"))
    } else {
        None
    }
}
