//! Re-locating a tracked rule in a fresh listing
//!
//! iptables has no stable rule identity; a rule is addressed by its line
//! number, which moves whenever anything above it in the chain changes. To
//! delete a temporary rule when it expires we take a fresh listing and look
//! for the live rule whose fields agree with the stored canonical spec.
//!
//! The two sides spell defaults differently. The stored spec simply omits an
//! unset source, while the listing prints `0.0.0.0/0`; the stored spec says
//! `-p tcp --dport 22 -j DROP` while the listing shows `tcp ... dpt:22` under
//! a `DROP` target. Each live rule is therefore reduced to its non-default
//! fields before comparison.
//!
//! Matching runs in two tiers over the chain, in listing order:
//!
//! 1. containment: the normalized stored spec contains the live rule's
//!    reduced string, or the other way round;
//! 2. components: the live target appears in the spec, the protocol is either
//!    universal or appears in the spec, and the destination port is either
//!    absent or appears in the spec.
//!
//! Tier 1 is tried against every rule before tier 2 is tried against any.
//! The heuristic can pick a different rule with identical effective fields.

use crate::core::rule::Rule;

/// Protocol values the listing uses for "any protocol"
const UNIVERSAL_PROTOCOLS: [&str; 3] = ["all", "any", "0"];

/// Address values the listing uses for "any address"
const UNIVERSAL_ADDRESSES: [&str; 3] = ["0.0.0.0/0", "::/0", "anywhere"];

/// Lowercases and collapses whitespace runs to single spaces
pub fn normalize(spec: &str) -> String {
    spec.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn is_universal_protocol(protocol: &str) -> bool {
    protocol.is_empty() || UNIVERSAL_PROTOCOLS.contains(&protocol.to_lowercase().as_str())
}

fn is_universal_address(address: &str) -> bool {
    address.is_empty() || UNIVERSAL_ADDRESSES.contains(&address)
}

/// Reduces a live rule to its non-default fields: protocol, source,
/// destination, destination port, target.
pub fn synthesize(rule: &Rule) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(5);

    if !is_universal_protocol(&rule.protocol) {
        parts.push(&rule.protocol);
    }
    if !is_universal_address(&rule.source) {
        parts.push(&rule.source);
    }
    if !is_universal_address(&rule.destination) {
        parts.push(&rule.destination);
    }
    if let Some(port) = rule.destination_port.as_deref() {
        parts.push(port);
    }
    if !rule.target.is_empty() {
        parts.push(&rule.target);
    }

    normalize(&parts.join(" "))
}

fn matches_by_containment(rule: &Rule, normalized_spec: &str) -> bool {
    let live = synthesize(rule);
    normalized_spec.contains(&live) || live.contains(normalized_spec)
}

fn matches_by_components(rule: &Rule, normalized_spec: &str) -> bool {
    let target = rule.target.to_lowercase();
    if target.is_empty() || !normalized_spec.contains(&target) {
        return false;
    }

    if !is_universal_protocol(&rule.protocol)
        && !normalized_spec.contains(&rule.protocol.to_lowercase())
    {
        return false;
    }

    match rule.destination_port.as_deref() {
        Some(port) => normalized_spec.contains(port),
        None => true,
    }
}

/// Finds the current line number of the rule in `chain` matching `spec`.
///
/// `rules` is a fresh listing of one table; rules from other chains are
/// ignored. Returns `None` when neither tier matches, which is the normal
/// outcome for a rule that someone else already removed.
pub fn find_line_number(rules: &[Rule], chain: &str, spec: &str) -> Option<u32> {
    let normalized = normalize(spec);
    let in_chain = || rules.iter().filter(move |rule| rule.chain == chain);

    in_chain()
        .find(|rule| matches_by_containment(rule, &normalized))
        .or_else(|| in_chain().find(|rule| matches_by_components(rule, &normalized)))
        .map(|rule| rule.line_number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_listing;
    use crate::core::test_helpers::{FILTER_LISTING, live_rule};

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  -p  TCP\t--dport 22\n -j DROP "), "-p tcp --dport 22 -j drop");
    }

    #[test]
    fn test_synthesize_skips_defaults() {
        let rule = live_rule("INPUT", 1, "DROP", "tcp", Some("22"));
        assert_eq!(synthesize(&rule), "tcp 22 drop");

        let rule = live_rule("INPUT", 1, "ACCEPT", "all", None);
        assert_eq!(synthesize(&rule), "accept");

        let mut rule = live_rule("INPUT", 1, "ACCEPT", "udp", None);
        rule.source = "10.0.0.0/8".into();
        assert_eq!(synthesize(&rule), "udp 10.0.0.0/8 accept");
    }

    #[test]
    fn test_component_match_for_canonical_spec() {
        let rules = vec![
            live_rule("INPUT", 1, "ACCEPT", "tcp", Some("80")),
            live_rule("INPUT", 2, "DROP", "tcp", Some("22")),
        ];
        assert_eq!(find_line_number(&rules, "INPUT", "-p tcp --dport 22 -j DROP"), Some(2));
    }

    #[test]
    fn test_containment_wins_over_earlier_component_match() {
        // Line 1 only satisfies tier 2; line 3 satisfies tier 1 and must win.
        let mut source_only = live_rule("INPUT", 1, "DROP", "all", None);
        source_only.source = "10.0.0.0/8".into();
        let rules = vec![
            source_only,
            live_rule("INPUT", 2, "ACCEPT", "udp", Some("53")),
            live_rule("INPUT", 3, "DROP", "tcp", Some("22")),
        ];
        assert_eq!(find_line_number(&rules, "INPUT", "tcp 22 drop"), Some(3));
    }

    #[test]
    fn test_reverse_containment() {
        // Live string longer than the stored spec
        let rules = vec![live_rule("INPUT", 4, "DROP", "tcp", Some("22"))];
        assert_eq!(find_line_number(&rules, "INPUT", "22 DROP"), Some(4));
    }

    #[test]
    fn test_first_in_listing_order_wins() {
        let rules = vec![
            live_rule("INPUT", 5, "DROP", "tcp", Some("22")),
            live_rule("INPUT", 6, "DROP", "tcp", Some("22")),
        ];
        assert_eq!(find_line_number(&rules, "INPUT", "-p tcp --dport 22 -j DROP"), Some(5));
    }

    #[test]
    fn test_other_chains_ignored() {
        let rules = vec![
            live_rule("FORWARD", 1, "DROP", "tcp", Some("22")),
            live_rule("INPUT", 7, "ACCEPT", "udp", Some("53")),
        ];
        assert_eq!(find_line_number(&rules, "INPUT", "-p tcp --dport 22 -j DROP"), None);
    }

    #[test]
    fn test_port_mismatch_not_found() {
        let rules = vec![live_rule("INPUT", 1, "DROP", "tcp", Some("2222"))];
        // tier 2 needs the live port inside the spec
        assert_eq!(find_line_number(&rules, "INPUT", "-p tcp --dport 23 -j DROP"), None);
    }

    #[test]
    fn test_protocol_mismatch_not_found() {
        let rules = vec![live_rule("INPUT", 1, "DROP", "udp", Some("22"))];
        assert_eq!(find_line_number(&rules, "INPUT", "-p tcp --dport 22 -j DROP"), None);
    }

    #[test]
    fn test_no_overlap_not_found() {
        let rules = parse_listing(FILTER_LISTING, "filter");
        assert_eq!(
            find_line_number(&rules, "INPUT", "-p udp --dport 5000 -j REJECT"),
            None
        );
    }

    #[test]
    fn test_empty_listing_not_found() {
        assert_eq!(find_line_number(&[], "INPUT", "-j DROP"), None);
    }

    #[test]
    fn test_loose_match_on_universal_protocol() {
        // A target-only live rule matches any spec naming that target
        let rules = vec![live_rule("INPUT", 9, "LOG", "all", None)];
        assert_eq!(
            find_line_number(&rules, "INPUT", "-p tcp -s 10.0.0.1 -j LOG"),
            Some(9)
        );
    }

    #[test]
    fn test_matches_parsed_listing() {
        let rules = parse_listing(FILTER_LISTING, "filter");
        assert_eq!(
            find_line_number(&rules, "INPUT", "-p tcp --dport 22 -j ACCEPT"),
            Some(1)
        );
        assert_eq!(
            find_line_number(&rules, "INPUT", "-p tcp -s 203.0.113.0/24 --dport 3306 -j DROP"),
            Some(3)
        );
    }
}
