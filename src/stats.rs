//! Traffic and rule statistics
//!
//! Computed on demand from a fresh listing; nothing here is cached or stored.

use crate::core::rule::Rule;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Number of rules reported in [`RuleStats::top_rules_by_bytes`]
pub const TOP_RULES_LIMIT: usize = 10;

/// Packet and byte totals for one chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChainTraffic {
    pub name: String,
    pub packets: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrafficStats {
    pub timestamp: DateTime<Utc>,
    pub total_packets: u64,
    pub total_bytes: u64,
    /// Keyed by `table:chain`
    pub by_chain: BTreeMap<String, ChainTraffic>,
}

impl TrafficStats {
    pub fn from_rules(rules: &[Rule]) -> Self {
        let mut stats = Self {
            timestamp: Utc::now(),
            total_packets: 0,
            total_bytes: 0,
            by_chain: BTreeMap::new(),
        };

        for rule in rules {
            stats.total_packets = stats.total_packets.saturating_add(rule.packets);
            stats.total_bytes = stats.total_bytes.saturating_add(rule.bytes);

            let chain = stats
                .by_chain
                .entry(format!("{}:{}", rule.table, rule.chain))
                .or_insert_with(|| ChainTraffic {
                    name: rule.chain.clone(),
                    ..ChainTraffic::default()
                });
            chain.packets = chain.packets.saturating_add(rule.packets);
            chain.bytes = chain.bytes.saturating_add(rule.bytes);
        }

        stats
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleStats {
    pub total_rules: usize,
    pub rules_by_table: BTreeMap<String, usize>,
    /// Keyed by bare chain name, so same-named chains in different tables add up
    pub rules_by_chain: BTreeMap<String, usize>,
    pub top_rules_by_bytes: Vec<Rule>,
}

impl RuleStats {
    pub fn from_rules(rules: &[Rule]) -> Self {
        let mut rules_by_table = BTreeMap::new();
        let mut rules_by_chain = BTreeMap::new();
        for rule in rules {
            *rules_by_table.entry(rule.table.clone()).or_insert(0) += 1;
            *rules_by_chain.entry(rule.chain.clone()).or_insert(0) += 1;
        }

        let mut top = rules.to_vec();
        top.sort_by(|a, b| b.bytes.cmp(&a.bytes));
        top.truncate(TOP_RULES_LIMIT);

        Self {
            total_rules: rules.len(),
            rules_by_table,
            rules_by_chain,
            top_rules_by_bytes: top,
        }
    }
}
