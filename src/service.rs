//! Request-path rule operations
//!
//! [`RuleService`] is what a front end calls: read and search the live
//! ruleset, add and delete rules with an audit trail, and register temporary
//! rules with the [`RuleScheduler`]. It keeps no state between calls; every
//! read lists the tool afresh.

use crate::audit::{self, ActionKind, HistoryRecord};
use crate::core::error::{Error, Result};
use crate::core::iptables::PacketFilter;
use crate::core::matcher::find_line_number;
use crate::core::parser::parse_listing;
use crate::core::rule::{Rule, RuleDeleteRequest, RuleRequest, Table};
use crate::core::spec::{RuleSpec, build_rule_spec};
use crate::scheduler::RuleScheduler;
use crate::stats::{RuleStats, TrafficStats};
use crate::store::{Store, TemporaryRule};
use crate::validators;
use std::sync::Arc;
use tracing::{error, info};

/// Who a change is attributed to in the history log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub name: String,
    pub ip_address: String,
}

impl Actor {
    pub fn new(name: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip_address: ip_address.into(),
        }
    }

    /// The local operator using the CLI
    pub fn local(name: impl Into<String>) -> Self {
        Self::new(name, "localhost")
    }
}

/// Result of a successful add
#[derive(Debug, Clone)]
pub struct AddedRule {
    pub spec: RuleSpec,
    /// Tracking row, when a TTL was requested and registration succeeded
    pub expiry: Option<TemporaryRule>,
}

pub struct RuleService {
    filter: Arc<dyn PacketFilter>,
    store: Store,
    scheduler: Arc<RuleScheduler>,
    tables: Vec<Table>,
}

fn field(name: &'static str) -> impl FnOnce(String) -> Error {
    move |message| Error::validation(name, message)
}

impl RuleService {
    pub fn new(
        filter: Arc<dyn PacketFilter>,
        store: Store,
        scheduler: Arc<RuleScheduler>,
        tables: Vec<Table>,
    ) -> Self {
        Self {
            filter,
            store,
            scheduler,
            tables,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<RuleScheduler> {
        &self.scheduler
    }

    /// Every rule of the configured tables, table by table in listing order
    pub async fn all_rules(&self) -> Result<Vec<Rule>> {
        let listings = self.filter.list_tables(&self.tables).await?;
        Ok(listings
            .iter()
            .flat_map(|(table, raw)| parse_listing(raw, table.as_str()))
            .collect())
    }

    pub async fn rules_by_table(&self, table: &str) -> Result<Vec<Rule>> {
        validators::validate_table(table).map_err(field("table"))?;
        let raw = self.filter.list_rules(table).await?;
        Ok(parse_listing(&raw, table))
    }

    /// Rules with any field containing `query`, case-insensitively
    pub async fn search(&self, query: &str) -> Result<Vec<Rule>> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Err(Error::validation("query", "Search query is required"));
        }

        let mut rules = self.all_rules().await?;
        rules.retain(|rule| rule.matches_query(&query));
        Ok(rules)
    }

    /// Installs a rule, records it, and registers it for expiry if it has a TTL.
    ///
    /// The history entry is written whether or not iptables accepted the
    /// rule. A failure to register the expiry is logged; the rule stays.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] before anything runs, or the tool's
    /// error if the add itself failed.
    pub async fn add_rule(&self, request: &RuleRequest, actor: &Actor) -> Result<AddedRule> {
        validators::validate_table(&request.table).map_err(field("table"))?;
        validators::validate_chain(&request.chain).map_err(field("chain"))?;
        let spec = build_rule_spec(request)?;

        let result = self
            .filter
            .add_rule(&request.table, &request.chain, request.position, spec.tokens())
            .await;

        audit::record(
            &self.store,
            HistoryRecord::new(
                ActionKind::Add,
                request.table.as_str(),
                request.chain.as_str(),
                request.describe(),
            )
            .by(actor.name.as_str(), actor.ip_address.as_str())
            .outcome(&result),
        )
        .await;
        result?;

        info!(
            table = %request.table,
            chain = %request.chain,
            spec = %spec,
            actor = %actor.name,
            "Rule added"
        );

        let expiry = match request.ttl_seconds() {
            Some(ttl) => match self
                .scheduler
                .schedule_deletion(&request.table, &request.chain, &spec.canonical(), ttl)
                .await
            {
                Ok(rule) => Some(rule),
                Err(e) => {
                    error!("Failed to schedule rule expiry: {e}");
                    None
                }
            },
            None => None,
        };

        Ok(AddedRule { spec, expiry })
    }

    /// Deletes the rule currently at `request.line_number` and records it.
    pub async fn delete_rule(&self, request: &RuleDeleteRequest, actor: &Actor) -> Result<()> {
        validators::validate_table(&request.table).map_err(field("table"))?;
        validators::validate_chain(&request.chain).map_err(field("chain"))?;

        let result = self
            .filter
            .delete_rule(&request.table, &request.chain, request.line_number)
            .await;

        audit::record(
            &self.store,
            HistoryRecord::new(
                ActionKind::Delete,
                request.table.as_str(),
                request.chain.as_str(),
                request.describe(),
            )
            .by(actor.name.as_str(), actor.ip_address.as_str())
            .outcome(&result),
        )
        .await;
        result?;

        info!(
            table = %request.table,
            chain = %request.chain,
            line = request.line_number,
            actor = %actor.name,
            "Rule deleted"
        );
        Ok(())
    }

    /// Current line number of the rule matching `canonical_spec`, if any
    pub async fn find_current_line_number(
        &self,
        table: &str,
        chain: &str,
        canonical_spec: &str,
    ) -> Result<Option<u32>> {
        let rules = self.rules_by_table(table).await?;
        Ok(find_line_number(&rules, chain, canonical_spec))
    }

    pub async fn traffic_stats(&self) -> Result<TrafficStats> {
        Ok(TrafficStats::from_rules(&self.all_rules().await?))
    }

    pub async fn rule_stats(&self) -> Result<RuleStats> {
        Ok(RuleStats::from_rules(&self.all_rules().await?))
    }

    pub async fn pending_expiries(&self) -> Result<Vec<TemporaryRule>> {
        self.store.list_temp_rules().await
    }

    pub async fn history(&self, limit: u32, offset: u32) -> Result<(Vec<HistoryRecord>, i64)> {
        let page = self.store.history_page(limit, offset).await?;
        let total = self.store.history_count().await?;
        Ok((page, total))
    }
}
