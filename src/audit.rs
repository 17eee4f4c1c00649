/// Audit history for rule changes
///
/// Every rule added or deleted through iptkeeper, by a user or by the expiry
/// scheduler, is appended to the `history` table. Records are never updated
/// or removed. Writing history is best-effort: a storage failure is logged
/// and never fails the operation being recorded.
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Actor name used for deletions performed by the scheduler
pub const SCHEDULER_ACTOR: &str = "scheduler";

/// Origin address used for deletions performed by the scheduler
pub const SCHEDULER_ORIGIN: &str = "localhost";

/// Types of recorded rule changes
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Add,
    Delete,
    AutoDelete,
}

/// A single history entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryRecord {
    /// Assigned by the store; 0 until appended
    pub id: i64,

    pub action: ActionKind,

    pub table: String,

    pub chain: String,

    /// Human-readable rule description
    pub rule_details: String,

    /// Who performed the change
    pub actor: String,

    /// Where the request came from
    pub ip_address: String,

    /// Whether the iptables call succeeded
    pub success: bool,

    /// Tool error text if the call failed
    pub error_msg: Option<String>,

    /// When the change happened (UTC)
    pub created_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// Creates a successful record stamped with the current time
    pub fn new(
        action: ActionKind,
        table: impl Into<String>,
        chain: impl Into<String>,
        rule_details: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            action,
            table: table.into(),
            chain: chain.into(),
            rule_details: rule_details.into(),
            actor: String::new(),
            ip_address: String::new(),
            success: true,
            error_msg: None,
            created_at: Utc::now(),
        }
    }

    pub fn by(mut self, actor: impl Into<String>, ip_address: impl Into<String>) -> Self {
        self.actor = actor.into();
        self.ip_address = ip_address.into();
        self
    }

    /// Marks the record failed with the tool's message
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error_msg = Some(error.into());
        self
    }

    /// Applies the outcome of the recorded call
    pub fn outcome<T>(self, result: &crate::Result<T>) -> Self {
        match result {
            Ok(_) => self,
            Err(e) => self.failed(e.to_string()),
        }
    }
}

/// Appends a record, logging instead of propagating a storage failure
pub async fn record(store: &Store, record: HistoryRecord) {
    if let Err(e) = store.append_history(&record).await {
        tracing::warn!(
            "Failed to write history ({} {}/{}): {}",
            record.action,
            record.table,
            record.chain,
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::str::FromStr;

    #[test]
    fn test_action_kind_names() {
        assert_eq!(ActionKind::Add.to_string(), "ADD");
        assert_eq!(ActionKind::AutoDelete.as_ref(), "AUTO_DELETE");
        assert_eq!(ActionKind::from_str("DELETE").unwrap(), ActionKind::Delete);
        assert_eq!(
            serde_json::to_string(&ActionKind::AutoDelete).unwrap(),
            "\"AUTO_DELETE\""
        );
    }

    #[test]
    fn test_outcome_records_failure() {
        let result: crate::Result<()> = Err(Error::Iptables {
            message: "failed to delete rule: Index of deletion too big".into(),
            stderr: None,
            exit_code: Some(1),
        });

        let rec = HistoryRecord::new(ActionKind::Delete, "filter", "INPUT", "Line: 9")
            .by("admin", "10.0.0.7")
            .outcome(&result);

        assert!(!rec.success);
        assert!(rec.error_msg.unwrap().contains("Index of deletion"));
        assert_eq!(rec.actor, "admin");
    }

    #[test]
    fn test_outcome_keeps_success() {
        let rec = HistoryRecord::new(ActionKind::Add, "filter", "INPUT", "x").outcome(&Ok(()));
        assert!(rec.success);
        assert!(rec.error_msg.is_none());
    }

    #[tokio::test]
    async fn test_record_appends() {
        let store = Store::open_in_memory().await.unwrap();
        record(
            &store,
            HistoryRecord::new(ActionKind::AutoDelete, "filter", "INPUT", "-j DROP")
                .by(SCHEDULER_ACTOR, SCHEDULER_ORIGIN),
        )
        .await;

        let page = store.history_page(10, 0).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].actor, "scheduler");
        assert_eq!(page[0].action, ActionKind::AutoDelete);
    }
}
