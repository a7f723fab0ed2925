//! Write-once audit trail of mutating actions.

use std::sync::Arc;

use chrono::Utc;
use common::DateRange;
use model::{
    Actor, AuditAction, AuditLogEntry, paths,
    store::{LedgerStore, WriteOp},
};
use serde_json::Value;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    error::Result,
    filter::{self, sort_newest_first},
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFilter {
    pub action: Option<AuditAction>,
    pub entity: Option<String>,
    pub date_range: Option<DateRange>,
    pub search: Option<String>,
}

/// Builds an entry stamped now.
pub fn entry(
    action: AuditAction,
    entity: &str,
    entity_id: impl ToString,
    actor: &Actor,
    details: Value,
) -> AuditLogEntry {
    AuditLogEntry {
        id: Uuid::new_v4(),
        action,
        entity: entity.to_string(),
        entity_id: entity_id.to_string(),
        user_id: actor.user_id.clone(),
        user_email: actor.user_email.clone(),
        timestamp: Utc::now(),
        details,
    }
}

/// The write that stores `entry`, for callers that commit it with other changes.
pub fn create_op(entry: &AuditLogEntry) -> Result<WriteOp> {
    Ok(WriteOp::create(
        paths::audit_log(entry.id),
        serde_json::to_value(entry)?,
    ))
}

#[derive(Debug, Clone)]
pub struct AuditTrail {
    store: Arc<dyn LedgerStore>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, actor, details), fields(user_id = %actor.user_id))]
    pub async fn record(
        &self,
        action: AuditAction,
        entity: &str,
        entity_id: &str,
        actor: &Actor,
        details: Value,
    ) -> Result<AuditLogEntry> {
        let entry = entry(action, entity, entity_id, actor, details);
        self.store.commit(vec![create_op(&entry)?]).await?;
        debug!(id = %entry.id, "audit entry recorded");
        Ok(entry)
    }

    /// Matching entries, newest first.
    pub async fn list(&self, criteria: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        let mut entries = self
            .store
            .list(paths::AUDIT_LOGS)
            .await?
            .iter()
            .map(|document| document.decode::<AuditLogEntry>())
            .collect::<std::result::Result<Vec<_>, _>>()?;

        entries.retain(|entry| {
            criteria.action.is_none_or(|action| entry.action == action)
                && criteria
                    .entity
                    .as_deref()
                    .is_none_or(|entity| entry.entity == entity)
        });
        if let Some(range) = &criteria.date_range {
            entries = filter::filter_by_date_range(&entries, range);
        }
        if let Some(term) = &criteria.search {
            entries = filter::search(&entries, term);
        }
        sort_newest_first(&mut entries);
        Ok(entries)
    }
}
