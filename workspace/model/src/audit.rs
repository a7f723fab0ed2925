use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transaction::UnknownVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Approve,
    Reject,
}

impl AuditAction {
    pub const ALL: [AuditAction; 5] = [
        Self::Create,
        Self::Update,
        Self::Delete,
        Self::Approve,
        Self::Reject,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "audit action",
                value: s.to_string(),
            })
    }
}

/// The user on whose behalf a mutation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub user_email: Option<String>,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, user_email: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_email,
        }
    }

    /// Used for background work such as reconcile sweeps.
    pub fn system() -> Self {
        Self::new("system", None)
    }
}

/// Write-once record of a mutating action, stored under `audit_logs/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub action: AuditAction,
    /// Type name of the touched record, e.g. `transaction` or `budget`.
    pub entity: String,
    pub entity_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_email: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub details: serde_json::Value,
}
