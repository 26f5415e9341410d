use chrono::{DateTime, Utc};
use serde::Serialize;

/// A moderation report against a message. `resolved` only moves false to true.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MessageFlag {
    pub id: i64,
    pub message_id: i64,
    pub flagged_by: Option<i64>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_by: Option<i64>,
    pub resolved_at: Option<DateTime<Utc>>,
}

pub const MAX_REASON_LEN: usize = 255;
