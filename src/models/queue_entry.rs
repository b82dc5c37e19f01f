use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// Urgency of a queue entry. 1 is most urgent, 10 least.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct Priority(i32);

impl Priority {
    pub const HIGHEST: Priority = Priority(1);
    pub const HIGH: Priority = Priority(2);
    pub const DEFAULT: Priority = Priority(5);
    pub const LOWEST: Priority = Priority(10);

    pub fn new(value: i32) -> Result<Self, QueueError> {
        if (Self::HIGHEST.0..=Self::LOWEST.0).contains(&value) {
            Ok(Priority(value))
        } else {
            Err(QueueError::InvalidPriority(value))
        }
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::DEFAULT
    }
}

impl TryFrom<i32> for Priority {
    type Error = QueueError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Priority::new(value)
    }
}

impl From<Priority> for i32 {
    fn from(p: Priority) -> Self {
        p.0
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durable retry state for one submission's delivery.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub priority: i32,
    pub scheduled_at: DateTime<Utc>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub backoff_multiplier: f64,
    pub last_error: Option<String>,
    /// Lease held by the worker currently attempting delivery.
    pub claimed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle state of an entry, derived from its stored fields.
///
/// There is no state column: `Delivered` and permanently failed entries are
/// represented by the row being gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    /// Waiting for `scheduled_at` to pass.
    Scheduled,
    /// Leased to a worker that is attempting delivery.
    Claimed,
    /// Due and under the attempt ceiling.
    Eligible,
    /// Hit the ceiling without a recorded outcome; removed on the next reap.
    Exhausted,
}

impl QueueEntry {
    pub fn state_at(&self, now: DateTime<Utc>) -> EntryState {
        if self.claimed_until.is_some_and(|until| until > now) {
            EntryState::Claimed
        } else if self.attempts >= self.max_attempts {
            EntryState::Exhausted
        } else if self.scheduled_at > now {
            EntryState::Scheduled
        } else {
            EntryState::Eligible
        }
    }

    pub fn is_final_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Queue entry joined with the submission context operators need.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct QueueListing {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub entry: QueueEntry,
    pub destination: String,
    pub submission_status: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub eligible: i64,
    pub scheduled: i64,
    pub claimed: i64,
    /// Permanently failed submissions. Exhausted entries are deleted, so this
    /// is counted from the submissions table.
    pub exhausted: i64,
}

/// Per-entry settings applied when an entry is first created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnqueueOptions {
    pub priority: Priority,
    pub max_attempts: i32,
    pub backoff_multiplier: f64,
}

impl EnqueueOptions {
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.max_attempts < 1 {
            return Err(QueueError::InvalidOptions(format!(
                "max_attempts must be at least 1, got {}",
                self.max_attempts
            )));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 0.0 {
            return Err(QueueError::InvalidOptions(format!(
                "backoff_multiplier must be a positive number, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}
