//! Operator recovery operations.

use uuid::Uuid;

use crate::db;
use crate::error::QueueError;
use crate::models::{Priority, QueueEntry, SubmissionStatus};
use crate::queue;
use crate::state::SharedState;

/// Put one submission back into play: reset it to pending, clear its error,
/// and queue it at `priority` (default `Priority::HIGH`).
pub async fn retry_submission(
    state: &SharedState,
    submission_id: Uuid,
    priority: Option<i32>,
) -> Result<QueueEntry, QueueError> {
    let priority = match priority {
        Some(p) => Priority::new(p)?,
        None => Priority::HIGH,
    };
    let opts = queue::default_options(state, priority);

    let mut tx = state.pool.begin().await?;
    db::submissions::update_status(&mut *tx, submission_id, SubmissionStatus::Pending, None)
        .await?
        .ok_or(QueueError::NotFound(submission_id))?;
    let entry = db::retry_queue::enqueue(&mut *tx, submission_id, &opts).await?;
    tx.commit().await?;

    tracing::info!("Operator retry queued for submission {submission_id} at priority {priority}");
    Ok(entry)
}

/// Reset every permanently failed submission and queue them all at the
/// default priority. Returns how many were reset.
pub async fn retry_all_failed(state: &SharedState) -> Result<u64, QueueError> {
    let opts = queue::default_options(state, Priority::DEFAULT);

    let mut tx = state.pool.begin().await?;
    let ids = db::submissions::reset_all_failed(&mut *tx).await?;
    db::retry_queue::enqueue_bulk(&mut *tx, &ids, &opts).await?;
    tx.commit().await?;

    tracing::info!("Operator bulk retry queued {} failed submissions", ids.len());
    Ok(ids.len() as u64)
}

/// Delete every queue entry. Submissions are left as they are.
pub async fn purge(state: &SharedState) -> Result<u64, QueueError> {
    let removed = db::retry_queue::purge(&state.pool).await?;
    tracing::warn!("Purged {removed} queue entries");
    Ok(removed)
}

pub use crate::queue::{list, set_priority, status};
