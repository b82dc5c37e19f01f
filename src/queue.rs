//! Enqueue path and read-side queries over the retry queue.

use uuid::Uuid;

use crate::db;
use crate::error::QueueError;
use crate::models::{EnqueueOptions, Priority, QueueEntry, QueueListing, QueueStatus, SubmissionStatus};
use crate::state::SharedState;

const MAX_LIST_LIMIT: i64 = 500;

/// Options for a fresh entry at `priority`, using the configured ceiling and multiplier.
pub fn default_options(state: &SharedState, priority: Priority) -> EnqueueOptions {
    EnqueueOptions {
        priority,
        max_attempts: state.config.max_attempts,
        backoff_multiplier: state.config.backoff_multiplier,
    }
}

/// Queue a submission for delivery, or re-prioritise it and make it due now
/// if it is already queued.
pub async fn enqueue(
    state: &SharedState,
    submission_id: Uuid,
    priority: i32,
) -> Result<QueueEntry, QueueError> {
    let priority = Priority::new(priority)?;
    enqueue_with(state, submission_id, default_options(state, priority)).await
}

/// Like `enqueue`, with explicit per-entry settings. The submission must
/// exist and be pending; settled or failed submissions go through
/// `admin::retry_submission` instead.
pub async fn enqueue_with(
    state: &SharedState,
    submission_id: Uuid,
    opts: EnqueueOptions,
) -> Result<QueueEntry, QueueError> {
    opts.validate()?;
    let submission = db::submissions::find_by_id(&state.pool, submission_id)
        .await?
        .ok_or(QueueError::NotFound(submission_id))?;
    match submission.status() {
        Some(status) if status.is_retryable() => {}
        Some(status) => {
            return Err(QueueError::NotPending {
                id: submission_id,
                status,
            });
        }
        None => {
            tracing::warn!(
                "Submission {submission_id} has unknown status {:?}",
                submission.status
            );
            return Err(QueueError::NotFound(submission_id));
        }
    }

    let entry = db::retry_queue::enqueue(&state.pool, submission_id, &opts)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                QueueError::NotFound(submission_id)
            }
            _ => QueueError::Database(e),
        })?;
    tracing::debug!(
        "Enqueued submission {submission_id} (priority={}, attempts={})",
        entry.priority,
        entry.attempts
    );
    Ok(entry)
}

pub async fn enqueue_bulk(
    state: &SharedState,
    submission_ids: &[Uuid],
    priority: i32,
) -> Result<u64, QueueError> {
    let opts = default_options(state, Priority::new(priority)?);
    let affected = db::retry_queue::enqueue_bulk(&state.pool, submission_ids, &opts).await?;
    tracing::debug!("Bulk enqueued {affected} submissions at priority {}", opts.priority);
    Ok(affected)
}

pub async fn set_priority(
    state: &SharedState,
    submission_id: Uuid,
    priority: i32,
) -> Result<QueueEntry, QueueError> {
    let priority = Priority::new(priority)?;
    db::retry_queue::set_priority(&state.pool, submission_id, priority)
        .await?
        .ok_or(QueueError::NotFound(submission_id))
}

pub async fn find(state: &SharedState, submission_id: Uuid) -> Result<Option<QueueEntry>, QueueError> {
    Ok(db::retry_queue::find(&state.pool, submission_id).await?)
}

/// Counts only cover entries of pending submissions, since nothing else
/// will ever be claimed.
pub async fn status(state: &SharedState) -> Result<QueueStatus, QueueError> {
    let (eligible, scheduled, claimed) = db::retry_queue::counts(&state.pool).await?;
    let exhausted = db::submissions::count_by_status(&state.pool, SubmissionStatus::Failed).await?;
    Ok(QueueStatus {
        eligible,
        scheduled,
        claimed,
        exhausted,
    })
}

pub async fn list(state: &SharedState, limit: i64, offset: i64) -> Result<Vec<QueueListing>, QueueError> {
    let limit = limit.clamp(1, MAX_LIST_LIMIT);
    let offset = offset.max(0);
    Ok(db::retry_queue::list(&state.pool, limit, offset).await?)
}
