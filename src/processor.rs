use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db;
use crate::delivery::{DeliveryContext, DeliveryError};
use crate::error::QueueError;
use crate::models::{QueueEntry, SubmissionStatus};
use crate::state::SharedState;

/// What happened to one claimed entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Outcome {
    Delivered,
    Rescheduled {
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
    },
    Exhausted {
        attempts: i32,
    },
    /// The entry disappeared while the attempt was in flight (purged, or its
    /// submission deleted), so no outcome was recorded.
    Dropped,
}

/// Drive one claimed entry's delivery attempt to an outcome.
///
/// The attempt was already spent by `claim_batch` before this runs, so a
/// crash during delivery still counts against `max_attempts`.
pub async fn process(state: SharedState, entry: QueueEntry) -> Result<Outcome, QueueError> {
    tracing::debug!(
        "Processing submission {} (attempt {}/{}, priority={})",
        entry.submission_id,
        entry.attempts,
        entry.max_attempts,
        entry.priority
    );

    let result = match db::submissions::find_by_id(&state.pool, entry.submission_id).await? {
        Some(submission) => {
            let ctx = DeliveryContext {
                pool: &state.pool,
                submission: &submission,
                attempt: entry.attempts,
            };
            state.delivery.attempt_delivery(&ctx).await
        }
        None => Err(DeliveryError::from(format!(
            "Submission {} not found",
            entry.submission_id
        ))),
    };

    match result {
        Ok(()) => {
            db::retry_queue::remove(&state.pool, entry.submission_id).await?;
            tracing::info!(
                "Delivered submission {} via {} on attempt {}",
                entry.submission_id,
                state.delivery.id(),
                entry.attempts
            );
            Ok(Outcome::Delivered)
        }
        Err(e) => handle_failure(&state, &entry, &e.message).await,
    }
}

/// Reschedule with backoff, or exhaust the entry once it is out of attempts.
/// `entry.attempts` must already include the failed attempt.
pub async fn handle_failure(
    state: &SharedState,
    entry: &QueueEntry,
    error: &str,
) -> Result<Outcome, QueueError> {
    if entry.is_final_attempt() {
        if !exhaust(&state.pool, entry.submission_id, entry.attempts, error).await? {
            tracing::warn!(
                "Entry for submission {} was removed during its final attempt; leaving submission as is",
                entry.submission_id
            );
            return Ok(Outcome::Dropped);
        }
        tracing::error!(
            "Submission {} permanently failed after {} attempts: {error}",
            entry.submission_id,
            entry.attempts
        );
        return Ok(Outcome::Exhausted {
            attempts: entry.attempts,
        });
    }

    let delay = state
        .backoff
        .delay_for(entry.attempts.max(0) as u32, entry.backoff_multiplier);
    let next_attempt_at = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);

    let rescheduled = db::retry_queue::reschedule(
        &state.pool,
        entry.submission_id,
        entry.attempts,
        next_attempt_at,
        error,
    )
    .await?;
    if rescheduled.is_none() {
        tracing::warn!(
            "Entry for submission {} was removed during attempt {}; not rescheduling: {error}",
            entry.submission_id,
            entry.attempts
        );
        return Ok(Outcome::Dropped);
    }

    tracing::warn!(
        "Delivery of submission {} failed (attempt {}/{}), retrying in {}ms: {error}",
        entry.submission_id,
        entry.attempts,
        entry.max_attempts,
        delay.as_millis()
    );

    Ok(Outcome::Rescheduled {
        attempts: entry.attempts,
        next_attempt_at,
    })
}

pub fn exhausted_message(attempts: i32, last_error: &str) -> String {
    format!("Delivery retries exhausted after {attempts} attempts. Last error: {last_error}")
}

/// Remove the entry and mark its submission permanently failed, atomically.
/// Returns false, touching nothing, if the entry was already gone.
pub async fn exhaust(
    pool: &PgPool,
    submission_id: Uuid,
    attempts: i32,
    last_error: &str,
) -> Result<bool, QueueError> {
    let message = exhausted_message(attempts, last_error);
    let mut tx = pool.begin().await?;
    if !db::retry_queue::remove(&mut *tx, submission_id).await? {
        return Ok(false);
    }
    db::submissions::update_status(&mut *tx, submission_id, SubmissionStatus::Failed, Some(&message))
        .await?;
    tx.commit().await?;
    Ok(true)
}

/// Clear out entries that can no longer make progress.
///
/// Entries whose submission is no longer pending are dropped first, so a
/// submission delivered by a worker that died before removing its entry is
/// never overwritten to failed. Final attempts of pending submissions whose
/// worker never reported back are then exhausted.
pub async fn reap(pool: &PgPool) -> Result<u64, QueueError> {
    let inactive = db::retry_queue::delete_inactive(pool).await?;
    if inactive > 0 {
        tracing::debug!("Dropped {inactive} entries for submissions that are no longer pending");
    }

    let mut tx = pool.begin().await?;
    let stranded = db::retry_queue::take_stranded(&mut *tx).await?;
    for entry in &stranded {
        let last_error = match &entry.last_error {
            Some(e) => format!("final attempt did not complete; previous error: {e}"),
            None => "final attempt did not complete".to_string(),
        };
        let message = exhausted_message(entry.attempts, &last_error);
        db::submissions::update_status(
            &mut *tx,
            entry.submission_id,
            SubmissionStatus::Failed,
            Some(&message),
        )
        .await?;
        tracing::error!(
            "Submission {} permanently failed: final attempt never completed",
            entry.submission_id
        );
    }
    tx.commit().await?;

    Ok(inactive + stranded.len() as u64)
}
