use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::models::{EnqueueOptions, Priority, QueueEntry, QueueListing};

/// Insert an entry, or on conflict bump its priority and make it due now.
/// `max_attempts` and `backoff_multiplier` only apply to fresh inserts.
/// An outstanding claim lease is left in place.
pub async fn enqueue<'e>(
    executor: impl PgExecutor<'e>,
    submission_id: Uuid,
    opts: &EnqueueOptions,
) -> Result<QueueEntry, sqlx::Error> {
    sqlx::query_as::<_, QueueEntry>(
        "INSERT INTO submission_queue (submission_id, priority, max_attempts, backoff_multiplier)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (submission_id) DO UPDATE
         SET priority = EXCLUDED.priority,
             scheduled_at = now(),
             updated_at = now()
         RETURNING *",
    )
    .bind(submission_id)
    .bind(opts.priority.get())
    .bind(opts.max_attempts)
    .bind(opts.backoff_multiplier)
    .fetch_one(executor)
    .await
}

/// Set-based `enqueue` in a single statement. Duplicate ids are collapsed and
/// ids without a pending submission are skipped. Returns the number of rows
/// inserted or updated.
pub async fn enqueue_bulk<'e>(
    executor: impl PgExecutor<'e>,
    submission_ids: &[Uuid],
    opts: &EnqueueOptions,
) -> Result<u64, sqlx::Error> {
    if submission_ids.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query(
        "INSERT INTO submission_queue (submission_id, priority, max_attempts, backoff_multiplier)
         SELECT DISTINCT s.id, $2::integer, $3::integer, $4::double precision
         FROM UNNEST($1::uuid[]) AS t(id)
         JOIN submissions s ON s.id = t.id AND s.status = 'pending'
         ON CONFLICT (submission_id) DO UPDATE
         SET priority = EXCLUDED.priority,
             scheduled_at = now(),
             updated_at = now()",
    )
    .bind(submission_ids)
    .bind(opts.priority.get())
    .bind(opts.max_attempts)
    .bind(opts.backoff_multiplier)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Atomically claim up to `limit` due entries using SELECT FOR UPDATE SKIP LOCKED.
///
/// The same statement spends one attempt and sets `claimed_until` to
/// `now + lease`, so a claimed entry stays invisible to other claimants after
/// the row lock is released, even if it is re-enqueued meanwhile. It becomes
/// claimable again if its worker never reports back before the lease ends.
/// Entries are returned in claim order: priority, then due time.
pub async fn claim_batch(
    pool: &PgPool,
    limit: i64,
    lease: Duration,
) -> Result<Vec<QueueEntry>, sqlx::Error> {
    let mut entries = sqlx::query_as::<_, QueueEntry>(
        "WITH claimed AS (
             SELECT q.id
             FROM submission_queue q
             JOIN submissions s ON s.id = q.submission_id
             WHERE q.scheduled_at <= now()
               AND (q.claimed_until IS NULL OR q.claimed_until <= now())
               AND q.attempts < q.max_attempts
               AND s.status = 'pending'
             ORDER BY q.priority ASC, q.scheduled_at ASC
             LIMIT $1
             FOR UPDATE OF q SKIP LOCKED
         )
         UPDATE submission_queue q
         SET attempts = q.attempts + 1,
             claimed_until = now() + make_interval(secs => $2::double precision),
             updated_at = now()
         FROM claimed
         WHERE q.id = claimed.id
         RETURNING q.*",
    )
    .bind(limit)
    .bind(lease.as_secs_f64())
    .fetch_all(pool)
    .await?;

    entries.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(a.scheduled_at.cmp(&b.scheduled_at))
    });
    Ok(entries)
}

pub async fn find(pool: &PgPool, submission_id: Uuid) -> Result<Option<QueueEntry>, sqlx::Error> {
    sqlx::query_as::<_, QueueEntry>("SELECT * FROM submission_queue WHERE submission_id = $1")
        .bind(submission_id)
        .fetch_optional(pool)
        .await
}

/// Returns true if an entry was deleted.
pub async fn remove<'e>(executor: impl PgExecutor<'e>, submission_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM submission_queue WHERE submission_id = $1")
        .bind(submission_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Record a failed attempt and release the claim.
pub async fn reschedule(
    pool: &PgPool,
    submission_id: Uuid,
    attempts: i32,
    scheduled_at: DateTime<Utc>,
    error: &str,
) -> Result<Option<QueueEntry>, sqlx::Error> {
    sqlx::query_as::<_, QueueEntry>(
        "UPDATE submission_queue
         SET attempts = $2,
             scheduled_at = $3,
             last_error = $4,
             claimed_until = NULL,
             updated_at = now()
         WHERE submission_id = $1
         RETURNING *",
    )
    .bind(submission_id)
    .bind(attempts)
    .bind(scheduled_at)
    .bind(error)
    .fetch_optional(pool)
    .await
}

pub async fn set_priority(
    pool: &PgPool,
    submission_id: Uuid,
    priority: Priority,
) -> Result<Option<QueueEntry>, sqlx::Error> {
    sqlx::query_as::<_, QueueEntry>(
        "UPDATE submission_queue SET priority = $2, updated_at = now()
         WHERE submission_id = $1
         RETURNING *",
    )
    .bind(submission_id)
    .bind(priority.get())
    .fetch_optional(pool)
    .await
}

/// (eligible, scheduled, claimed) counts over entries whose submission is
/// still pending, using the same predicates as `claim_batch`.
pub async fn counts(pool: &PgPool) -> Result<(i64, i64, i64), sqlx::Error> {
    sqlx::query_as(
        "SELECT
             COUNT(*) FILTER (
                 WHERE q.scheduled_at <= now()
                   AND (q.claimed_until IS NULL OR q.claimed_until <= now())
                   AND q.attempts < q.max_attempts
             ),
             COUNT(*) FILTER (
                 WHERE q.scheduled_at > now()
                   AND (q.claimed_until IS NULL OR q.claimed_until <= now())
                   AND q.attempts < q.max_attempts
             ),
             COUNT(*) FILTER (WHERE q.claimed_until > now())
         FROM submission_queue q
         JOIN submissions s ON s.id = q.submission_id
         WHERE s.status = 'pending'",
    )
    .fetch_one(pool)
    .await
}

pub async fn list(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<QueueListing>, sqlx::Error> {
    sqlx::query_as::<_, QueueListing>(
        "SELECT q.*, s.destination, s.status AS submission_status
         FROM submission_queue q
         JOIN submissions s ON s.id = q.submission_id
         ORDER BY q.priority ASC, q.scheduled_at ASC
         LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn purge(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM submission_queue").execute(pool).await?;
    Ok(result.rows_affected())
}

/// Delete entries of pending submissions that used their last attempt and
/// whose claim ran out without an outcome being recorded. Returns the deleted rows.
pub async fn take_stranded<'e>(executor: impl PgExecutor<'e>) -> Result<Vec<QueueEntry>, sqlx::Error> {
    sqlx::query_as::<_, QueueEntry>(
        "DELETE FROM submission_queue
         WHERE id IN (
             SELECT q.id FROM submission_queue q
             JOIN submissions s ON s.id = q.submission_id
             WHERE q.attempts >= q.max_attempts
               AND (q.claimed_until IS NULL OR q.claimed_until <= now())
               AND s.status = 'pending'
             FOR UPDATE OF q SKIP LOCKED
         )
         RETURNING *",
    )
    .fetch_all(executor)
    .await
}

/// Delete entries whose submission is no longer pending, e.g. delivered by
/// a worker that died before removing its entry.
pub async fn delete_inactive(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM submission_queue q
         USING submissions s
         WHERE s.id = q.submission_id
           AND s.status <> 'pending'",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
