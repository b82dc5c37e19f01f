use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::models::{Submission, SubmissionStatus};

pub async fn create(
    pool: &PgPool,
    destination: &str,
    payload: &serde_json::Value,
) -> Result<Submission, sqlx::Error> {
    sqlx::query_as::<_, Submission>(
        "INSERT INTO submissions (destination, payload)
         VALUES ($1, $2) RETURNING *",
    )
    .bind(destination)
    .bind(payload)
    .fetch_one(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>("SELECT * FROM submissions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Set a submission's status and error text. `submitted_at` is stamped the
/// first time a submission leaves `pending` successfully.
pub async fn update_status<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
    status: SubmissionStatus,
    error_message: Option<&str>,
) -> Result<Option<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(
        "UPDATE submissions
         SET status = $2,
             error_message = $3,
             submitted_at = CASE
                 WHEN $2 IN ('submitted', 'confirmed') THEN COALESCE(submitted_at, now())
                 ELSE submitted_at
             END,
             updated_at = now()
         WHERE id = $1
         RETURNING *",
    )
    .bind(id)
    .bind(status.as_str())
    .bind(error_message)
    .fetch_optional(executor)
    .await
}

/// Move every failed submission back to pending and clear its error.
/// Returns the ids that were reset.
pub async fn reset_all_failed<'e>(executor: impl PgExecutor<'e>) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        "UPDATE submissions
         SET status = 'pending', error_message = NULL, updated_at = now()
         WHERE status = 'failed'
         RETURNING id",
    )
    .fetch_all(executor)
    .await
}

pub async fn count_by_status(pool: &PgPool, status: SubmissionStatus) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM submissions WHERE status = $1")
        .bind(status.as_str())
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}
