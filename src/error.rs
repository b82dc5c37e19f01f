use uuid::Uuid;

use crate::models::SubmissionStatus;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Invalid priority {0}: must be between 1 and 10")]
    InvalidPriority(i32),
    #[error("Invalid enqueue options: {0}")]
    InvalidOptions(String),
    #[error("No queue entry or submission found for {0}")]
    NotFound(Uuid),
    #[error("Submission {id} is {status}; only pending submissions can be queued")]
    NotPending { id: Uuid, status: SubmissionStatus },
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
