pub mod webhook;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::Submission;

/// Everything a delivery attempt gets to see.
pub struct DeliveryContext<'a> {
    pub pool: &'a PgPool,
    pub submission: &'a Submission,
    pub attempt: i32,
}

#[derive(Debug)]
pub struct DeliveryError {
    pub message: String,
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DeliveryError {}

impl From<String> for DeliveryError {
    fn from(s: String) -> Self {
        DeliveryError { message: s }
    }
}

impl From<&str> for DeliveryError {
    fn from(s: &str) -> Self {
        DeliveryError {
            message: s.to_string(),
        }
    }
}

/// Transport for a submission. Implementations own all transport-specific
/// logic, and on success are responsible for moving the submission past
/// `pending`. The queue treats every `Err` the same way.
#[async_trait]
pub trait DeliveryModule: Send + Sync {
    fn id(&self) -> &str;
    async fn attempt_delivery(&self, ctx: &DeliveryContext<'_>) -> Result<(), DeliveryError>;
}
