use std::sync::Arc;

use sqlx::PgPool;

use crate::backoff::BackoffPolicy;
use crate::config::QueueConfig;
use crate::delivery::DeliveryModule;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub pool: PgPool,
    pub config: QueueConfig,
    pub backoff: BackoffPolicy,
    pub delivery: Arc<dyn DeliveryModule>,
}
