pub mod admin;
pub mod backoff;
pub mod config;
pub mod db;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod processor;
pub mod queue;
pub mod state;

use std::sync::Arc;

use sqlx::PgPool;

use crate::backoff::BackoffPolicy;
use crate::config::QueueConfig;
use crate::delivery::DeliveryModule;
use crate::state::{AppState, SharedState};

pub use crate::dispatcher::{Dispatcher, TickReport};
pub use crate::error::QueueError;

pub fn build_state(pool: PgPool, config: QueueConfig, delivery: Arc<dyn DeliveryModule>) -> SharedState {
    let backoff = BackoffPolicy::from(&config);
    Arc::new(AppState {
        pool,
        config,
        backoff,
        delivery,
    })
}
