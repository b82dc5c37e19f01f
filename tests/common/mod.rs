use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use submission_queue::config::QueueConfig;
use submission_queue::db;
use submission_queue::delivery::{DeliveryContext, DeliveryError, DeliveryModule};
use submission_queue::models::{Submission, SubmissionStatus};
use submission_queue::state::SharedState;

/// What the scripted transport does on its next attempt for a submission.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum Step {
    Succeed,
    Fail(&'static str),
    Panic,
}

/// In-test delivery collaborator. Follows a per-submission script and falls
/// back to `default` once the script runs out.
pub struct ScriptedDelivery {
    scripts: Mutex<HashMap<Uuid, VecDeque<Step>>>,
    default: Step,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedDelivery {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self::with_default(Step::Succeed))
    }

    pub fn failing(error: &'static str) -> Arc<Self> {
        Arc::new(Self::with_default(Step::Fail(error)))
    }

    fn with_default(default: Step) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn script(&self, submission_id: Uuid, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(submission_id, steps.into());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self, submission_id: Uuid) -> Step {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&submission_id)
            .and_then(|steps| steps.pop_front())
            .unwrap_or_else(|| self.default.clone())
    }
}

#[async_trait]
impl DeliveryModule for ScriptedDelivery {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn attempt_delivery(&self, ctx: &DeliveryContext<'_>) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_step(ctx.submission.id) {
            Step::Succeed => {
                db::submissions::update_status(
                    ctx.pool,
                    ctx.submission.id,
                    SubmissionStatus::Submitted,
                    None,
                )
                .await
                .map_err(|e| DeliveryError::from(e.to_string()))?;
                Ok(())
            }
            Step::Fail(msg) => Err(DeliveryError::from(msg)),
            Step::Panic => panic!("scripted delivery panic"),
        }
    }
}

/// A queue wired to a dedicated test database.
#[allow(dead_code)]
pub struct TestQueue {
    pub state: SharedState,
    pub delivery: Arc<ScriptedDelivery>,
    pub db_name: String,
}

#[allow(dead_code)]
impl TestQueue {
    pub fn pool(&self) -> &PgPool {
        &self.state.pool
    }

    pub async fn create_submission(&self) -> Submission {
        db::submissions::create(
            self.pool(),
            "https://letters.example.test/inbox",
            &json!({ "letter": "To whom it may concern" }),
        )
        .await
        .expect("create submission failed")
    }

    pub async fn create_failed_submission(&self) -> Submission {
        let submission = self.create_submission().await;
        db::submissions::update_status(
            self.pool(),
            submission.id,
            SubmissionStatus::Failed,
            Some("Delivery retries exhausted after 5 attempts. Last error: boom"),
        )
        .await
        .expect("mark failed")
        .expect("submission exists")
    }

    pub async fn submission(&self, id: Uuid) -> Submission {
        db::submissions::find_by_id(self.pool(), id)
            .await
            .expect("find submission failed")
            .expect("submission missing")
    }

    /// Pull an entry's `scheduled_at` into the past so it can be claimed.
    pub async fn make_due(&self, submission_id: Uuid) {
        sqlx::query(
            "UPDATE submission_queue SET scheduled_at = now() - interval '1 second'
             WHERE submission_id = $1",
        )
        .bind(submission_id)
        .execute(self.pool())
        .await
        .expect("make_due failed");
    }

    pub async fn entry_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM submission_queue")
            .fetch_one(self.pool())
            .await
            .expect("count failed")
    }
}

fn admin_url(base_url: &str) -> String {
    base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/postgres"))
        .unwrap_or_else(|| base_url.to_string())
}

/// Build a queue over a fresh temporary database.
pub async fn spawn_queue(delivery: Arc<ScriptedDelivery>) -> TestQueue {
    spawn_queue_with(delivery, QueueConfig::default()).await
}

#[allow(dead_code)]
pub async fn spawn_queue_with(delivery: Arc<ScriptedDelivery>, config: QueueConfig) -> TestQueue {
    let _ = dotenvy::dotenv();

    let base_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let db_name = format!("submission_queue_test_{}", Uuid::now_v7().simple());

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&admin_url(&base_url))
        .await
        .expect("Failed to connect to postgres for test DB creation");

    sqlx::query(&format!("CREATE DATABASE \"{db_name}\""))
        .execute(&admin_pool)
        .await
        .expect("Failed to create test database");

    admin_pool.close().await;

    let test_url = base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/{db_name}"))
        .unwrap_or_else(|| base_url.clone());

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&test_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations on test database");

    let state = submission_queue::build_state(pool, config, delivery.clone());

    TestQueue {
        state,
        delivery,
        db_name,
    }
}

/// Drop the test database after a test completes.
pub async fn cleanup(queue: TestQueue) {
    let db_name = queue.db_name.clone();
    queue.state.pool.close().await;

    let base_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&admin_url(&base_url))
        .await
        .expect("Failed to connect for cleanup");

    let _ = sqlx::query(&format!("DROP DATABASE IF EXISTS \"{db_name}\" WITH (FORCE)"))
        .execute(&admin_pool)
        .await;

    admin_pool.close().await;
}
