use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use submission_queue::config::Config;
use submission_queue::delivery::webhook::WebhookDelivery;
use submission_queue::state::SharedState;
use submission_queue::{Dispatcher, admin, queue};

#[derive(Parser, Debug)]
#[command(name = "submission-queue", about = "Retry queue for submission delivery")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the dispatcher until Ctrl+C / SIGTERM.
    Run {
        /// Override QUEUE_DISPATCH_INTERVAL_MS.
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Queue a submission (or re-prioritise an existing entry).
    Enqueue {
        submission_id: Uuid,
        #[arg(long, default_value_t = 5)]
        priority: i32,
    },
    /// Reset a submission to pending and queue it at elevated priority.
    Retry {
        submission_id: Uuid,
        #[arg(long)]
        priority: Option<i32>,
    },
    /// Reset and queue every permanently failed submission.
    RetryFailed,
    /// Change the priority of a queued submission.
    SetPriority { submission_id: Uuid, priority: i32 },
    /// Print queue counts.
    Status,
    /// List queue entries in claim order.
    List {
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Delete every queue entry.
    Purge {
        /// Required; purge is destructive.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::debug!("Migrations applied");

    let delivery = Arc::new(WebhookDelivery::new(config.queue.delivery_timeout)?);
    let state = submission_queue::build_state(pool, config.queue.clone(), delivery);

    match cli.command.unwrap_or(Command::Run { interval_ms: None }) {
        Command::Run { interval_ms } => {
            let interval = interval_ms
                .map(Duration::from_millis)
                .unwrap_or(state.config.dispatch_interval);
            run_dispatcher(state, interval).await;
        }
        Command::Enqueue {
            submission_id,
            priority,
        } => print_json(&queue::enqueue(&state, submission_id, priority).await?)?,
        Command::Retry {
            submission_id,
            priority,
        } => print_json(&admin::retry_submission(&state, submission_id, priority).await?)?,
        Command::RetryFailed => {
            let count = admin::retry_all_failed(&state).await?;
            print_json(&serde_json::json!({ "retried": count }))?;
        }
        Command::SetPriority {
            submission_id,
            priority,
        } => print_json(&admin::set_priority(&state, submission_id, priority).await?)?,
        Command::Status => print_json(&admin::status(&state).await?)?,
        Command::List { limit, offset } => print_json(&admin::list(&state, limit, offset).await?)?,
        Command::Purge { yes } => {
            if !yes {
                return Err("Refusing to purge without --yes".into());
            }
            let removed = admin::purge(&state).await?;
            print_json(&serde_json::json!({ "removed": removed }))?;
        }
    }

    Ok(())
}

async fn run_dispatcher(state: SharedState, interval: Duration) {
    tracing::info!("Starting submission queue dispatcher");

    let dispatcher = Dispatcher::new(state);
    dispatcher.start(interval);

    shutdown_signal().await;

    // In-flight attempts are not awaited; their leases expire and they are
    // picked up again by the next dispatcher.
    dispatcher.stop();
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping dispatcher");
}
