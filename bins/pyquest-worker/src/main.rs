mod executor;

use anyhow::Context;
use pyquest_common::config::EvaluatorConfig;
use pyquest_common::redis;
use pyquest_evaluator::{Evaluator, RedisProgressStore};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, instrument, warn};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    // PYQUEST_LOG_FORMAT=json for log shippers
    match std::env::var("PYQUEST_LOG_FORMAT").as_deref() {
        Ok("json") => builder.json().init(),
        _ => builder.init(),
    }
}

fn load_config() -> anyhow::Result<EvaluatorConfig> {
    let config = match std::env::var("PYQUEST_CONFIG") {
        Ok(path) => EvaluatorConfig::load(Path::new(&path))?,
        Err(_) => EvaluatorConfig::load_default()?,
    };
    config.apply_env()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("PyQuest worker booting...");

    let config = load_config().map_err(|e| {
        error!("Failed to load evaluator configuration: {:#}", e);
        e
    })?;
    info!(
        backend = %config.backend,
        timeout_ms = config.timeout_ms,
        assets_dir = %config.assets_dir.display(),
        "Configuration loaded"
    );

    // Connect to Redis
    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

    let client = ::redis::Client::open(redis_url.as_str())?;
    let mut redis_conn = ::redis::aio::ConnectionManager::new(client)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", redis_url))?;

    info!("Connected to Redis: {}", redis_url);

    let store = Arc::new(RedisProgressStore::new(redis_conn.clone()));
    let evaluator = Evaluator::from_config(&config, store)?;

    // The interpreter boots once; nothing can be evaluated without it
    match evaluator.initialize().await {
        Ok(banner) => info!(banner = %banner, "Interpreter ready"),
        Err(e) => {
            error!(error = %e, "Interpreter failed to boot");
            std::process::exit(1);
        }
    }

    // Setup graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
        warn!("Received shutdown signal, draining queue...");
    };

    tokio::select! {
        _ = worker_loop(&mut redis_conn, &evaluator) => {},
        _ = shutdown => {},
    }

    info!("Worker shutdown complete");
    Ok(())
}

#[instrument(skip_all)]
async fn worker_loop(redis_conn: &mut ::redis::aio::ConnectionManager, evaluator: &Evaluator) {
    loop {
        // BLPOP with 5 second timeout for graceful shutdown
        match redis::pop_submission(redis_conn, 5.0).await {
            Ok(Some(submission)) => {
                info!(
                    submission_id = %submission.id,
                    lesson_id = %submission.lesson_id,
                    section_id = %submission.section.id(),
                    kind = submission.section.kind(),
                    source_size = submission.input.source.len(),
                    "Received submission"
                );

                let outcome = executor::process_submission(evaluator, &submission).await;

                // Persist outcome to Redis
                match redis::store_outcome(redis_conn, &outcome).await {
                    Ok(_) => {
                        info!(submission_id = %outcome.submission_id, "Outcome persisted to Redis");
                    }
                    Err(e) => {
                        error!(submission_id = %outcome.submission_id, error = %e, "Failed to persist outcome");
                        // Non-fatal - worker continues
                    }
                }
            }
            Ok(None) => {
                // Timeout - check for shutdown
                continue;
            }
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            }
        }
    }
}
