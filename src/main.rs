use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use job_engine::handlers::CommandHandler;
use job_engine::{EngineConfig, EventKind, JobEngine, JobError};

/// One line of stdin input in JSON form. Extra fields are passed to the handler.
#[derive(Debug, Deserialize)]
struct WorkItem {
    #[serde(default)]
    id: Option<String>,
    #[serde(flatten)]
    data: serde_json::Map<String, serde_json::Value>,
}

/// Parse a stdin line into `(id, data)`. Bare text is treated as a command.
fn parse_line(line: &str) -> anyhow::Result<Option<(String, serde_json::Value)>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    if line.starts_with('{') {
        let item: WorkItem = serde_json::from_str(line).context("invalid JSON work item")?;
        let id = item.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        return Ok(Some((id, serde_json::Value::Object(item.data))));
    }

    Ok(Some((
        uuid::Uuid::new_v4().to_string(),
        serde_json::json!({ "command": line }),
    )))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = EngineConfig::from_env().context("invalid engine configuration")?;

    eprintln!("job-engine v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Name: {}", config.name);
    eprintln!("   Max concurrent: {}", config.max_concurrent);
    if let Some(timeout) = config.job_timeout {
        eprintln!("   Job timeout: {:?}", timeout);
    }
    eprintln!("   Reading work items from stdin (JSON or one command per line).\n");

    let engine = JobEngine::new(config, Arc::new(CommandHandler::new()))?;

    engine.on(EventKind::Completed, |event| {
        let job = event.job();
        tracing::info!(
            job_id = %job.id,
            elapsed_ms = job.elapsed().map(|d| d.as_millis() as u64),
            "✓ {}",
            event.kind()
        );
    });
    engine.on(EventKind::Failed, |event| {
        let job = event.job();
        let reason = job.error.as_ref().map(|e| e.message.as_str()).unwrap_or("unknown");
        tracing::warn!(job_id = %job.id, "✗ {}: {}", event.kind(), reason);
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let (id, data) = match parse_line(&line) {
            Ok(Some(item)) => item,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("Skipping line: {:#}", e);
                continue;
            }
        };

        match engine.submit(id, data).await {
            Ok(_) => {}
            Err(JobError::Duplicate { id }) => {
                eprintln!("Skipping duplicate job id {}", id);
            }
            Err(e) => return Err(e.into()),
        }
    }

    engine.wait_idle().await;

    let stats = engine.stats().await;
    tracing::info!("{}", stats);
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}
