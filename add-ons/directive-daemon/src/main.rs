//! Directive daemon
//!
//! Reads orders (one JSON payload per line) and operator commands from stdin and prints one
//! JSON result per line to stdout. Logs go to stderr. See `commands.rs` for the line protocol.

mod commands;

use commands::Command;
use directive_core::{
    ContextAggregator, DecisionPipeline, DirectiveConfig, SourceAggregator, StaticAggregator,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[directive-daemon] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "directive daemon failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), BoxError> {
    let config = DirectiveConfig::load()?;

    let aggregator: Arc<dyn ContextAggregator> = match &config.context_path {
        Some(path) => Arc::new(StaticAggregator::from_path(path)?),
        None => Arc::new(SourceAggregator::new().with_timeout(config.context_timeout())),
    };
    let pipeline = Arc::new(DecisionPipeline::from_config(&config, aggregator)?);

    tracing::info!(
        storage_path = %config.storage_path,
        max_concurrent_orders = config.max_concurrent_orders,
        approval_mode = ?config.approval_mode,
        "Directive daemon started"
    );

    // Results are written by one task so concurrent evaluations never interleave lines.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let limit = Arc::new(Semaphore::new(config.max_concurrent_orders));
    let mut in_flight = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // The reader never waits on an order, so operator commands stay answerable while every
    // permit is held by an order parked on an approval.
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    tracing::info!("stdin closed; draining in-flight orders");
                    break;
                };
                match commands::parse(&line) {
                    Ok(Some(cmd)) => handle(cmd, &pipeline, &limit, &out_tx, &mut in_flight).await,
                    Ok(None) => {}
                    Err(e) => {
                        let _ = out_tx.send(json!({ "error": e }).to_string());
                    }
                }
            }
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL-C received; shutting down daemon");
                break;
            }
        }
    }

    // Nobody can answer an approval once stdin is gone, so parked approvals are declined
    // until every order has finished.
    while !in_flight.is_empty() {
        if let Some(bridge) = pipeline.approval_bridge() {
            let declined = bridge.decline_all().await;
            if declined > 0 {
                tracing::warn!(declined, "Declined approvals left unanswered at shutdown");
            }
        }
        tokio::select! {
            _ = in_flight.join_next() => {}
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
    }
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

async fn handle(
    cmd: Command,
    pipeline: &Arc<DecisionPipeline>,
    limit: &Arc<Semaphore>,
    out: &mpsc::UnboundedSender<String>,
    in_flight: &mut JoinSet<()>,
) {
    match cmd {
        Command::Process(payload) => {
            let pipeline = Arc::clone(pipeline);
            let limit = Arc::clone(limit);
            let out = out.clone();
            in_flight.spawn(async move {
                let Ok(_permit) = limit.acquire_owned().await else {
                    return;
                };
                let line = match pipeline.process(&payload).await.map(|d| d.to_json()) {
                    Ok(Ok(decision)) => decision.to_string(),
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "Decision serialization failed");
                        json!({ "error": format!("decision serialization failed: {}", e) }).to_string()
                    }
                    Err(e) => json!({ "error": e.to_string() }).to_string(),
                };
                let _ = out.send(line);
            });
        }
        Command::Correct {
            fingerprint,
            user,
            decision,
        } => {
            let line = match pipeline.correct(&fingerprint, decision, &user) {
                Ok(record) => json!({ "ack": true, "fingerprint": record.fingerprint, "timestamp": record.timestamp }),
                Err(e) => json!({ "error": e.to_string() }),
            };
            let _ = out.send(line.to_string());
        }
        Command::Get(fingerprint) => {
            let line = match pipeline.get_correction(&fingerprint) {
                Ok(record) => serde_json::to_value(record).unwrap_or(serde_json::Value::Null),
                Err(e) => json!({ "error": e.to_string() }),
            };
            let _ = out.send(line.to_string());
        }
        Command::Respond { id, approved } => {
            let answered = match pipeline.approval_bridge() {
                Some(bridge) => bridge.respond(&id, approved).await,
                None => false,
            };
            let _ = out.send(json!({ "approval_id": id, "approved": approved, "answered": answered }).to_string());
        }
        Command::Pending => {
            let pending = match pipeline.approval_bridge() {
                Some(bridge) => bridge.pending().await,
                None => Vec::new(),
            };
            let _ = out.send(json!({ "pending": pending }).to_string());
        }
        Command::Laws => {
            let _ = out.send(json!({ "laws": pipeline.summaries() }).to_string());
        }
    }
}
