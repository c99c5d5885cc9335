use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use courier_core::app::{DeliveryConfig, OrchestratorBuilder};
use courier_core::domain::{Payload, Priority, SettingValue, SubmitOptions, payload};
use courier_core::impls::{
    HttpTransport, JsonFileSnapshotStore, RotatingAuthProvider, SimulatedTransport, StaticAuthProvider,
};
use courier_core::ports::{ChannelEventSink, SnapshotStore};

#[derive(Parser)]
#[command(name = "courier", about = "Reliable request delivery to a settings endpoint")]
struct Cli {
    /// JSON config file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deliver one request to an HTTP endpoint
    Send {
        #[arg(long)]
        endpoint: String,
        #[arg(long)]
        action: String,
        /// Flat JSON object, e.g. '{"menu_bg":"#000"}'
        #[arg(long, default_value = "{}")]
        payload: String,
        #[arg(long, env = "COURIER_TOKEN")]
        token: String,
        #[arg(long, value_parser = parse_priority, default_value = "normal")]
        priority: Priority,
        /// Queue snapshot file; pending work survives a restart
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Drive the pipeline against a simulated endpoint
    Simulate {
        #[arg(long, default_value_t = 20)]
        count: usize,
        /// Distinct setting keys; fewer keys means more supersession
        #[arg(long, default_value_t = 5)]
        keys: usize,
        #[arg(long, default_value_t = 0.2)]
        failure_rate: f64,
        #[arg(long, default_value_t = 50)]
        latency_ms: u64,
        /// Print every lifecycle event as a JSON line
        #[arg(long)]
        events: bool,
    },
    /// Print a saved queue snapshot
    Snapshot {
        #[arg(long)]
        path: PathBuf,
    },
}

fn parse_priority(s: &str) -> Result<Priority, String> {
    match s.to_ascii_lowercase().as_str() {
        "high" => Ok(Priority::High),
        "normal" => Ok(Priority::Normal),
        "low" => Ok(Priority::Low),
        other => Err(format!("unknown priority '{other}' (high|normal|low)")),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<DeliveryConfig> {
    let config = match path {
        Some(p) => DeliveryConfig::from_json_file(p)?,
        None => DeliveryConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Send {
            endpoint,
            action,
            payload,
            token,
            priority,
            state,
        } => send(config, endpoint, action, &payload, token, priority, state).await,
        Command::Simulate {
            count,
            keys,
            failure_rate,
            latency_ms,
            events,
        } => simulate(config, count, keys, failure_rate, latency_ms, events).await,
        Command::Snapshot { path } => show_snapshot(path),
    }
}

async fn send(
    config: DeliveryConfig,
    endpoint: String,
    action: String,
    raw_payload: &str,
    token: String,
    priority: Priority,
    state: Option<PathBuf>,
) -> Result<()> {
    let body: Payload = serde_json::from_str(raw_payload).context("payload must be a flat JSON object")?;
    let transport = HttpTransport::new(endpoint, config.request_timeout())?;

    let mut builder = OrchestratorBuilder::new(config)
        .transport(Arc::new(transport))
        .auth(Arc::new(StaticAuthProvider::new(token)));
    if let Some(path) = state {
        builder = builder.snapshot_store(Arc::new(JsonFileSnapshotStore::new(path)));
    }
    let orchestrator = builder.build()?;

    let handle = orchestrator.submit(action, body, SubmitOptions::default().priority(priority));
    let request_id = handle.request_id();
    info!(%request_id, "submitted");

    let result = tokio::select! {
        result = handle => result,
        _ = tokio::signal::ctrl_c() => {
            orchestrator.shutdown();
            orchestrator.flush().await;
            warn!(%request_id, "interrupted; request left in the queue snapshot");
            return Ok(());
        }
    };
    orchestrator.flush().await;

    match result {
        Ok(data) => {
            println!("{}", serde_json::to_string_pretty(&data)?);
            Ok(())
        }
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&e)?);
            bail!("delivery failed: {e}")
        }
    }
}

async fn simulate(
    config: DeliveryConfig,
    count: usize,
    keys: usize,
    failure_rate: f64,
    latency_ms: u64,
    print_events: bool,
) -> Result<()> {
    if keys == 0 {
        bail!("--keys must be at least 1");
    }
    let (sink, mut rx) = ChannelEventSink::new();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if print_events && let Ok(line) = serde_json::to_string(&event) {
                println!("{line}");
            }
        }
    });

    let orchestrator = OrchestratorBuilder::new(config)
        .transport(Arc::new(SimulatedTransport::new(
            failure_rate,
            Duration::from_millis(latency_ms),
        )))
        .auth(Arc::new(RotatingAuthProvider::new("sim")))
        .event_sink(Arc::new(sink))
        .build()?;

    let handles: Vec<_> = (0..count)
        .map(|i| {
            orchestrator.submit(
                "save-settings",
                payload([(format!("setting_{}", i % keys), SettingValue::from(i as i64))]),
                SubmitOptions::default(),
            )
        })
        .collect();

    let (mut ok, mut failed) = (0usize, 0usize);
    for handle in handles {
        match handle.await {
            Ok(_) => ok += 1,
            Err(_) => failed += 1,
        }
    }
    info!(ok, failed, "simulation finished");

    orchestrator.shutdown();
    orchestrator.flush().await;
    println!("{}", serde_json::to_string_pretty(&orchestrator.metrics())?);
    drop(orchestrator);
    printer.abort();
    Ok(())
}

fn show_snapshot(path: PathBuf) -> Result<()> {
    let store = JsonFileSnapshotStore::new(&path);
    match store.load()? {
        Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        None => println!("no snapshot at {}", path.display()),
    }
    Ok(())
}
