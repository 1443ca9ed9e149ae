use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use resilientflow::config::{AppConfig, ConfigLoader};
use resilientflow::workflow::{
    run_workflow, spawn_event_writer, DisasterEvent, EventEmitter, EventType, GeoPoint,
    JsonlEventWriter, StageTable, WorkflowStatus,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, trace};
use tracing_subscriber::EnvFilter;

/// Coordinate a disaster-response workflow
#[derive(Parser)]
#[command(name = "resilientflow")]
#[command(about = "ResilientFlow - disaster-response workflow orchestration", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one workflow with the reference stages
    Run {
        /// JSON file holding a disaster event
        #[arg(long, conflicts_with_all = ["event_type", "severity"])]
        event: Option<PathBuf>,

        /// Event type (flood, fire, quake, structural, other)
        #[arg(long, required_unless_present = "event")]
        event_type: Option<EventType>,

        /// Raw severity, 0-100
        #[arg(long, required_unless_present = "event")]
        severity: Option<u8>,

        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        lon: f64,

        /// Append step events to this JSONL file
        #[arg(long)]
        event_log: Option<PathBuf>,

        /// Pretty-print the result JSON
        #[arg(long)]
        pretty: bool,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };

    init_tracing(cli.verbose, config.log_level.as_deref());

    debug!("ResilientFlow started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match cli.command {
        Commands::Run {
            event,
            event_type,
            severity,
            lat,
            lon,
            event_log,
            pretty,
        } => {
            let source = match (event, event_type, severity) {
                (Some(path), _, _) => EventSource::File(path),
                (None, Some(event_type), Some(severity)) => EventSource::Flags {
                    event_type,
                    severity,
                    location: GeoPoint::new(lat, lon),
                },
                _ => {
                    eprintln!("Error: either --event or --event-type with --severity is required");
                    std::process::exit(1);
                }
            };
            run_command(config, source, event_log, pretty).await
        }
        Commands::Config => config_command(&config),
    };

    if let Err(e) = result {
        error!("Fatal error: {}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Verbosity flags win over `RUST_LOG`, which wins over the config file
fn init_tracing(verbose: u8, configured: Option<&str>) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(configured.unwrap_or("info"))),
        1 => EnvFilter::new("debug"),
        2 => EnvFilter::new("trace"),
        _ => EnvFilter::new("trace,tokio=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose >= 2)
        .with_thread_ids(verbose >= 3)
        .with_line_number(verbose >= 3)
        .init();
}

async fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let loader = match path {
        Some(path) => ConfigLoader::new().with_path(path),
        None => ConfigLoader::new(),
    };
    loader.load().await.context("Failed to load configuration")
}

enum EventSource {
    File(PathBuf),
    Flags {
        event_type: EventType,
        severity: u8,
        location: GeoPoint,
    },
}

impl EventSource {
    async fn load(self) -> anyhow::Result<DisasterEvent> {
        match self {
            EventSource::File(path) => {
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read event file {}", path.display()))?;
                serde_json::from_str(&content)
                    .with_context(|| format!("Invalid event JSON in {}", path.display()))
            }
            EventSource::Flags {
                event_type,
                severity,
                location,
            } => Ok(DisasterEvent::new(
                format!("cli-{}", uuid::Uuid::new_v4()),
                event_type,
                location,
                severity,
            )),
        }
    }
}

async fn run_command(
    config: AppConfig,
    source: EventSource,
    event_log: Option<PathBuf>,
    pretty: bool,
) -> anyhow::Result<()> {
    let event = source.load().await?;

    let emitter = Arc::new(EventEmitter::with_retention(config.events.retain));
    let stages = StageTable::reference(&config.stages);

    let result = run_workflow(&event, &config.workflow, stages, emitter.clone()).await?;

    if let Some(path) = event_log.or(config.events.log_file) {
        let writer = JsonlEventWriter::new(&path).await?;
        let recorded = emitter.len();
        spawn_event_writer(emitter.subscribe(None).take(recorded), writer)
            .await
            .context("Event writer task failed")?;
        info!("Wrote {} step events to {}", recorded, path.display());
    }

    let rendered = if pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{rendered}");

    let summary = result.summary();
    eprintln!(
        "workflow {} {}: severity {}, {} resources, {} alerts, {} reports, {} error(s) in {}ms",
        summary.workflow_id,
        summary.status,
        summary
            .overall_severity
            .map(|s| s.to_string())
            .unwrap_or_else(|| "n/a".to_string()),
        summary.resources_allocated,
        summary.alerts_sent,
        summary.reports_generated,
        summary.error_count,
        summary.duration_ms
    );

    if summary.status == WorkflowStatus::Failed {
        std::process::exit(2);
    }
    Ok(())
}

fn config_command(config: &AppConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}
