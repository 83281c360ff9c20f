use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use sensorwatch::config::{LogFormat, LoggingConfig, MonitorConfig};
use sensorwatch::detect::{AlarmRecord, Engine, Evaluation};

#[derive(Parser)]
#[command(
    name = "sensorwatch",
    about = "Liveness and threshold-violation alarms for remote instrumentation",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML). Defaults to $SENSORWATCH_CONFIG or /etc/sensorwatch/sensorwatch.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one saved LoadData response
    Evaluate {
        /// Path to the JSON response
        #[arg(long)]
        payload: PathBuf,

        /// Device id to use instead of the analysis ID in the payload
        #[arg(long)]
        device_id: Option<String>,

        /// Evaluation time (defaults to the current time)
        #[arg(long)]
        now: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Evaluate every analysis in a multi-project export
    Batch {
        /// Path to the export JSON
        #[arg(long)]
        export: PathBuf,

        /// Devices evaluated concurrently (overrides runner.workers)
        #[arg(long)]
        workers: Option<usize>,

        /// Evaluation time (defaults to the current time)
        #[arg(long)]
        now: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    ShowConfig,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn parse_now(raw: Option<&str>) -> Result<DateTime<Utc>> {
    match raw {
        Some(raw) => sensorwatch::timestamp::normalize_str(raw)
            .with_context(|| format!("invalid --now value: {raw}")),
        None => Ok(Utc::now()),
    }
}

fn print_alarms(alarms: &[AlarmRecord]) {
    if alarms.is_empty() {
        println!("No alarms.");
        return;
    }
    println!(
        "{:<12} | {:<24} | {:<25} | Description",
        "Device", "Type", "Issue start"
    );
    println!("{:-<12}-|-{:-<24}-|-{:-<25}-|-{:-<40}", "", "", "", "");
    for alarm in alarms {
        let mut lines = alarm.description.lines();
        println!(
            "{:<12} | {:<24} | {:<25} | {}",
            alarm.device_id,
            alarm.alarm_type.to_string(),
            alarm.issue_start_time.to_rfc3339(),
            lines.next().unwrap_or_default()
        );
        for line in lines {
            println!("{:<12} | {:<24} | {:<25} | {}", "", "", "", line);
        }
    }
}

fn print_evaluation(evaluation: &Evaluation) {
    let status = &evaluation.status;
    println!(
        "\n=== {} ({}) ===",
        evaluation.device_name.as_deref().unwrap_or("unnamed analysis"),
        evaluation.device_id
    );
    println!(
        "Sensors: {} running, {} down, {} unknown | Violations: {} | Skipped input: {}",
        status.running_count,
        status.down_count,
        status.unknown_count,
        evaluation.violations.len(),
        evaluation.diagnostics.total()
    );
    for sensor in &status.sensors {
        println!(
            " - {:<20} {:<8} {}",
            sensor.sensor_name, sensor.status.to_string(), sensor.reason
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => MonitorConfig::load(path)?,
        None => MonitorConfig::load_or_default(),
    };
    init_tracing(&config.logging);
    config.validate()?;
    let engine = Engine::new(config.engine_config());

    match cli.command {
        Commands::Evaluate {
            payload,
            device_id,
            now,
            json,
        } => {
            let now = parse_now(now.as_deref())?;
            tracing::info!(payload = %payload.display(), %now, "Evaluating payload");
            let evaluation =
                sensorwatch::evaluate_file(&engine, &payload, device_id.as_deref(), now)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&evaluation)?);
            } else {
                print_evaluation(&evaluation);
                println!();
                print_alarms(&evaluation.alarms);
            }
        }
        Commands::Batch {
            export,
            workers,
            now,
            json,
        } => {
            let now = parse_now(now.as_deref())?;
            let workers = workers.unwrap_or(config.runner.workers);
            let report =
                sensorwatch::evaluate_export(Arc::new(engine), &export, workers, now).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for evaluation in &report.evaluations {
                    print_evaluation(evaluation);
                }
                for failure in &report.failures {
                    println!("\n!!! {}: {}", failure.label, failure.error);
                }
                println!("\n=== Alarms ({}) ===", config.recency);
                print_alarms(&report.alarms);
            }
        }
        Commands::ShowConfig => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
