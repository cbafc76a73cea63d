//! Command-line interface for the `pbars` operations harness.
//!
//! The real ingest transport (HTTP, gRPC, whatever a deployment fronts this
//! core with) is out of scope per spec §1 — these two subcommands exist so a
//! developer can exercise intake, sampling, and prediction locally without
//! standing up that transport.

use clap::{Parser, Subcommand};

use crate::config::{Config, ConfigSource};
use crate::runtime::Runtime;

#[derive(Parser)]
#[command(name = "pbars")]
#[command(about = "Local operations harness for the progress-bar telemetry prediction core")]
#[command(version)]
pub struct Cli {
    /// Increase log verbosity (overridden by `PBARS_LOG` if set).
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Wire up the in-memory demo stack and drive a batch of synthetic traces
    /// through intake, sampling, and the predictor.
    Serve {
        /// Number of synthetic traces to run through the demo bar.
        #[arg(long, default_value_t = 50)]
        traces: u32,
    },
    /// Print the demo bar's schema and current predictor estimates as JSON.
    Inspect {
        /// Traces to run before inspecting, so there is something to report.
        #[arg(long, default_value_t = 50)]
        warmup_traces: u32,
    },
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, source) = Config::discover()?;
    crate::logging::init(cli.verbose, config.log_filter.as_deref())?;
    if matches!(source, ConfigSource::File) {
        tracing::debug!("loaded pbars.toml");
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(dispatch(cli.command, &config))
}

async fn dispatch(command: Command, config: &Config) -> anyhow::Result<()> {
    match command {
        Command::Serve { traces } => {
            let runtime = Runtime::demo(config);
            let retained = runtime.run_demo_workload(traces).await?;
            println!("ran {traces} traces, retained {retained}");
            Ok(())
        }
        Command::Inspect { warmup_traces } => {
            let runtime = Runtime::demo(config);
            runtime.run_demo_workload(warmup_traces).await?;
            let report = runtime.inspect().await?;

            let steps: Vec<serde_json::Value> = report
                .step_estimates
                .iter()
                .map(|(position, name, estimate)| {
                    serde_json::json!({
                        "position": position,
                        "name": name,
                        "estimated_seconds": estimate,
                    })
                })
                .collect();
            let output = serde_json::json!({
                "bar_id": report.bar_id.to_string(),
                "version": report.version,
                "retained_count": report.retained_count,
                "whole_trace_estimate_seconds": report.whole_estimate,
                "steps": steps,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
    }
}
