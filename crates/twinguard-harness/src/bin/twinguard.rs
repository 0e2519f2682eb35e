//! CLI entrypoint for the twinguard replay harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use twinguard_core::TwinConfig;
use twinguard_harness::replay::default_run_id;
use twinguard_harness::{ReplayOptions, check_audit_files, run_replay};

/// Digital-twin monitor: replay telemetry and check its audit trail.
#[derive(Debug, Parser)]
#[command(name = "twinguard")]
#[command(about = "Replay plant telemetry through the twinguard monitoring loop")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay a CSV telemetry file until it ends or a recovery plan is accepted.
    Replay {
        /// CSV with a `time_hours` column plus numeric channel columns.
        #[arg(long)]
        telemetry: PathBuf,
        /// JSON, TOML or YAML thresholds file (defaults to $TWINGUARD_CONFIG).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Directory receiving flight_recorder.jsonl and omega_gate.jsonl.
        #[arg(long, default_value = "logs")]
        log_dir: PathBuf,
        /// Structured JSONL run log path.
        #[arg(long)]
        run_log: Option<PathBuf>,
        /// Output run report path (JSON; `.md` renders markdown).
        #[arg(long)]
        report: Option<PathBuf>,
        /// Fail on decreasing timestamps instead of accepting them.
        #[arg(long)]
        strict_order: bool,
        /// Run identifier used in trace ids (generated if omitted).
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Validate stability and gate audit logs against their record contracts.
    CheckAudit {
        #[arg(long, default_value = "logs/flight_recorder.jsonl")]
        stability: PathBuf,
        #[arg(long, default_value = "logs/omega_gate.jsonl")]
        gate: PathBuf,
        /// Also require export_allowed to agree with the configured thresholds.
        #[arg(long)]
        enforce_thresholds: bool,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration as JSON.
    ShowConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

fn effective_config(explicit: Option<PathBuf>) -> TwinConfig {
    let path = TwinConfig::resolve_path(explicit.as_deref());
    TwinConfig::load_or_default(path.as_deref())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Replay {
            telemetry,
            config,
            log_dir,
            run_log,
            report,
            strict_order,
            run_id,
        } => {
            let opts = ReplayOptions {
                telemetry,
                config,
                log_dir,
                run_log,
                strict_order,
                run_id: run_id.unwrap_or_else(default_run_id),
            };
            eprintln!("Replaying {} (run {})", opts.telemetry.display(), opts.run_id);
            let run = run_replay(&opts)?;
            let s = &run.summary;

            println!("Samples processed: {}", s.samples_processed);
            println!("Final integrity: {:.3}", s.final_integrity);
            println!("Max twist observed: {:.3}", s.max_twist);
            match s.first_anomaly_at_hours {
                Some(t) => println!("Collapse detected at t = {t:.2} h"),
                None => println!("No collapse detected"),
            }
            match s.recovered_at_hours {
                Some(t) => println!("Recovery plan accepted at t = {t:.2} h"),
                None if s.plans_rejected > 0 => {
                    println!("Recovery plans rejected: {}", s.plans_rejected);
                }
                None => {}
            }
            if run.audit.stability_failures + run.audit.gate_failures > 0 {
                eprintln!(
                    "Warning: {} audit record(s) could not be written",
                    run.audit.stability_failures + run.audit.gate_failures
                );
            }

            if let Some(path) = report {
                let body = if path.extension().and_then(|e| e.to_str()) == Some("md") {
                    run.to_markdown()
                } else {
                    run.to_json()?
                };
                std::fs::write(&path, body)?;
                eprintln!("Wrote report to {}", path.display());
            }
        }
        Command::CheckAudit {
            stability,
            gate,
            enforce_thresholds,
            config,
        } => {
            let thresholds = effective_config(config).thresholds.gate();
            let report = check_audit_files(
                &stability,
                &gate,
                enforce_thresholds.then_some(&thresholds),
            )?;
            for violation in &report.violations {
                eprintln!("{violation}");
            }
            println!(
                "Checked {} stability and {} gate record(s) ({} approved): {} violation(s)",
                report.stability_records,
                report.gate_records,
                report.gate_approvals,
                report.violations.len()
            );
            report.into_result()?;
        }
        Command::ShowConfig { config } => {
            let cfg = effective_config(config);
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
    }

    Ok(())
}
