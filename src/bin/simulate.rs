use clap::Parser;
use evac_sim::config::SimConfig;
use evac_sim::error::SimError;
use evac_sim::simulation::{Scenario, Simulation};
use evac_sim::types::{RunOutcome, RunReport};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// JSON file with `SimConfig` overrides.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    runs: Option<usize>,
    #[arg(long)]
    seed: Option<u32>,
    /// Time-scale divisor applied to every delay.
    #[arg(long)]
    speed: Option<f64>,
    #[arg(long)]
    max_ticks: Option<u64>,
    #[arg(long)]
    batch_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "batchId")]
    batch_id: String,
    #[serde(rename = "startedAtIso")]
    started_at_iso: String,
    #[serde(rename = "finishedAtIso")]
    finished_at_iso: String,
    #[serde(rename = "runCount")]
    run_count: usize,
    #[serde(rename = "stalledCount")]
    stalled_count: usize,
    #[serde(rename = "averageEvacuationMs")]
    average_evacuation_ms: u64,
    #[serde(rename = "outcomeCounts")]
    outcome_counts: BTreeMap<String, usize>,
    runs: Vec<RunReport>,
}

#[derive(Clone, Debug, Serialize)]
struct StructuredLogLine {
    timestamp: String,
    level: String,
    event: String,
    #[serde(rename = "batchId")]
    batch_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tick: Option<u64>,
    details: Value,
}

#[tokio::main]
async fn main() -> Result<(), SimError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    let seeds = resolve_seeds(&cli, &config);
    let started_at_iso = now_iso();
    let batch_id = cli.batch_id.clone().unwrap_or_else(|| {
        default_batch_id(seeds.first().copied().unwrap_or(0), &started_at_iso)
    });
    let mut reports = Vec::new();

    for seed in seeds {
        let scenario = Scenario::generate(seed, &config.building);
        emit_log(
            "info",
            "run_started",
            &batch_id,
            Some(seed),
            None,
            json!({
                "floors": scenario.layout.floors(),
                "rows": scenario.layout.rows(),
                "cols": scenario.layout.cols(),
                "occupants": scenario.occupants.len(),
                "responders": scenario.responders.len(),
            }),
        );

        let finished = match Simulation::start(scenario, &config) {
            Ok(simulation) => simulation.finish().await,
            Err(err) => Err(err),
        };
        let finished = match finished {
            Ok(finished) => finished,
            Err(err) => {
                emit_log(
                    "error",
                    "run_failed",
                    &batch_id,
                    Some(seed),
                    None,
                    json!({ "error": err.to_string() }),
                );
                return Err(err);
            }
        };
        let report = finished.report;

        if report.outcome == RunOutcome::Stalled {
            emit_log(
                "warn",
                "run_stalled",
                &batch_id,
                Some(seed),
                Some(report.ticks),
                json!({
                    "evacuated": report.evacuated,
                    "totalAgents": report.total_agents,
                    "recentUpdates": finished.snapshot.recent_updates,
                }),
            );
        }
        emit_log(
            "info",
            "run_finished",
            &batch_id,
            Some(seed),
            Some(report.ticks),
            json!({
                "outcome": report.outcome,
                "totalEvacuationMs": report.total_evacuation_ms,
                "responses": report.responses,
            }),
        );

        println!("{}", serde_json::to_string(&report)?);
        reports.push(report);
    }

    let summary = build_run_summary(batch_id.clone(), started_at_iso, now_iso(), reports);

    let mut summary_out_written: Option<String> = None;
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            emit_log(
                "error",
                "summary_write_failed",
                &batch_id,
                None,
                None,
                json!({
                    "path": path.to_string_lossy(),
                    "error": error.to_string(),
                }),
            );
            std::process::exit(2);
        }
        summary_out_written = Some(path.to_string_lossy().to_string());
    }

    emit_log(
        "info",
        "batch_finished",
        &batch_id,
        None,
        None,
        json!({
            "runCount": summary.run_count,
            "stalledCount": summary.stalled_count,
            "averageEvacuationMs": summary.average_evacuation_ms,
            "outcomeCounts": summary.outcome_counts,
            "summaryOut": summary_out_written,
        }),
    );

    if summary.stalled_count > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn resolve_config(cli: &Cli) -> Result<SimConfig, SimError> {
    let mut config = match cli.config.as_deref() {
        Some(path) => SimConfig::from_file(path)?,
        None => SimConfig::default(),
    };
    if let Some(speed) = cli.speed {
        config.timings = config.timings.scaled(speed);
    }
    if let Some(max_ticks) = cli.max_ticks {
        config.max_ticks = Some(max_ticks);
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    config.validate()?;
    Ok(config)
}

/// Consecutive seeds starting at `--seed`, the config seed, or a random one.
fn resolve_seeds(cli: &Cli, config: &SimConfig) -> Vec<u32> {
    let base = config.seed.unwrap_or_else(rand::random::<u32>);
    let runs = cli.runs.unwrap_or(1).max(1);
    (0..runs as u32).map(|offset| base.wrapping_add(offset)).collect()
}

fn default_batch_id(seed: u32, started_at_iso: &str) -> String {
    format!("evac-{seed}-{started_at_iso}")
}

fn build_run_summary(
    batch_id: String,
    started_at_iso: String,
    finished_at_iso: String,
    runs: Vec<RunReport>,
) -> RunSummary {
    let run_count = runs.len();
    let mut outcome_counts: BTreeMap<String, usize> = BTreeMap::new();
    for report in &runs {
        *outcome_counts
            .entry(outcome_key(report.outcome).to_string())
            .or_insert(0) += 1;
    }
    let stalled_count = outcome_counts.get("stalled").copied().unwrap_or(0);
    let total_evacuation_ms: u64 = runs.iter().map(|report| report.total_evacuation_ms).sum();
    let average_evacuation_ms = if run_count == 0 {
        0
    } else {
        total_evacuation_ms / run_count as u64
    };
    RunSummary {
        batch_id,
        started_at_iso,
        finished_at_iso,
        run_count,
        stalled_count,
        average_evacuation_ms,
        outcome_counts,
        runs,
    }
}

fn emit_log(
    level: &str,
    event: &str,
    batch_id: &str,
    seed: Option<u32>,
    tick: Option<u64>,
    details: Value,
) {
    let log_line = StructuredLogLine {
        timestamp: now_iso(),
        level: level.to_string(),
        event: event.to_string(),
        batch_id: batch_id.to_string(),
        seed,
        tick,
        details,
    };
    eprintln!(
        "{}",
        serde_json::to_string(&log_line).expect("structured log should serialize")
    );
}

fn outcome_key(outcome: RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Completed => "completed",
        RunOutcome::Stalled => "stalled",
    }
}

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).expect("run summary should serialize");
    std::fs::write(path, summary_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_report(outcome: RunOutcome, total_evacuation_ms: u64) -> RunReport {
        RunReport {
            seed: 42,
            outcome,
            ticks: 30,
            fires_resolved: 0,
            fires_total: 0,
            earthquakes_resolved: 0,
            earthquakes_total: 0,
            attacks_resolved: 0,
            attacks_total: 0,
            evacuated: 4,
            total_agents: 4,
            responses: 0,
            total_evacuation_ms,
            mean_response_ms: 0.0,
        }
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("simulate").chain(args.iter().copied()))
    }

    #[test]
    fn default_batch_id_contains_seed_and_timestamp() {
        assert_eq!(
            default_batch_id(42, "2026-01-01T00:00:00.000Z"),
            "evac-42-2026-01-01T00:00:00.000Z"
        );
    }

    #[test]
    fn build_run_summary_counts_outcomes_and_averages() {
        let summary = build_run_summary(
            "evac-42".to_string(),
            "a".to_string(),
            "b".to_string(),
            vec![
                make_report(RunOutcome::Completed, 60_000),
                make_report(RunOutcome::Stalled, 90_000),
            ],
        );
        assert_eq!(summary.average_evacuation_ms, 75_000);
        assert_eq!(summary.run_count, 2);
        assert_eq!(summary.stalled_count, 1);
        assert_eq!(summary.outcome_counts.get("completed"), Some(&1));
    }

    #[test]
    fn seeds_are_consecutive_from_the_base() {
        let cli = cli(&["--seed", "7", "--runs", "3"]);
        let config = resolve_config(&cli).expect("config");
        assert_eq!(resolve_seeds(&cli, &config), vec![7, 8, 9]);
    }

    #[test]
    fn speed_and_tick_limit_override_the_config() {
        let cli = cli(&["--speed", "4", "--max-ticks", "50"]);
        let config = resolve_config(&cli).expect("config");
        assert_eq!(config.max_ticks, Some(50));
        assert_eq!(config.timings.tick_ms, 250);
    }

    #[test]
    fn missing_config_file_is_reported() {
        let cli = cli(&["--config", "/nonexistent/evac-config.json"]);
        assert!(matches!(
            resolve_config(&cli),
            Err(SimError::ReadConfig { .. })
        ));
    }

    #[test]
    fn write_summary_returns_error_when_parent_does_not_exist() {
        let target = std::env::temp_dir()
            .join(format!("evac-sim-missing-{}", now_iso()))
            .join("summary.json");
        let summary = build_run_summary(
            "evac-1".to_string(),
            "a".to_string(),
            "b".to_string(),
            vec![make_report(RunOutcome::Completed, 60_000)],
        );
        assert!(write_summary(&target, &summary).is_err());
    }
}
