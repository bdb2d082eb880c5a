//! relaypoolctl - drives relaypool-core against a simulated dispatcher for
//! local exploration: runs synthetic request batches through the control
//! plane and prints snapshots, decisions, and fairness metrics.

mod mock_dispatcher;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use relaypool_core::config::PoolConfig;
use relaypool_core::logging::{init_logging, LogConfig, LogFormat as CoreLogFormat};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "relaypoolctl", version, about = "Inspect and exercise the relaypool control plane")]
struct Cli {
    /// Path to a TOML config file. Defaults built in if omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Plain)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, ValueEnum)]
enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run a batch of simulated requests against an in-process pool and
    /// report what happened.
    Run {
        /// Number of credentials in the pool.
        #[arg(long, default_value_t = 4)]
        credentials: usize,
        /// Number of requests to dispatch.
        #[arg(long, default_value_t = 200)]
        requests: u32,
        /// Fraction of requests the mock dispatcher fails, in [0, 1].
        #[arg(long, default_value_t = 0.05)]
        failure_rate: f64,
    },
    /// Build an in-process pool, optionally drive it for a few requests,
    /// then print all key snapshots, the pool snapshot, and fairness
    /// metrics as JSON.
    Explain {
        /// Number of credentials in the pool.
        #[arg(long, default_value_t = 4)]
        credentials: usize,
        /// Number of requests to drive through the pool before snapshotting.
        #[arg(long, default_value_t = 0)]
        requests: u32,
        /// Fraction of requests the mock dispatcher fails, in [0, 1].
        #[arg(long, default_value_t = 0.05)]
        failure_rate: f64,
    },
    /// Print the current pool configuration defaults.
    ShowConfig,
}

fn load_config(path: Option<&PathBuf>) -> Result<PoolConfig> {
    match path {
        Some(p) => PoolConfig::from_file(p).with_context(|| format!("loading config from {}", p.display())),
        None => Ok(PoolConfig::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_format = match cli.format {
        OutputFormat::Plain => CoreLogFormat::Pretty,
        OutputFormat::Json => CoreLogFormat::Json,
    };
    let _ = init_logging(&LogConfig {
        level: "info".to_string(),
        format: log_format,
    });

    let config = load_config(cli.config.as_ref())?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    match cli.command {
        Command::ShowConfig => {
            let rendered = toml::to_string_pretty(&config).context("rendering config")?;
            println!("{rendered}");
            Ok(())
        }
        Command::Run {
            credentials,
            requests,
            failure_rate,
        } => runtime.block_on(run_simulation(config, credentials, requests, failure_rate, cli.format)),
        Command::Explain {
            credentials,
            requests,
            failure_rate,
        } => runtime.block_on(run_explain(config, credentials, requests, failure_rate)),
    }
}

async fn run_simulation(
    config: PoolConfig,
    credential_count: usize,
    requests: u32,
    failure_rate: f64,
    format: OutputFormat,
) -> Result<()> {
    let credential_ids: Vec<String> = (0..credential_count).map(|i| format!("key-{i}")).collect();
    let pool = Arc::new(relaypool_core::Pool::new(config, credential_ids, 4, 0));
    pool.spawn_refresh_task(|| 0);

    let dispatcher = mock_dispatcher::MockDispatcher::new(failure_rate);
    let mut now_ms: u64 = 0;
    for i in 0..requests {
        now_ms += 50;
        let plan = pool.dispatch(
            &Default::default(),
            relaypool_core::model_router::RequestFeatures::default(),
            None,
            now_ms,
            &format!("req-{i}"),
            0,
        );
        if let Some(credential_id) = plan.credential_id.clone() {
            let outcome = dispatcher.call(now_ms);
            let model_id = plan.model_route.as_ref().map(|r| r.model_id.as_str());
            pool.record_outcome(&credential_id, model_id, outcome, now_ms);
        }
    }

    pool.destroy();

    let fairness = pool.fairness_metrics();
    let metrics = pool.metrics_snapshot();
    info!(requests, "simulation complete");

    match format {
        OutputFormat::Json => {
            let report = serde_json::json!({
                "fairness": fairness,
                "metrics": metrics,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Plain => {
            println!("fairness score: {:.1}", fairness.fairness_score);
            for (key, share) in &fairness.per_key_share {
                println!("  {key}: {share:.1}%");
            }
            println!("pool state: {:?}", metrics.pool_state);
        }
    }
    Ok(())
}

/// Build a pool, optionally drive a few requests through it, then print the
/// full snapshot surface (key snapshots, pool snapshot, fairness metrics) as
/// one JSON object. Always JSON regardless of `--format`, since this is a
/// machine-readable explain dump rather than a human summary.
async fn run_explain(config: PoolConfig, credential_count: usize, requests: u32, failure_rate: f64) -> Result<()> {
    let credential_ids: Vec<String> = (0..credential_count).map(|i| format!("key-{i}")).collect();
    let pool = Arc::new(relaypool_core::Pool::new(config, credential_ids, 4, 0));
    pool.spawn_refresh_task(|| 0);

    let dispatcher = mock_dispatcher::MockDispatcher::new(failure_rate);
    let mut now_ms: u64 = 0;
    for i in 0..requests {
        now_ms += 50;
        let plan = pool.dispatch(
            &Default::default(),
            relaypool_core::model_router::RequestFeatures::default(),
            None,
            now_ms,
            &format!("req-{i}"),
            0,
        );
        if let Some(credential_id) = plan.credential_id.clone() {
            let outcome = dispatcher.call(now_ms);
            let model_id = plan.model_route.as_ref().map(|r| r.model_id.as_str());
            pool.record_outcome(&credential_id, model_id, outcome, now_ms);
        }
    }

    pool.destroy();

    let all_key_snapshots = pool.all_key_snapshots(now_ms);
    let pool_snapshot_all = pool.pool_snapshot(now_ms);
    let fairness_metrics = pool.fairness_metrics();
    info!(requests, "explain snapshot taken");

    let report = serde_json::json!({
        "all_key_snapshots": all_key_snapshots,
        "pool_snapshot_all": pool_snapshot_all,
        "fairness_metrics": fairness_metrics,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
