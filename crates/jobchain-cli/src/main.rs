//! jobchain: JSON で書いたチェーンを 1 回実行する CLI
//!
//! ```text
//! jobchain run --chain demos/diamond.json [--config jobchain.toml] [--log-level debug]
//! jobchain validate --chain demos/diamond.json
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use tracing::info;

use jobchain_core::coordinator::RetryPolicy;
use jobchain_core::domain::{ChainPolicy, ChainStatus, ExecutionError, FailurePolicy, JobOutput, JobSpec};
use jobchain_core::graph::JobChain;
use jobchain_core::observability;
use jobchain_core::runtime::{JobContext, JobHandler};
use jobchain_core::{DispatcherBuilder, DispatcherConfig, ShutdownMode};

#[derive(Debug, Parser)]
#[command(name = "jobchain", version, about = "Run a DAG of jobs with retries and fail-fast.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit the chain, wait for it and print the final snapshot as JSON.
    Run {
        /// Chain definition (JSON).
        #[arg(long, value_name = "PATH")]
        chain: PathBuf,

        /// Dispatcher config (TOML). Defaults apply when omitted.
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// If omitted, `JOBCHAIN_LOG` / `RUST_LOG` or `info` is used.
        #[arg(long, value_enum, value_name = "LEVEL")]
        log_level: Option<LogLevel>,
    },
    /// Build the graph only and print the topological order.
    Validate {
        #[arg(long, value_name = "PATH")]
        chain: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// チェーン定義ファイル
///
/// job は JSON のまま受け取り、欠けている `max_retries` / `timeout_ms` を設定の既定値で埋めてから
/// `JobSpec` にする。
#[derive(Debug, Deserialize)]
struct ChainFile {
    #[serde(default)]
    policy: PolicyFile,
    jobs: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PolicyFile {
    max_concurrency: Option<usize>,
    failure_policy: Option<FailurePolicy>,
    backoff: Option<RetryPolicy>,
}

impl ChainFile {
    fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading chain file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing chain file {}", path.display()))
    }

    fn into_parts(self, config: &DispatcherConfig) -> Result<(Vec<JobSpec>, ChainPolicy)> {
        let defaults = ChainPolicy::from_config(config);
        let policy = ChainPolicy::new(
            self.policy.max_concurrency.unwrap_or(defaults.max_concurrency),
            self.policy.failure_policy.unwrap_or(defaults.failure_policy),
            self.policy.backoff.unwrap_or(defaults.backoff),
        );

        let jobs = self
            .jobs
            .into_iter()
            .enumerate()
            .map(|(i, mut job)| {
                if let Some(fields) = job.as_object_mut() {
                    fields
                        .entry("max_retries")
                        .or_insert_with(|| config.default_max_retries.into());
                    if let Some(ms) = config.default_timeout_ms {
                        fields.entry("timeout_ms").or_insert_with(|| ms.into());
                    }
                }
                serde_json::from_value(job).with_context(|| format!("job #{i} is not a valid job spec"))
            })
            .collect::<Result<Vec<JobSpec>>>()?;
        Ok((jobs, policy))
    }
}

/// payload をそのまま artifact として返す
struct PrintHandler;

#[async_trait]
impl JobHandler for PrintHandler {
    async fn execute(&self, ctx: JobContext) -> Result<JobOutput, ExecutionError> {
        println!("[{}] {}", ctx.job_id, ctx.payload);
        Ok(JobOutput::with_artifact(ctx.payload))
    }
}

/// `payload.ms` だけ待つ（キャンセルされたら途中で抜ける）
struct SleepHandler;

#[async_trait]
impl JobHandler for SleepHandler {
    async fn execute(&self, ctx: JobContext) -> Result<JobOutput, ExecutionError> {
        let ms = ctx.payload.get("ms").and_then(|v| v.as_u64()).unwrap_or(100);
        tokio::select! {
            _ = ctx.cancellation.cancelled() => Err(jobchain_core::domain::CancellationError.into()),
            _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(JobOutput::empty()),
        }
    }
}

/// 最初の `payload.failures` 回の試行は失敗する
struct FlakyHandler;

#[async_trait]
impl JobHandler for FlakyHandler {
    async fn execute(&self, ctx: JobContext) -> Result<JobOutput, ExecutionError> {
        let failures = ctx.payload.get("failures").and_then(|v| v.as_u64()).unwrap_or(1);
        if u64::from(ctx.attempt) <= failures {
            return Err(ExecutionError::handler(format!(
                "intentional failure (attempt {} of {failures})",
                ctx.attempt
            )));
        }
        Ok(JobOutput::empty())
    }
}

struct FailHandler;

#[async_trait]
impl JobHandler for FailHandler {
    async fn execute(&self, ctx: JobContext) -> Result<JobOutput, ExecutionError> {
        let message = ctx
            .payload
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("intentional failure");
        Err(ExecutionError::handler(message))
    }
}

async fn run(chain: &Path, config: Option<&Path>) -> Result<ChainStatus> {
    let config = match config {
        Some(path) => DispatcherConfig::load(path)?,
        None => DispatcherConfig::default(),
    };
    let (jobs, policy) = ChainFile::read(chain)?.into_parts(&config)?;

    let dispatcher = DispatcherBuilder::new(config)
        .register("print", Arc::new(PrintHandler))?
        .register("sleep", Arc::new(SleepHandler))?
        .register("flaky", Arc::new(FlakyHandler))?
        .register("fail", Arc::new(FailHandler))?
        .build()?;

    let submitted = dispatcher.submit_chain(jobs, policy).await?;
    let completion = dispatcher.completion(submitted.chain_id).await?;

    let done = tokio::select! {
        done = completion.wait() => done?,
        _ = tokio::signal::ctrl_c() => {
            info!(chain_id = %submitted.chain_id, "interrupted, cancelling chain");
            dispatcher.cancel(submitted.chain_id).await?;
            dispatcher
                .get_status(submitted.chain_id)
                .await
                .context("chain vanished while cancelling")?
        }
    };

    println!("{}", serde_json::to_string_pretty(&done)?);
    dispatcher.shutdown(ShutdownMode::Drain).await?;
    Ok(done.status)
}

fn validate(chain: &Path) -> Result<()> {
    let (jobs, policy) = ChainFile::read(chain)?.into_parts(&DispatcherConfig::default())?;
    let chain = JobChain::build(jobs, policy)?;
    for (position, id) in chain.topological_ids().enumerate() {
        println!("{position:>3}  {id}");
    }
    println!("{} jobs, {} edges", chain.len(), chain.edge_count());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run_main().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("jobchain error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run_main() -> Result<ExitCode> {
    match Cli::parse().command {
        Command::Run {
            chain,
            config,
            log_level,
        } => {
            observability::init_tracing(log_level.map(LogLevel::as_filter))?;
            let status = run(&chain, config.as_deref()).await?;
            Ok(if status == ChainStatus::Succeeded {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Validate { chain } => {
            validate(&chain)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
