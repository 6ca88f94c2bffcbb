//! cipherpath: dual-path (homomorphic / plaintext) table aggregation.
//!
//! Main entry point for the command-line tool.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cipherpath::adapters::http::HttpEndpoint;
use cipherpath::adapters::sanitize::{self, SanitizingMakeWriter};
use cipherpath::adapters::server;
use cipherpath::adapters::tfhe::TfheEngine;
use cipherpath::application::{
    Gateway, NonSensitiveService, Pipeline, PipelineRequest, SensitiveService,
};
use cipherpath::config::{Config, ServiceRole};
use cipherpath::domain::wire::TablePayload;
use cipherpath::domain::{ColumnOrder, UnknownColumnPolicy};
use cipherpath::{Operation, ResultTable};

/// Aggregate a table with sensitive columns computed under homomorphic encryption
#[derive(Parser)]
#[command(name = "cipherpath")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, env = "CIPHERPATH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run both paths in this process
    Run(JobArgs),
    /// Send the table to the two remote compute services
    Remote(RemoteArgs),
    /// Host one compute service over HTTP
    Serve(ServeArgs),
}

#[derive(Args)]
struct JobArgs {
    /// Table as JSON `{columns, data}`; `-` reads stdin
    #[arg(long, short)]
    input: PathBuf,

    /// Comma-separated sensitive column names
    #[arg(long, short, value_delimiter = ',')]
    sensitive: Vec<String>,

    /// addition | average | average_broadcast | multiplication
    #[arg(long, short)]
    operation: String,

    /// Factor for `multiplication`
    #[arg(long)]
    factor: Option<f64>,

    /// Worker threads per path
    #[arg(long, short)]
    workers: Option<usize>,

    #[arg(long)]
    column_order: Option<ColumnOrder>,

    #[arg(long)]
    unknown_columns: Option<UnknownColumnPolicy>,
}

#[derive(Args)]
struct RemoteArgs {
    #[command(flatten)]
    job: JobArgs,

    #[arg(long)]
    non_sensitive_url: Option<String>,

    #[arg(long)]
    sensitive_url: Option<String>,

    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Args)]
struct ServeArgs {
    /// sensitive | non-sensitive
    #[arg(long)]
    role: Option<ServiceRole>,

    /// Listen address, e.g. 127.0.0.1:8080
    #[arg(long)]
    bind: Option<String>,

    #[arg(long, short)]
    workers: Option<usize>,
}

fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    // stdout carries the result table, so logs go to stderr unless a file is named.
    let (writer, guard) = match std::env::var("CIPHERPATH_LOG_FILE") {
        Ok(log_file) if !log_file.trim().is_empty() => {
            if let Some(parent) = Path::new(&log_file).parent() {
                // Best-effort: don't fail startup just because the directory is missing.
                let _ = std::fs::create_dir_all(parent);
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
                .with_context(|| format!("opening log file {log_file}"))?;
            tracing_appender::non_blocking(file)
        }
        _ => tracing_appender::non_blocking(std::io::stderr()),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(SanitizingMakeWriter::new(writer)))
        .init();

    if let Err(reason) = sanitize::self_check() {
        // The line itself is redacted; stderr still shows why.
        eprintln!("cipherpath: {reason}");
        tracing::error!("Log sanitizer unavailable; redacting every log line");
    }

    Ok(guard)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging()?;

    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(job) => {
            apply_job_flags(&mut config, &job);
            let request = read_request(&job)?;
            let engine = Arc::new(TfheEngine::generate(config.pipeline.engine)?);
            let result = Pipeline::new(engine, config.pipeline).run(&request)?;
            print_result(&result)
        }
        Commands::Remote(args) => {
            apply_job_flags(&mut config, &args.job);
            if let Some(url) = args.non_sensitive_url {
                config.gateway.non_sensitive_url = Some(url);
            }
            if let Some(url) = args.sensitive_url {
                config.gateway.sensitive_url = Some(url);
            }
            if let Some(secs) = args.timeout_secs {
                config.gateway.timeout_secs = secs;
            }

            let timeout = config.gateway.timeout();
            let non_sensitive_url = config
                .gateway
                .non_sensitive_url
                .clone()
                .context("no non-sensitive endpoint URL configured")?;
            let sensitive_url = config
                .gateway
                .sensitive_url
                .clone()
                .context("no sensitive endpoint URL configured")?;

            let request = read_request(&args.job)?;
            let gateway = Gateway::new(
                HttpEndpoint::new(non_sensitive_url, timeout)?,
                HttpEndpoint::new(sensitive_url, timeout)?,
                config.pipeline,
            );
            let result = gateway.process(&request)?;
            print_result(&result)
        }
        Commands::Serve(args) => {
            if let Some(role) = args.role {
                config.server.role = role;
            }
            if let Some(bind) = args.bind {
                config.server.bind = bind;
            }
            if let Some(workers) = args.workers {
                config.pipeline.workers = workers.max(1);
            }

            let runtime = tokio::runtime::Runtime::new()?;
            match config.server.role {
                ServiceRole::NonSensitive => {
                    let service = Arc::new(NonSensitiveService::new(config.pipeline.clone()));
                    runtime.block_on(server::serve(&config.server, service))?;
                }
                ServiceRole::Sensitive => {
                    let engine = Arc::new(TfheEngine::generate(config.pipeline.engine)?);
                    let service = Arc::new(SensitiveService::new(engine, config.pipeline.clone()));
                    runtime.block_on(server::serve(&config.server, service))?;
                }
            }
            Ok(())
        }
    }
}

fn apply_job_flags(config: &mut Config, job: &JobArgs) {
    if let Some(workers) = job.workers {
        config.pipeline.workers = workers.max(1);
    }
    if let Some(order) = job.column_order {
        config.pipeline.column_order = order;
    }
    if let Some(policy) = job.unknown_columns {
        config.pipeline.unknown_columns = policy;
    }
}

fn read_request(job: &JobArgs) -> Result<PipelineRequest> {
    let text = if job.input.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(&job.input)
            .with_context(|| format!("reading {}", job.input.display()))?
    };

    let payload: TablePayload = serde_json::from_str(&text).context("parsing input table")?;
    let table = payload.into_table()?;
    let operation = Operation::from_wire(&job.operation, job.factor)?;

    tracing::info!(
        rows = table.row_count(),
        columns = table.column_count(),
        %operation,
        "Loaded input table"
    );

    Ok(PipelineRequest {
        table,
        sensitive_columns: job.sensitive.clone(),
        operation,
    })
}

fn print_result(result: &ResultTable) -> Result<()> {
    let payload = TablePayload {
        columns: result.column_names(),
        data: result.to_rows(),
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
