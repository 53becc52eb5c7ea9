use crate::{
    callback::CallbackEvent,
    collab::command::{CommandNotifier, CommandScanner},
    config::Config,
    correlation::CorrelationEngine,
    intake::Intake,
    ledger::{Ledger, SubmissionHandle},
    maintenance,
    relay::{InboundMessage, Relay},
    util::{ensure_dir, now_unix, rfc3339_from_unix},
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "docrelay")]
#[command(about = "Relay documents to a scanning service and deliver each report exactly once")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./docrelay.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit a document directly, without user-facing messages.
    Submit {
        #[arg(long)]
        user: String,
        #[arg(long)]
        input: String,
        #[arg(long, default_value = "document.pdf")]
        filename: String,
    },
    /// Handle one inbound user message (JSON). Reads stdin when --file is omitted.
    Message {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Handle one scanning-service callback (JSON). Reads stdin when --file is omitted.
    Callback {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Show one submission by job id or handle.
    Show {
        #[arg(long, conflicts_with = "handle", required_unless_present = "handle")]
        job_id: Option<String>,
        #[arg(long)]
        handle: Option<i64>,
    },
    /// Record counts per status.
    Stats {},
    /// List COMPLETED records whose report was never delivered.
    Stranded {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Retry dispatch for a stranded record.
    Redeliver {
        #[arg(long)]
        job_id: String,
    },
    /// Abandon SUBMITTED records that never received a job id.
    Sweep {
        #[arg(long)]
        ttl_seconds: Option<u64>,
    },
    /// Delete old DELIVERED/ABANDONED records.
    Purge {
        #[arg(long)]
        older_than_seconds: Option<u64>,
    },
    /// Rebuild the job id index from the ledger table.
    Reindex {},
    /// Print the effective configuration.
    Config {},
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref());
    let cfg = match &cfg_path {
        Some(p) => Config::load(p)?,
        None => Config::default(),
    };

    let log_path = resolve_log_path(&cfg);
    let _guard = init_logging(&args, &cfg, log_path.as_deref())?;
    if let Some(p) = &cfg_path {
        info!("config {}", p.display());
    }

    if let Command::Config {} = &args.cmd {
        println!("{}", toml::to_string(&cfg)?);
        return Ok(());
    }
    if cfg.debug.dump_effective_config {
        info!("effective config:\n{}", toml::to_string(&cfg).unwrap_or_default());
    }

    if let Some(parent) = Path::new(&cfg.ledger.path).parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }
    let ledger = Ledger::open_from_config(&cfg)
        .with_context(|| format!("opening ledger: {}", cfg.ledger.path))?;

    match &args.cmd {
        Command::Submit {
            user,
            input,
            filename,
        } => {
            let scanner = CommandScanner::new(&cfg)?;
            let job_id = Intake::new(&ledger, &cfg.scan)
                .submit(user, input, filename, &scanner)?;
            print_json(&serde_json::json!({ "job_id": job_id }))
        }
        Command::Message { file } => {
            let raw = read_input(file.as_deref())?;
            let msg: InboundMessage =
                serde_json::from_slice(&raw).with_context(|| "parsing inbound message JSON")?;
            let scanner = CommandScanner::new(&cfg)?;
            let notifier = CommandNotifier::new(&cfg)?;
            let outcome = Relay::new(&cfg, &ledger, &scanner, &notifier).on_message(&msg);
            print_json(&outcome)
        }
        Command::Callback { file } => {
            let raw = read_input(file.as_deref())?;
            let event =
                CallbackEvent::from_json(&raw).with_context(|| "parsing callback JSON")?;
            let notifier = CommandNotifier::new(&cfg)?;
            let outcome = CorrelationEngine::new(&cfg, &ledger, &notifier).handle_callback(&event)?;
            print_json(&outcome)
        }
        Command::Show { job_id, handle } => {
            let sub = match (job_id, handle) {
                (Some(job_id), _) => ledger.find_by_job_id(job_id)?,
                (None, Some(h)) => ledger.get(SubmissionHandle(*h))?,
                (None, None) => return Err(anyhow!("pass --job-id or --handle")),
            };
            let sub = sub.ok_or_else(|| anyhow!("no such submission"))?;
            print_json(&serde_json::json!({
                "submission": sub,
                "created": rfc3339_from_unix(sub.created_at),
                "updated": rfc3339_from_unix(sub.updated_at),
            }))
        }
        Command::Stats {} => print_json(&ledger.counts()?),
        Command::Stranded { limit } => print_json(&maintenance::stranded(&ledger, *limit)?),
        Command::Redeliver { job_id } => {
            let notifier = CommandNotifier::new(&cfg)?;
            let outcome = maintenance::redeliver(
                &ledger,
                &notifier,
                job_id,
                &cfg.delivery.report_filename,
            )?;
            print_json(&outcome)
        }
        Command::Sweep { ttl_seconds } => {
            let ttl = ttl_seconds.unwrap_or(cfg.retention.stale_submission_seconds);
            print_json(&maintenance::sweep_stale(&ledger, ttl, now_unix())?)
        }
        Command::Purge { older_than_seconds } => {
            let age = older_than_seconds.unwrap_or(cfg.retention.purge_after_seconds);
            print_json(&maintenance::purge(&ledger, age, now_unix())?)
        }
        Command::Reindex {} => {
            ledger.rebuild_index()?;
            print_json(&serde_json::json!({ "status": "ok" }))
        }
        Command::Config {} => Ok(()),
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    ["docrelay.toml", "docrelay.example.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr.
    let console_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    let ledger_dir = Path::new(&cfg.ledger.path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Some(ledger_dir.join("docrelay.log"))
}

fn read_input(file: Option<&Path>) -> Result<Vec<u8>> {
    match file {
        Some(p) => std::fs::read(p).with_context(|| format!("reading {}", p.display())),
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .with_context(|| "reading stdin")?;
            Ok(buf)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
