use std::{
    io::{self, Write},
    num::{IntErrorKind, NonZeroUsize},
    path::PathBuf,
    process::ExitCode,
};

use anyhow::{Context, Result};
use capture::config::{DEFAULT_INBOX, DEFAULT_LIST_LIMIT, INBOX_ENV, InboxConfig};
use capture::core::TIMESTAMP_FORMAT;
use capture::storage::{TaskLog, TaskLogError};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "capture",
    about = "Capture tasks into a Markdown inbox, or list the latest ones",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long)]
    verbose: bool,
    /// Name and describe your task briefly, in quotation marks.
    task: Vec<String>,
    /// Path to the inbox Markdown file.
    #[arg(long, env = INBOX_ENV, default_value = DEFAULT_INBOX)]
    inbox: PathBuf,
    /// List the most recent tasks (default 10). Optionally pass a number, e.g. --list 25.
    #[arg(
        long,
        value_name = "N",
        num_args = 0..=1,
        default_missing_value = DEFAULT_LIST_LIMIT,
        allow_negative_numbers = true
    )]
    list: Option<String>,
    /// Print listed entries as JSON.
    #[arg(long, requires = "list")]
    json: bool,
    /// Hold an advisory file lock while appending or reading.
    #[arg(long)]
    lock: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Mode {
    Capture(String),
    List { limit: NonZeroUsize, json: bool },
}

#[derive(Debug, thiserror::Error)]
enum UsageError {
    #[error("--list expects a positive number, got {0:?}")]
    InvalidLimit(String),
    #[error("provide a task in quotation marks, or pass --list to see recent tasks")]
    MissingTask,
}

impl Cli {
    /// `--list` wins over positional text.
    fn mode(&self) -> Result<Mode, UsageError> {
        if let Some(raw) = &self.list {
            return Ok(Mode::List {
                limit: parse_limit(raw)?,
                json: self.json,
            });
        }
        let text = self.task.join(" ");
        let text = text.trim();
        if text.is_empty() {
            return Err(UsageError::MissingTask);
        }
        Ok(Mode::Capture(text.to_string()))
    }

    fn inbox_config(&self) -> InboxConfig {
        InboxConfig::new(&self.inbox).with_lock(self.lock)
    }
}

/// Positive integers only. Limits past `usize::MAX` just mean "everything".
fn parse_limit(raw: &str) -> Result<NonZeroUsize, UsageError> {
    match raw.trim().parse::<NonZeroUsize>() {
        Ok(limit) => Ok(limit),
        Err(err) if *err.kind() == IntErrorKind::PosOverflow => Ok(NonZeroUsize::MAX),
        Err(_) => Err(UsageError::InvalidLimit(raw.to_string())),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let stdout = io::stdout();
    match run(&cli, &mut stdout.lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

/// Diagnostics go to stderr so stdout carries only entries and confirmations.
fn init_tracing(verbose: bool) {
    let fallback = if verbose { "capture=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: &Cli, out: &mut impl Write) -> Result<()> {
    let mode = cli.mode()?;
    let log = TaskLog::open(&cli.inbox_config());

    match mode {
        Mode::List { limit, json: true } => {
            #[derive(serde::Serialize)]
            struct JsonEntry<'a> {
                line: &'a str,
                timestamp: Option<String>,
                text: Option<&'a str>,
            }

            let entries = log.list_recent_entries(limit).context("listing tasks")?;
            let payload: Vec<JsonEntry<'_>> = entries
                .iter()
                .map(|e| JsonEntry {
                    line: &e.line,
                    timestamp: e
                        .entry
                        .as_ref()
                        .map(|entry| entry.timestamp.format(TIMESTAMP_FORMAT).to_string()),
                    text: e.entry.as_ref().map(|entry| entry.text.as_str()),
                })
                .collect();
            writeln!(out, "{}", serde_json::to_string_pretty(&payload)?)?;
        }
        Mode::List { limit, json: false } => {
            for line in log.list_recent(limit).context("listing tasks")? {
                writeln!(out, "{line}")?;
            }
        }
        Mode::Capture(text) => {
            log.capture(&text).context("capturing task")?;
            writeln!(out, "Captured → {}", log.path().display())?;
        }
    }
    Ok(())
}

/// 2 for anything the user can fix by changing the arguments, 1 for I/O.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<UsageError>().is_some() {
        return 2;
    }
    match err.downcast_ref::<TaskLogError>() {
        Some(TaskLogError::EmptyInput(_)) => 2,
        _ => 1,
    }
}
