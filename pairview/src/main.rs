//! pairview — CLI driver for the review engine.
//!
//! The binary owns argument parsing, logging setup, and a line-oriented
//! prompt loop; all review semantics live in `pairview-core`. One
//! subcommand per lifecycle entry point: start a session, resume one,
//! list what is resumable, clean up stale snapshots.

mod prompt;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pairview_core::{
    connect, CacheSweeper, CsvReportSink, EngineConfig, OutputFormat, PerformanceMonitor,
    SessionConfig, SessionError, SessionManager, SessionStore, SourceParams,
};

/// Review expected/generated code pairs with resumable sessions.
#[derive(Parser, Debug)]
#[command(name = "pairview")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to an engine config file (defaults to the XDG location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a new review session
    Start(StartArgs),

    /// Resume a previously interrupted session
    Resume {
        /// Session id as printed at start (or by `sessions`)
        session_id: String,
    },

    /// List resumable sessions
    Sessions,

    /// Delete session snapshots older than the given number of days
    Cleanup {
        #[arg(long, default_value_t = 30)]
        days: u64,
    },
}

#[derive(Args, Debug)]
struct StartArgs {
    /// Experiment name recorded on every review
    #[arg(long)]
    experiment: String,

    /// Percentage of available pairs to review, in (0, 100]
    #[arg(long, default_value_t = 100.0)]
    sample: f64,

    /// Report output format
    #[arg(long, value_enum, default_value = "csv")]
    format: FormatArg,

    #[command(subcommand)]
    source: SourceCommand,
}

#[derive(Subcommand, Debug)]
enum SourceCommand {
    /// Code pairs from generated/expected folders
    Folders {
        /// Folder of generated code files
        #[arg(long)]
        generated: PathBuf,
        /// Folder of expected code files, matched by relative path
        #[arg(long)]
        expected: Option<PathBuf>,
    },
    /// Code pairs from a SQLite table
    Sqlite {
        #[arg(long)]
        database: PathBuf,
        #[arg(long)]
        table: String,
        #[arg(long)]
        id_column: String,
        #[arg(long)]
        generated_column: String,
        #[arg(long)]
        expected_column: Option<String>,
    },
    /// Code pairs from a spreadsheet (.xlsx/.xls) or CSV file
    Sheet {
        #[arg(long)]
        file: PathBuf,
        /// Sheet name; the first sheet when omitted
        #[arg(long)]
        sheet: Option<String>,
        #[arg(long)]
        id_column: String,
        #[arg(long)]
        generated_column: String,
        #[arg(long)]
        expected_column: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Csv,
    Tsv,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Csv => OutputFormat::Csv,
            FormatArg::Tsv => OutputFormat::Tsv,
        }
    }
}

impl From<SourceCommand> for SourceParams {
    fn from(command: SourceCommand) -> Self {
        match command {
            SourceCommand::Folders { generated, expected } => SourceParams::Filesystem {
                generated_dir: generated,
                expected_dir: expected,
            },
            SourceCommand::Sqlite {
                database,
                table,
                id_column,
                generated_column,
                expected_column,
            } => SourceParams::RelationalTable {
                database,
                table,
                identifier_column: id_column,
                generated_column,
                expected_column,
            },
            SourceCommand::Sheet {
                file,
                sheet,
                id_column,
                generated_column,
                expected_column,
            } => SourceParams::Spreadsheet {
                file,
                sheet,
                identifier_column: id_column,
                generated_column,
                expected_column,
            },
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("pairview=debug,pairview_core=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let engine_config = match &cli.config {
        Some(path) => EngineConfig::load_from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::load().context("loading engine config")?,
    };
    tracing::debug!(
        sessions_dir = %engine_config.sessions_dir.display(),
        reports_dir = %engine_config.reports_dir.display(),
        "engine config loaded"
    );

    match cli.command {
        Commands::Start(args) => start(args, &engine_config),
        Commands::Resume { session_id } => resume(&session_id, &engine_config),
        Commands::Sessions => list_sessions(&engine_config),
        Commands::Cleanup { days } => cleanup(days, &engine_config),
    }
}

fn start(args: StartArgs, engine_config: &EngineConfig) -> anyhow::Result<()> {
    let params: SourceParams = args.source.into();
    let output_format: OutputFormat = args.format.into();
    let mut source = connect(&params).context("configuring data source")?;

    let report_name = format!(
        "{}_{}",
        args.experiment.replace([' ', '/'], "_"),
        chrono_timestamp()
    );
    let sink = CsvReportSink::create(&engine_config.reports_dir, &report_name, output_format)?;
    let mut manager = SessionManager::new(
        engine_config,
        Box::new(sink),
        Arc::new(PerformanceMonitor::new()),
    )?;
    let _sweeper = CacheSweeper::spawn(
        manager.diff_cache(),
        Duration::from_secs(engine_config.sweep_interval_secs),
    );

    let session_config = SessionConfig {
        experiment_name: args.experiment,
        source: params,
        sample_percentage: args.sample,
        output_format,
    };
    let session_id = manager
        .start_session(session_config, source.as_mut())
        .context("starting session")?;
    println!("session started: {session_id}");

    prompt::run_review_loop(&mut manager)
}

fn resume(session_id: &str, engine_config: &EngineConfig) -> anyhow::Result<()> {
    let sink =
        CsvReportSink::create(&engine_config.reports_dir, session_id, OutputFormat::Csv)?;
    let mut manager = SessionManager::new(
        engine_config,
        Box::new(sink),
        Arc::new(PerformanceMonitor::new()),
    )?;
    let _sweeper = CacheSweeper::spawn(
        manager.diff_cache(),
        Duration::from_secs(engine_config.sweep_interval_secs),
    );

    match manager.resume_session(session_id) {
        Ok(()) => {}
        Err(SessionError::Corrupted(reason)) => {
            eprintln!("session snapshot is corrupted: {reason}");
            if prompt::confirm("Discard the corrupted snapshot?")? {
                manager.discard_session(session_id)?;
                eprintln!("snapshot discarded; start a fresh session with `pairview start`");
            }
            return Ok(());
        }
        Err(err) => return Err(err).context("resuming session"),
    }

    if let Some(progress) = manager.progress() {
        println!(
            "resumed {session_id}: {}/{} reviewed ({:.1}%)",
            progress.completed_count, progress.total_count, progress.percent
        );
    }
    prompt::run_review_loop(&mut manager)
}

fn list_sessions(engine_config: &EngineConfig) -> anyhow::Result<()> {
    let store = SessionStore::new(&engine_config.sessions_dir)?;
    let sessions = store.list_sessions();
    if sessions.is_empty() {
        println!("no resumable sessions");
        return Ok(());
    }
    for session_id in sessions {
        match store.session_info(&session_id) {
            Some(info) => println!(
                "{session_id}  {}  {}/{} ({:.1}%)  last saved {}",
                info.experiment_name,
                info.progress.completed_count,
                info.progress.total_count,
                info.progress.percent,
                info.saved_at.format("%Y-%m-%d %H:%M:%S"),
            ),
            None => println!("{session_id}  [corrupted]"),
        }
    }
    Ok(())
}

fn cleanup(days: u64, engine_config: &EngineConfig) -> anyhow::Result<()> {
    anyhow::ensure!(days > 0, "days must be positive");
    let store = SessionStore::new(&engine_config.sessions_dir)?;
    let removed = store.cleanup_old_sessions(days);
    println!("removed {removed} stale session snapshot(s)");
    Ok(())
}

fn chrono_timestamp() -> String {
    chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
