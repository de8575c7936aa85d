//! `vigild`: runs the vigil engine and exposes its administrative
//! operations on the command line. One-shot commands print a JSON
//! `ApiResponse` envelope on stdout.

mod commands;
mod state;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::error;
use vigil::{init_logging, ExecutionMode, LogFormat};

use commands::{admin, batches, config, emit, live, workers, ApiResponse};
use state::DaemonState;

#[derive(Debug, Parser)]
#[command(name = "vigild")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (JSON). Defaults to `~/.vigil/config.json` when present.
    #[arg(long, global = true, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,

    /// Store location, overriding the configuration.
    #[arg(long, global = true, env = "VIGIL_DATABASE")]
    database: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run scheduler, process guard and maintenance until Ctrl-C.
    Run,
    /// Create a batch from source references.
    Enqueue {
        #[arg(required = true)]
        sources: Vec<String>,
        #[arg(long)]
        operator: Option<String>,
        #[arg(long, default_value = "headless")]
        mode: ExecutionMode,
    },
    /// List batches, newest first.
    Batches,
    /// Items of a batch.
    Items { batch: String },
    /// Log tail of a batch.
    Logs {
        batch: String,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Results of a batch, or the most recent results.
    Results {
        #[arg(long)]
        batch: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Headline counters.
    Summary,
    /// Close a batch as done with tallies from its results.
    Finalize { batch: String },
    /// Move failed items of a batch back to pending.
    Requeue { batch: String },
    /// Run one reconciliation pass.
    Reconcile,
    /// Run one scheduler tick.
    Launch,
    /// Worker process control.
    Workers {
        #[command(subcommand)]
        action: WorkersAction,
    },
    /// Stream snapshot events as JSON lines.
    Watch {
        #[arg(long)]
        batch: Option<String>,
    },
    /// Settings table.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Stored credentials.
    Credentials {
        #[command(subcommand)]
        action: CredentialsAction,
    },
}

#[derive(Debug, Subcommand)]
enum WorkersAction {
    List,
    Kill { pid: u32 },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Get { key: String },
    Set { key: String, value: String },
    List,
}

#[derive(Debug, Subcommand)]
enum CredentialsAction {
    List,
    /// Store a secret read from stdin.
    Set { username: String },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Human
    });

    let state = match DaemonState::open(cli.config.as_deref(), cli.database.as_deref()) {
        Ok(state) => state,
        Err(e) => {
            error!("Startup failed: {}", e);
            emit(ApiResponse::<()>::err(e.to_string()));
            return ExitCode::FAILURE;
        }
    };
    let orch = &state.orchestrator;

    let success = match cli.command {
        Command::Run => report(live::run(orch)),
        Command::Watch { batch } => report(live::watch(orch, batch)),
        Command::Enqueue {
            sources,
            operator,
            mode,
        } => emit(batches::enqueue(orch, &sources, operator.as_deref(), mode)),
        Command::Batches => emit(batches::list(orch)),
        Command::Items { batch } => emit(batches::items(orch, &batch)),
        Command::Logs { batch, limit } => emit(batches::logs(orch, &batch, limit)),
        Command::Results { batch, limit } => {
            emit(batches::results(orch, batch.as_deref(), limit))
        }
        Command::Summary => emit(batches::summary(orch)),
        Command::Finalize { batch } => emit(admin::finalize(orch, &batch)),
        Command::Requeue { batch } => emit(admin::requeue(orch, &batch)),
        Command::Reconcile => emit(admin::reconcile(orch)),
        Command::Launch => emit(admin::launch(orch)),
        Command::Workers { action } => match action {
            WorkersAction::List => emit(workers::list(orch)),
            WorkersAction::Kill { pid } => emit(workers::kill(orch, pid)),
        },
        Command::Config { action } => match action {
            ConfigAction::Get { key } => emit(config::get(orch, &key)),
            ConfigAction::Set { key, value } => emit(config::set(orch, &key, &value)),
            ConfigAction::List => emit(config::list(orch)),
        },
        Command::Credentials { action } => match action {
            CredentialsAction::List => emit(config::credential_users(orch)),
            CredentialsAction::Set { username } => emit(config::save_credential(orch, &username)),
        },
    };

    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn report(result: Result<(), String>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            error!("{}", e);
            false
        }
    }
}
