//! sandbox-guard: watch sandboxed processes and kill confidently malicious
//! ones that stay inside their jail.
//!
//! ## Subcommands
//!
//! - `run`: spawn a command inside a jail root and guard it
//! - `watch`: guard an already running pid
//! - `events`: print recent audit events as JSON lines
//! - `sequences`: cut recorded runs into normalized training windows
//!
//! Configuration comes from `~/.sandbox-guard/guard.toml` unless `--config`
//! is given. Set `SANDBOX_GUARD_DEBUG_LOG=1` for debug logging.

mod guard;
mod logging;
mod offline;

use clap::{Parser, Subcommand};
use sandbox_guard::windowing::{DEFAULT_STRIDE, DEFAULT_WINDOW};
use sandbox_guard::{load_config, GuardFileConfig};
use std::path::PathBuf;
use std::process::ExitCode;

use crate::guard::GuardSession;

#[derive(Parser)]
#[command(name = "sandbox-guard")]
#[command(about = "Live ML guard for sandboxed processes")]
#[command(version)]
struct Cli {
    /// Path to guard.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for guard.log and the audit log
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Spawn a command inside a jail root and guard it
    Run {
        #[arg(long)]
        jail_root: PathBuf,

        /// Model artifact (defaults to paths.model from the config)
        #[arg(long)]
        model: Option<PathBuf>,

        #[arg(long)]
        run_id: Option<String>,

        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Guard an already running process
    Watch {
        #[arg(long)]
        pid: u32,

        #[arg(long)]
        jail_root: PathBuf,

        #[arg(long)]
        model: Option<PathBuf>,

        #[arg(long)]
        run_id: Option<String>,

        /// Command line recorded in audit events
        #[arg(long, num_args = 1..)]
        command: Vec<String>,
    },
    /// Print recent audit events
    Events {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Extract normalized windows from recorded runs
    Sequences {
        #[arg(long, num_args = 1.., required = true)]
        input: Vec<PathBuf>,

        #[arg(long, default_value_t = DEFAULT_WINDOW)]
        window: usize,

        #[arg(long, default_value_t = DEFAULT_STRIDE)]
        stride: usize,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = load_config(cli.config.clone());
    let log_dir = cli.log_dir.clone().or_else(|| {
        config
            .as_ref()
            .ok()
            .and_then(|config| config.log_dir().ok())
    });
    let _log_guard = logging::init(log_dir.as_deref());

    let config = match config {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "Failed to load guard config");
            return ExitCode::FAILURE;
        }
    };
    let Some(log_dir) = log_dir else {
        tracing::error!("Could not determine log directory; pass --log-dir");
        return ExitCode::FAILURE;
    };

    match dispatch(cli.command, config, log_dir) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            tracing::error!(error = %err, "sandbox-guard failed");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(command: Commands, config: GuardFileConfig, log_dir: PathBuf) -> Result<u8, String> {
    match command {
        Commands::Run {
            jail_root,
            model,
            run_id,
            command,
        } => {
            let model = model_path(model, &config)?;
            let session = GuardSession::new(config.guard, &model, &log_dir)?;
            let code = session.run(&jail_root, &command, run_id)?;
            Ok(u8::try_from(code).unwrap_or(1))
        }
        Commands::Watch {
            pid,
            jail_root,
            model,
            run_id,
            command,
        } => {
            let model = model_path(model, &config)?;
            let session = GuardSession::new(config.guard, &model, &log_dir)?;
            let outcome = session.watch(pid, &jail_root, command, run_id)?;
            println!("{:?}", outcome);
            Ok(0)
        }
        Commands::Events { limit } => offline::print_events(&log_dir, limit).map(|()| 0),
        Commands::Sequences {
            input,
            window,
            stride,
        } => offline::print_sequences(&input, window, stride).map(|()| 0),
    }
}

fn model_path(flag: Option<PathBuf>, config: &GuardFileConfig) -> Result<PathBuf, String> {
    flag.or_else(|| config.paths.model.clone())
        .ok_or_else(|| "No model given; pass --model or set paths.model".to_string())
}
