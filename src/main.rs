//! rpicamd: Raspberry Pi camera daemon
//!
//! Owns the camera and serves local clients over a loopback line protocol.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rpicamd::config::{
    Config, LifecycleConfig, LogLevel, PathOverrides, DEFAULT_BASE_DIR, DEFAULT_DAEMON_NAME,
};

#[derive(Parser)]
#[command(name = "rpicamd")]
#[command(about = "Camera daemon serving stills, video and settings to local clients")]
#[command(version)]
struct Cli {
    /// Print additional messages to stdout
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Daemon name, used in file names and logs
    #[arg(short, long, global = true, default_value = DEFAULT_DAEMON_NAME)]
    name: String,

    /// Base directory for derived PID, log and working directory paths
    #[arg(short, long, global = true, default_value = DEFAULT_BASE_DIR)]
    dir: PathBuf,

    /// Override PID file path
    #[arg(short, long = "pid_file", global = true)]
    pid_file: Option<PathBuf>,

    /// Override working directory
    #[arg(short, long = "working_directory", global = true)]
    working_directory: Option<PathBuf>,

    /// Override log file path
    #[arg(short, long = "log_file", global = true)]
    log_file: Option<PathBuf>,

    /// Override path for stdout
    #[arg(short, long = "stdout_file", global = true)]
    stdout_file: Option<PathBuf>,

    /// Override path for stderr
    #[arg(short = 'e', long = "stderr_file", global = true)]
    stderr_file: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the daemon
    Start {
        /// Stay attached to the terminal
        #[arg(long)]
        foreground: bool,
    },

    /// Stop the running daemon
    Stop,

    /// Stop, then start the daemon
    Restart {
        /// Stay attached to the terminal
        #[arg(long)]
        foreground: bool,
    },

    /// Check daemon status
    Status,

    /// Fetch one JPEG from the running daemon
    Snapshot {
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_or_default(cli.config.as_deref())?;

    let foreground = matches!(
        cli.command,
        Commands::Start { foreground: true } | Commands::Restart { foreground: true }
    );
    let lifecycle = LifecycleConfig::resolve(
        &cli.name,
        &cli.dir,
        PathOverrides {
            pid_file: cli.pid_file,
            working_directory: cli.working_directory,
            log_file: cli.log_file,
            stdout_file: cli.stdout_file,
            stderr_file: cli.stderr_file,
        },
    )
    .with_verbose(cli.verbose)
    .with_foreground(foreground);

    match cli.command {
        // The daemon installs its own subscriber once it has detached
        Commands::Start { .. } => commands::daemon::start(lifecycle, config),
        Commands::Restart { .. } => commands::daemon::restart(lifecycle, config),
        Commands::Stop => {
            rpicamd::logging::init_console(LogLevel::Warn.with_verbose(cli.verbose))?;
            commands::daemon::stop(lifecycle)
        }
        Commands::Status => {
            rpicamd::logging::init_console(LogLevel::Warn.with_verbose(cli.verbose))?;
            commands::daemon::status(lifecycle);
            Ok(())
        }
        Commands::Snapshot { output } => {
            rpicamd::logging::init_console(LogLevel::Warn.with_verbose(cli.verbose))?;
            commands::snapshot::snapshot(&config, output)
        }
    }
}
