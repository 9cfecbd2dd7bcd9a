//! vpsman CLI entry point.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vpsman::config::ManagerConfig;
use vpsman::LifecycleManager;

mod cli;

/// vpsman - lifecycle manager for QEMU-backed virtual private servers
#[derive(Parser, Debug)]
#[command(name = "vpsman")]
#[command(about = "Lifecycle manager for QEMU-backed virtual private servers")]
#[command(version)]
struct Cli {
    /// Config file (default: $VPSMAN_CONFIG, then the per-user config).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable debug logging (or set RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Provision a new instance (stopped unless --start).
    Create(cli::create::CreateCmd),

    /// Start a stopped instance.
    Start(cli::start::StartCmd),

    /// Stop a running instance.
    Stop(cli::stop::StopCmd),

    /// Stop, pause, and start an instance again.
    Restart(cli::restart::RestartCmd),

    /// Delete an instance and its files.
    #[command(alias = "rm")]
    Delete(cli::delete::DeleteCmd),

    /// List instances.
    #[command(alias = "ls")]
    List(cli::list::ListCmd),

    /// Show one instance.
    Info(cli::info::InfoCmd),

    /// Issue a new login password (applied on next boot).
    RotatePassword(cli::rotate_password::RotatePasswordCmd),

    /// Print the tail of an instance's console log.
    Logs(cli::logs::LogsCmd),

    /// Show resource usage of an instance.
    Stats(cli::stats::StatsCmd),

    /// Show totals, usage counters, and host resources.
    Usage(cli::usage::UsageCmd),

    /// Remove files left behind by deleted or failed instances.
    Sweep(cli::sweep::SweepCmd),

    /// Check host dependencies.
    Check(cli::check::CheckCmd),

    /// Start the HTTP API server.
    Serve(cli::serve::ServeCmd),
}

fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    tracing::debug!(version = vpsman::VERSION, "starting vpsman");

    if let Err(e) = run(cli) {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> vpsman::Result<()> {
    let config = ManagerConfig::load(cli.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(vpsman::Error::Io)?;

    runtime.block_on(async move {
        // The dependency check must work before the working directory exists.
        if let Commands::Check(cmd) = &cli.command {
            return cmd.run(&config).await;
        }

        let manager = LifecycleManager::open(config).await?;
        match cli.command {
            Commands::Create(cmd) => cmd.run(&manager).await,
            Commands::Start(cmd) => cmd.run(&manager).await,
            Commands::Stop(cmd) => cmd.run(&manager).await,
            Commands::Restart(cmd) => cmd.run(&manager).await,
            Commands::Delete(cmd) => cmd.run(&manager).await,
            Commands::List(cmd) => cmd.run(&manager),
            Commands::Info(cmd) => cmd.run(&manager),
            Commands::RotatePassword(cmd) => cmd.run(&manager).await,
            Commands::Logs(cmd) => cmd.run(&manager).await,
            Commands::Stats(cmd) => cmd.run(&manager).await,
            Commands::Usage(cmd) => cmd.run(&manager).await,
            Commands::Sweep(cmd) => cmd.run(&manager).await,
            Commands::Serve(cmd) => cmd.run(Arc::new(manager)).await,
            Commands::Check(_) => Ok(()),
        }
    })
}

/// Initialize the tracing subscriber.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "vpsman=debug" } else { "vpsman=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
