// simmel: proximity token exchange over Bluetooth LE
//
// Cross-platform (macOS, Linux, Windows) command-line front end for
// simmel-core: runs the scan/advertise scheduler on the host adapter, drives
// a two-device simulation, and manages the persisted configuration.

mod config;
mod hardware;
mod simulate;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use simmel_core::transport::ble::scan_response;
use simmel_core::{
    AdvertisingPayload, ProximityEvent, RandomTokenProvider, RoundScheduler, SoftwareWatchdog,
    TokioClock,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "simmel")]
#[command(about = "Simmel: proximity token exchange over Bluetooth LE", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write daily-rotated log files to this directory
    #[arg(long, global = true)]
    log_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for peers on the host Bluetooth adapter
    Run {
        /// Stop after this many rounds (default: run forever)
        #[arg(short, long)]
        rounds: Option<u64>,
    },
    /// Run two simulated devices against each other
    Simulate {
        #[arg(short, long, default_value = "3")]
        rounds: u64,
        /// Seconds between starting the two devices (default: scan timeout)
        #[arg(short, long)]
        offset: Option<u64>,
    },
    /// Print a freshly built advertising payload
    Payload,
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    /// Show where the config file lives
    Path,
}

fn init_logging(verbose: bool, log_dir: Option<&str>) -> Option<WorkerGuard> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(if verbose {
                "simmel_core=debug,simmel=debug"
            } else {
                "warn"
            })
        })
    };
    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter());

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "simmel.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            tracing_subscriber::registry().with(stderr).with(file).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(stderr).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;

    let log_dir = cli.log_dir.clone().or_else(|| config.log_dir.clone());
    let _guard = init_logging(cli.verbose, log_dir.as_deref());

    match cli.command {
        Commands::Run { rounds } => cmd_run(config, rounds).await,
        Commands::Simulate { rounds, offset } => cmd_simulate(config, rounds, offset).await,
        Commands::Payload => cmd_payload(config),
        Commands::Config { action } => cmd_config(config, action),
    }
}

async fn cmd_run(config: config::Config, rounds: Option<u64>) -> Result<()> {
    let protocol = config.protocol;

    println!("{}", "Starting Simmel...".bold());
    let adapter = Arc::new(
        hardware::HostAdapter::open()
            .await
            .context("Failed to open Bluetooth adapter")?,
    );
    println!("  {} Bluetooth adapter opened", "✓".green());
    println!(
        "  {} Host stack is central-only: reading peers, not advertising",
        "!".yellow()
    );

    let watchdog = Arc::new(SoftwareWatchdog::arm(protocol.watchdog_timeout(), || {
        eprintln!("watchdog expired, exiting");
        std::process::exit(1);
    }));
    println!(
        "  {} Watchdog armed ({}s)",
        "✓".green(),
        protocol.watchdog_timeout_secs
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<ProximityEvent>();
    let tokens = Box::new(RandomTokenProvider::new(protocol.token_len));
    let mut scheduler = RoundScheduler::new(
        protocol,
        adapter,
        Arc::new(TokioClock::new()),
        watchdog,
        tokens,
    )?
    .with_events(tx);

    println!(
        "  {} Local token {}",
        "✓".green(),
        scheduler.local_token().fingerprint().cyan()
    );
    println!();
    println!("{}", "Press Ctrl+C to stop".dimmed());

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            simulate::print_event("local", &event);
        }
    });

    tokio::select! {
        _ = async {
            match rounds {
                Some(n) => {
                    scheduler.run_rounds(n).await;
                }
                None => scheduler.run().await,
            }
        } => {}
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("{}", "Stopped".bold());
        }
    }

    Ok(())
}

async fn cmd_simulate(config: config::Config, rounds: u64, offset: Option<u64>) -> Result<()> {
    let protocol = config.protocol;
    let offset = Duration::from_secs(offset.unwrap_or(protocol.scan_timeout_secs));

    println!("{}", "Simulating two devices".bold());
    println!("  {} {} round(s), offset {:?}", "•".bright_black(), rounds, offset);
    println!();

    let summary = simulate::run(&protocol, rounds, offset).await?;

    println!();
    println!("{}", "Summary".bold());
    for (name, reports, watchdog_ok) in [
        ("A", &summary.a_rounds, summary.a_watchdog_ok),
        ("B", &summary.b_rounds, summary.b_watchdog_ok),
    ] {
        let mark = if watchdog_ok { "✓".green() } else { "✗".red() };
        println!(
            "  {} {}: {} token(s) read, watchdog {}",
            mark,
            name,
            simulate::Summary::tokens_read(reports),
            if watchdog_ok { "fed" } else { "starved" }
        );
    }
    Ok(())
}

fn cmd_payload(config: config::Config) -> Result<()> {
    let protocol = config.protocol;
    let uuid = protocol.service_uuid()?;
    let payload = AdvertisingPayload::build(&uuid, 0, &mut rand::thread_rng())?;

    println!("{}", "Advertising payload".bold());
    println!("  {} {}", "Service:".bold(), uuid);
    println!(
        "  {} {} ({} bytes)",
        "Bytes:".bold(),
        payload.to_string().cyan(),
        payload.len()
    );
    println!("  {} {:06x}", "Hash:".bold(), payload.rand_hash());
    match protocol.adapter_name.as_deref() {
        Some(name) => println!(
            "  {} {}",
            "Scan response:".bold(),
            hex::encode(scan_response(name)?)
        ),
        None => println!("  {} {}", "Scan response:".bold(), "(anonymous)".dimmed()),
    }
    Ok(())
}

fn cmd_config(mut config: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} {} = {}", "✓".green(), key.bold(), value);
        }
        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{}", value),
            None => anyhow::bail!("Unknown config key: {}", key),
        },
        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            for (key, value) in config.list() {
                println!("  {:<26} {}", key.bold(), value);
            }
        }
        ConfigAction::Path => {
            println!("{}", config::Config::config_file()?.display());
        }
    }
    Ok(())
}
