//! launcherctl
//!
//! Command line front end for the launcher library: list the launchers on
//! the bus, watch them come and go, and drive one of them.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use common::setup_logging;
use launcher::bus::UsbBus;
use launcher::{Controller, Direction, Error, Launcher, LauncherArray, LauncherEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "launcherctl")]
#[command(author, version, about = "Control USB launchers")]
#[command(long_about = "
Discovers USB launchers, tracks them as they are plugged and unplugged, and
sends commands to a claimed launcher.

EXAMPLES:
    # List launchers currently attached
    launcherctl list

    # Print arrivals and removals until Ctrl+C
    launcherctl watch

    # Fire the second launcher
    launcherctl fire --launcher 1

    # Turn left for 800 ms
    launcherctl move left --millis 800

CONFIGURATION:
    launcherctl looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/launcher/launcherctl.toml
    3. /etc/launcher/launcherctl.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached launchers
    List,
    /// Poll continuously and print launcher events
    Watch,
    /// Fire one missile
    Fire {
        #[arg(short, long, default_value_t = 0)]
        launcher: usize,
    },
    /// Move for a while, then stop
    Move {
        /// up, down, left or right
        direction: Direction,
        #[arg(short, long, default_value_t = 500)]
        millis: u64,
        #[arg(short, long, default_value_t = 0)]
        launcher: usize,
    },
    /// Switch the LED
    Led {
        #[arg(value_enum)]
        state: LedArg,
        #[arg(short, long, default_value_t = 0)]
        launcher: usize,
    },
    /// Drive the launcher to its lower-left position
    Zero {
        #[arg(short, long, default_value_t = 0)]
        launcher: usize,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LedArg {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = config::LauncherctlConfig::default();
        let path = config::LauncherctlConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        config::load_config(path).context("Failed to load configuration")?
    } else {
        config::LauncherctlConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.general.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("launcherctl v{}", env!("CARGO_PKG_VERSION"));

    let controller = Arc::new(
        Controller::init_usb(config.controller_options())
            .context("Failed to initialize USB backend")?,
    );

    let command = args.command.unwrap_or(Command::List);
    let result = match command {
        Command::Watch => watch(controller.clone()).await,
        command => {
            if config.polling.auto_start {
                controller
                    .start_polling()
                    .context("Failed to start polling")?;
            }
            let controller = controller.clone();
            tokio::task::spawn_blocking(move || run_command(&controller, command))
                .await
                .context("Command task failed")?
        }
    };

    if let Err(e) = controller.cleanup() {
        warn!("Cleanup failed: {}", e);
    }
    result
}

/// Run a one-shot command against the launchers found by a fresh scan
fn run_command(controller: &Controller<UsbBus>, command: Command) -> Result<()> {
    let report = controller.refresh().context("Failed to scan for launchers")?;
    for (key, e) in &report.failures {
        warn!("Launcher {} not tracked: {}", key, e);
    }
    let launchers = controller.launchers().context("Failed to list launchers")?;

    let result = match command {
        Command::List => {
            print_launchers(&launchers);
            Ok(())
        }
        Command::Fire { launcher } => with_claimed(&launchers, launcher, |l| l.fire()),
        Command::Move {
            direction,
            millis,
            launcher,
        } => with_claimed(&launchers, launcher, |l| {
            l.move_for(direction, Duration::from_millis(millis))
        }),
        Command::Led { state, launcher } => with_claimed(&launchers, launcher, |l| match state {
            LedArg::On => l.led_on(),
            LedArg::Off => l.led_off(),
        }),
        Command::Zero { launcher } => with_claimed(&launchers, launcher, |l| l.zero()),
        Command::Watch => Ok(()),
    };

    launchers.free().context("Failed to release launchers")?;
    result
}

fn print_launchers(launchers: &LauncherArray<UsbBus>) {
    if launchers.is_empty() {
        println!("No launchers found.");
        return;
    }

    println!("Found {} launcher(s):\n", launchers.len());
    for (index, launcher) in launchers.iter().enumerate() {
        println!("  [{}] {} on {}", index, launcher.kind(), launcher.key());
    }
}

/// Claim the selected launcher, run `action`, and unclaim it again
fn with_claimed<F>(launchers: &LauncherArray<UsbBus>, index: usize, action: F) -> Result<()>
where
    F: FnOnce(&Launcher<UsbBus>) -> launcher::Result<()>,
{
    if launchers.is_empty() {
        return Err(Error::NoLaunchers.into());
    }
    let launcher = launchers
        .get(index)
        .with_context(|| format!("No launcher at index {}", index))?;

    launcher
        .claim()
        .with_context(|| format!("Failed to claim launcher {}", launcher.key()))?;
    let result = action(launcher.as_ref());
    if let Err(e) = launcher.unclaim() {
        warn!("Failed to unclaim launcher {}: {}", launcher.key(), e);
    }
    result.with_context(|| format!("Command to launcher {} failed", launcher.key()))
}

/// Poll until Ctrl+C, printing registry events
async fn watch(controller: Arc<Controller<UsbBus>>) -> Result<()> {
    let mut events = controller.subscribe();
    controller
        .start_polling()
        .context("Failed to start polling")?;
    info!(
        "Watching for launchers every {}s, press Ctrl+C to stop",
        controller.poll_rate()?
    );

    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Error waiting for Ctrl+C: {}", e);
                }
                info!("Received Ctrl+C, stopping");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(missed)) => {
                    warn!("Missed {} launcher events", missed);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    let stopper = controller.clone();
    tokio::task::spawn_blocking(move || stopper.stop_polling())
        .await
        .context("Stop task failed")?
        .context("Failed to stop polling")?;
    Ok(())
}

fn print_event(event: &LauncherEvent) {
    match event {
        LauncherEvent::Arrived { key, kind } => println!("+ {} {}", kind, key),
        LauncherEvent::Disconnected { key, ref_count } => {
            println!("- {} disconnected ({} references held)", key, ref_count)
        }
        LauncherEvent::Reconnected { key } => println!("+ {} reconnected", key),
        LauncherEvent::Removed { key } => println!("x {} removed", key),
    }
}
