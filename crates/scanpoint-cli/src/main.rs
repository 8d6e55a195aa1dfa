//! Scanpoint terminal scan station
//!
//! Reads decoded codes from stdin (a keyboard-wedge scanner, a pipe, or a
//! person typing) and feeds them through the scan core against the
//! ticketing service. Lines starting with `:` are operator commands; see
//! [`console::HELP`].
//!
//! # Environment Variables
//!
//! - `SCANPOINT_CONFIG`: Optional. Path of the TOML configuration file
//! - `SCANPOINT_<SECTION>__<KEY>`: Optional. Override any configuration value,
//!   e.g. `SCANPOINT_SCANNER__EVENT_ID=spring-gala`
//! - `SCANPOINT_LOG_LEVEL` / `RUST_LOG`: Optional. Logging filter

mod console;
mod logging;

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use scanpoint_core::{
    default_config_path, HttpTicketingApi, ScanDisposition, ScanOrchestrator, ScanpointConfig,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use console::{Command, ConsoleFeedback, ConsoleSink};

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "SCANPOINT_CONFIG";

/// Configuration file named by `SCANPOINT_CONFIG`, if set.
fn config_override() -> Option<PathBuf> {
    std::env::var_os(CONFIG_ENV)
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}

/// Loads the configuration from `SCANPOINT_CONFIG`, else the platform default.
/// Returns the path it was read from alongside.
fn load_config() -> Result<(PathBuf, ScanpointConfig)> {
    let (path, loaded) = match config_override() {
        Some(path) => {
            let loaded = ScanpointConfig::load(&path);
            (path, loaded)
        }
        None => (default_config_path(), ScanpointConfig::load_default()),
    };
    let config =
        loaded.with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    Ok((path, config))
}

/// Everything a command needs.
struct Station {
    orchestrator: ScanOrchestrator,
    sink: Arc<ConsoleSink>,
    config: ScanpointConfig,
}

impl Station {
    fn new(config: ScanpointConfig) -> Result<Self> {
        let api = HttpTicketingApi::from_config(&config.api)
            .context("Failed to create ticketing client")?;
        let sink = Arc::new(ConsoleSink::new());
        let orchestrator = ScanOrchestrator::builder(Arc::new(api), sink.clone())
            .feedback(Arc::new(ConsoleFeedback))
            .config(&config.scanner)
            .build();
        Ok(Self {
            orchestrator,
            sink,
            config,
        })
    }

    fn handle(&self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Scan(code) => {
                // decodes keep arriving while one is validated, so never block input
                let orchestrator = self.orchestrator.clone();
                tokio::spawn(async move {
                    match orchestrator.on_scan_event(&code).await {
                        ScanDisposition::Ignored(reason) => debug!(code = %code, ?reason, "scan ignored"),
                        ScanDisposition::Handled(resolution) => {
                            debug!(code = %code, ?resolution, "scan handled");
                        }
                    }
                });
            }
            Command::Mode(mode) => {
                self.orchestrator.on_mode_change(mode);
                println!("mode: {mode}");
            }
            Command::ToggleMode => {
                let mode = self.orchestrator.mode().toggled();
                self.orchestrator.on_mode_change(mode);
                println!("mode: {mode}");
            }
            Command::Event(event_id) => {
                self.orchestrator.set_event(event_id);
                println!("event: {}", self.orchestrator.status().event_id);
            }
            Command::Ack => {
                if !self.orchestrator.acknowledge() {
                    println!("nothing to acknowledge");
                }
            }
            Command::Done(codes) => {
                // offered codes belong to the pending hand-off; keep them until there is one
                if !self.orchestrator.phase().is_handoff() {
                    println!("nothing to confirm");
                    return ControlFlow::Continue(());
                }
                let codes = if codes.is_empty() {
                    self.sink.take_offered()
                } else {
                    codes
                };
                if self.orchestrator.complete_handoff(codes.as_slice()) {
                    println!("confirmed {} ticket(s)", codes.len());
                } else {
                    println!("nothing to confirm");
                }
            }
            Command::Cancel => {
                if self.orchestrator.cancel_handoff() {
                    self.sink.take_offered();
                } else {
                    println!("nothing to cancel");
                }
            }
            Command::Resume => self.orchestrator.resume_scanning(),
            Command::Status => {
                let status = self.orchestrator.status();
                println!(
                    "mode={} event={} phase={:?} scanning={} failsafe={} auto_resume={} last={}",
                    status.mode,
                    if status.event_id.is_empty() { "-" } else { status.event_id.as_str() },
                    status.phase,
                    status.scanning_enabled,
                    status.failsafe_armed,
                    status.auto_resume_armed,
                    status.last_code.as_deref().unwrap_or("-"),
                );
            }
            Command::Config => match self.config.to_toml() {
                Ok(text) => print!("{text}"),
                Err(e) => error!("Failed to render configuration: {}", e),
            },
            Command::Help => println!("{}", console::HELP),
            Command::Quit => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => Ok("SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}

/// Setup signal handlers for graceful shutdown
fn setup_signal_handlers() -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(signal) => {
                info!("Received {}, initiating shutdown...", signal);
                let _ = tx.send(());
            }
            Err(e) => {
                error!("Failed to install signal handlers: {}", e);
                // hold the sender so the shutdown branch never fires
                let _tx = tx;
                std::future::pending::<()>().await;
            }
        }
    });

    rx
}

#[tokio::main]
async fn main() -> Result<()> {
    let (path, config) = load_config()?;

    logging::init(&config.logging).context("Failed to initialize logging")?;

    info!(
        config = %path.display(),
        api = %config.api.base_url,
        mode = %config.scanner.mode,
        "Scanpoint starting..."
    );
    if config.scanner.event_id.is_none() {
        warn!("No event configured, select one with :event <id> before scanning");
    }

    let station = Station::new(config)?;

    let mut scanning = station.orchestrator.scanning();
    tokio::spawn(async move {
        while scanning.changed().await.is_ok() {
            let enabled = *scanning.borrow_and_update();
            debug!(enabled, "scanning flag changed");
            if enabled {
                println!("-- ready to scan --");
            }
        }
    });

    let mut shutdown_rx = setup_signal_handlers();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", console::HELP);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    info!("Input closed");
                    break;
                };
                match console::parse(&line) {
                    Ok(Some(command)) => {
                        if station.handle(command).is_break() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(message) => println!("{message}"),
                }
            }
            Ok(()) = &mut shutdown_rx => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Scanpoint shutdown complete");
    Ok(())
}
