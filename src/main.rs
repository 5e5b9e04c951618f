// SPDX-License-Identifier: Apache-2.0

//! Process entrypoint (spec §9's "Global singletons... replace with an
//! explicit `Server` aggregate"; spec §6 "Process control").
//!
//! Parses CLI flags, loads configuration, builds one [`relay_server::Server`],
//! registers a demonstration echo handler, and runs until `SIGINT`/`SIGTERM`
//! request a graceful shutdown. Exits `0` after a clean shutdown, non-zero on
//! a startup failure (bind error or invalid configuration), matching spec
//! §7's "Startup" policy ("log at fatal, exit non-zero").
//!
//! Grounded on the teacher's root-package CLI wiring (workspace `Cargo.toml`
//! `[[bin]]` plus `clap`-derived args).

use bytes::Bytes;
use clap::Parser;
use relay_config::{Config, LogLevel};
use relay_logging::{log_error, log_info, set_logger, Level, StderrLogger};
use relay_server::Server;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

const TARGET: &str = "relayd";

/// Length-prefixed TCP message server.
#[derive(Parser, Debug)]
#[command(name = "relayd", about = "Length-prefixed TCP message server")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "./relay.yaml")]
    config: PathBuf,
    /// Overrides `self_server.port` from the config file.
    #[arg(long)]
    port: Option<u16>,
    /// Raises the logging sink's minimum level to debug.
    #[arg(short, long)]
    verbose: bool,
}

fn to_logging_level(level: LogLevel) -> Level {
    match level {
        LogLevel::Debug => Level::Debug,
        LogLevel::Info => Level::Info,
        LogLevel::Warning => Level::Warning,
        LogLevel::Error => Level::Error,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            // The logging sink isn't installed yet; a config load failure is
            // fatal startup, so report it directly rather than through it.
            set_logger(Box::new(StderrLogger::default()));
            log_error!(TARGET, "failed to load configuration from {}: {err}", args.config.display());
            return ExitCode::FAILURE;
        }
    };
    if let Some(port) = args.port {
        config.self_server.port = port;
    }

    let min_level = if args.verbose {
        Level::Debug
    } else {
        to_logging_level(config.logging.level)
    };
    set_logger(Box::new(StderrLogger::new(min_level)));

    let server = Arc::new(Server::new(config));
    server.register_handler(1001, |session, _id, payload| {
        log_info!(TARGET, "echoing {} bytes back to session {}", payload.len(), session.id());
        let _ = session.send(1001, Bytes::from(b"pong".to_vec()));
    });

    if let Err(err) = server.start().await {
        log_error!(TARGET, "startup failed: {err}");
        return ExitCode::FAILURE;
    }
    log_info!(TARGET, "relayd running; press Ctrl+C to stop");

    wait_for_shutdown_signal().await;
    log_info!(TARGET, "shutdown signal received, draining");
    server.shutdown().await;

    ExitCode::SUCCESS
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
