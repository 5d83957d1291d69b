//! ccnfd: the forwarder daemon.
//!
//! Boots the single-threaded reactor, optionally replays a startup command
//! file through the control handler, and runs until a shutdown signal.
//! Exit codes: 0 on clean shutdown, 1 when initialization fails, 2 on an
//! unrecoverable runtime failure.

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use rust_ccnf_fwd::{Dispatcher, DispatcherHandle, ForwarderConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::task::LocalSet;

/// ccnf forwarder daemon
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Startup command file: one control command per line
    /// (`cmd=add-connection type=udp peer=... name=...`); `#` comments and
    /// blank lines are skipped
    command_file: Option<PathBuf>,

    /// Configuration file (TOML)
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Data-plane listen address (UDP), overriding the configuration
    #[clap(long)]
    listen: Option<SocketAddr>,

    /// Control listen address (TCP), overriding the configuration
    #[clap(long)]
    control: Option<SocketAddr>,

    /// Sets the level of verbosity
    #[clap(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "info" }),
    )
    .init();

    let mut config = match ForwarderConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("initialization failed: {e:#}");
            return ExitCode::from(1);
        }
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(control) = cli.control {
        config.control = control;
    }

    let startup = match cli.command_file.as_deref().map(std::fs::read_to_string) {
        None => None,
        Some(Ok(text)) => Some(text),
        Some(Err(e)) => {
            error!("initialization failed: cannot read command file: {e}");
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("initialization failed: {e}");
            return ExitCode::from(1);
        }
    };

    let (mut dispatcher, handle) = Dispatcher::new(config);
    if let Err(e) = runtime.block_on(dispatcher.bind()) {
        error!("initialization failed: {e:#}");
        return ExitCode::from(1);
    }

    match runtime.block_on(run(dispatcher, handle, startup)) {
        Ok(()) => {
            info!("clean shutdown");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("unrecoverable runtime failure: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(
    dispatcher: Dispatcher,
    handle: DispatcherHandle,
    startup: Option<String>,
) -> Result<()> {
    let local = LocalSet::new();
    local
        .run_until(async move {
            let reactor = tokio::task::spawn_local(dispatcher.run());

            if let Some(text) = startup {
                replay_startup(&handle, &text).await;
            }

            let signal_handle = handle.clone();
            tokio::task::spawn_local(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received");
                    signal_handle.shutdown().await;
                }
            });

            reactor.await.context("reactor task failed")?
        })
        .await
}

/// Feeds each startup command through the control handler; refusals are
/// logged and skipped, matching how a mistyped command behaves at runtime.
async fn replay_startup(handle: &DispatcherHandle, text: &str) {
    let mut seq = 0u64;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        seq += 1;
        match handle.control_line(format!("seq={seq} {line}")).await {
            Ok(reply) if reply.contains("status=ack") => info!("startup: {line}"),
            Ok(reply) => warn!("startup command '{line}' refused: {reply}"),
            Err(e) => warn!("startup command '{line}' failed: {e}"),
        }
    }
}
