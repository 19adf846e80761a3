mod bootstrap;
mod config;
mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use keyward_agent::confirm::AskpassInteraction;
use keyward_agent::{Agent, Dispatcher};
use server::Server;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    // Hardening first: no core dumps, no swapped-out key material.
    bootstrap::harden_process();

    let config_path = parse_config_path();
    let config = config::load(&config_path)?;
    let socket_path = config.socket_path();

    let agent = Agent::shared(config.policy());
    let interaction = Arc::new(AskpassInteraction::new(config.confirm.askpass.clone()));
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&agent), interaction));

    // Expired identities are invisible to lookups the moment they die;
    // this task merely reclaims their memory.
    let reaper_agent = Arc::clone(&agent);
    tokio::spawn(async move {
        let interval = Duration::from_secs(30);
        loop {
            tokio::time::sleep(interval).await;
            if let Ok(mut agent) = reaper_agent.lock() {
                agent.reap(SystemTime::now());
            }
        }
    });

    let listener = server::bind(&socket_path)?;
    tracing::info!(socket = %socket_path.display(), "keywardd listening");
    tracing::info!(
        "clients reach this agent via KEYWARD_AUTH_SOCK={}",
        socket_path.display()
    );

    let server = Server::new(dispatcher, config.daemon.exit_on_last_client);
    let result = tokio::select! {
        r = server.run(listener) => r,
        _ = shutdown_signal() => {
            tracing::info!("received shutdown signal, exiting");
            Ok(())
        }
    };

    let _ = std::fs::remove_file(&socket_path);
    result
}

fn parse_config_path() -> PathBuf {
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        if args[i] == "--config" || args[i] == "-c" {
            if let Some(path) = args.get(i + 1) {
                return PathBuf::from(path);
            }
            eprintln!("error: --config requires a path argument");
            std::process::exit(1);
        }
        if let Some(path) = args[i].strip_prefix("--config=") {
            return PathBuf::from(path);
        }
        if args[i] == "--help" || args[i] == "-h" {
            eprintln!("Usage: keywardd [--config <path>]");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  -c, --config <path>  Path to config file (default: $XDG_CONFIG_HOME/keyward/config.toml)");
            eprintln!("  -h, --help           Show this help message");
            std::process::exit(0);
        }
        i += 1;
    }
    default_config_path()
}

fn default_config_path() -> PathBuf {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(|| {
            tracing::warn!("neither XDG_CONFIG_HOME nor HOME are set; using current directory");
            PathBuf::from(".")
        });
    base.join("keyward").join("config.toml")
}

/// Wait for ctrl-c (SIGINT) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}, falling back to SIGINT only");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
