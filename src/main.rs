//! CinderKV server entry point.
//!
//! Sets up logging, restores the keyspace from the append-only file, and
//! serves clients until Ctrl+C.

use clap::Parser;
use cinderkv::commands::CommandHandler;
use cinderkv::config::Config;
use cinderkv::connection::{handle_connection, ConnectionStats};
use cinderkv::persistence::{load_aof, AofFile, Persistence};
use cinderkv::storage::{start_expiry_sweeper, StorageEngine};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!(version = cinderkv::VERSION, "Starting CinderKV");

    let storage = Arc::new(StorageEngine::new());
    let persistence = Arc::new(Persistence::new(
        Arc::clone(&storage),
        AofFile::new(&config.aof_file),
    ));
    let handler = CommandHandler::new(Arc::clone(&storage), Arc::clone(&persistence));

    if config.no_load {
        info!("Skipping append only file load");
    } else {
        let applied = load_aof(&config.aof_file, &handler)?;
        info!(
            path = %config.aof_file.display(),
            commands = applied,
            keys = storage.len(),
            "Keyspace restored"
        );
    }

    let _sweeper = config
        .active_expiry
        .then(|| start_expiry_sweeper(Arc::clone(&storage)));

    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("Listening on {}", config.bind_address());

    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping server..."),
            Err(e) => {
                error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = accept_loop(listener, handler, Arc::clone(&stats)) => {}
        _ = shutdown => {}
    }

    let storage_stats = storage.stats();
    let persistence_stats = persistence.stats();
    info!(
        keys = storage_stats.keys,
        gets = storage_stats.get_ops,
        sets = storage_stats.set_ops,
        dels = storage_stats.del_ops,
        expired = storage_stats.expired,
        "Storage stats"
    );
    info!(
        rewrites = persistence_stats.rewrites,
        failures = persistence_stats.failures,
        "Persistence stats"
    );
    info!(
        connections = stats.accepted.load(Ordering::Relaxed),
        commands = stats.commands.load(Ordering::Relaxed),
        bytes_in = stats.bytes_in.load(Ordering::Relaxed),
        bytes_out = stats.bytes_out.load(Ordering::Relaxed),
        "Connection stats"
    );

    info!("Server shutdown complete");
    Ok(())
}

async fn accept_loop(listener: TcpListener, handler: CommandHandler, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = handler.clone();
                let stats = Arc::clone(&stats);

                tokio::spawn(async move {
                    handle_connection(stream, addr, handler, stats).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
