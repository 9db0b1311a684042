use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use pushpoll::{
    broker::{spawn_sweeper, Broker},
    init_logging, run_server, Cli, Shutdown,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings().context("Failed to load settings")?;
    let logging = init_logging(settings.logging.clone()).context("Failed to init logging")?;

    let broker = Arc::new(Broker::new(settings.broker_config()));
    let shutdown = Arc::new(Shutdown::new());

    let sweeper = spawn_sweeper(
        broker.clone(),
        settings.reap_policy(),
        settings.sweep_interval(),
        shutdown.subscribe(),
    );

    let listener = TcpListener::bind(&settings.listen_address)
        .await
        .with_context(|| format!("Failed to bind {}", settings.listen_address))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %settings.listen_address,
        max_queue = settings.max_message_queue_size,
        arena_size = settings.arena_size,
        policy = ?settings.delivery_policy,
        "pushpoll started"
    );

    // Ctrl-C переводит сервер и чистильщик в режим остановки
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                signal.trigger();
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });

    let result = run_server(listener, broker, settings.server_config(), shutdown.subscribe()).await;

    shutdown.trigger();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Sweeper task failed");
    }
    info!("pushpoll stopped");
    logging.shutdown();
    result
}
