use std::sync::Arc;

use anyhow::Result;
use tokio::{net::TcpListener, select};
use tracing::{error, info, warn};

use super::connection::{ConnectionManager, ServerConfig};
use crate::{broker::Broker, shutdown::ShutdownSignal};

/// Цикл приёма соединений.
///
/// Каждое соединение обслуживается в отдельной задаче. После сигнала
/// `shutdown` приём прекращается, активным соединениям рассылается
/// уведомление, и сервер ждёт их закрытия не дольше `shutdown_timeout`.
pub async fn run_server(
    listener: TcpListener,
    broker: Arc<Broker>,
    config: ServerConfig,
    mut shutdown: ShutdownSignal,
) -> Result<()> {
    let shutdown_timeout = config.shutdown_timeout;
    let manager = Arc::new(ConnectionManager::new(config));

    info!(addr = %listener.local_addr()?, "Listening for connections");

    loop {
        let accepted = select! {
            _ = shutdown.wait() => break,
            accepted = listener.accept() => accepted,
        };

        let (socket, addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                // ошибки accept (например, EMFILE) не должны ронять сервер
                warn!(error = %e, "Failed to accept connection");
                continue;
            }
        };

        if let Err(e) = socket.set_nodelay(true) {
            warn!(%addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let manager = manager.clone();
        let broker = broker.clone();
        tokio::spawn(async move {
            // ошибки уже залогированы менеджером
            let _ = manager.handle_connection(socket, addr, broker).await;
        });
    }

    info!(
        active = manager.active_connections(),
        "Stopped accepting connections"
    );
    manager.shutdown();
    if let Err(e) = manager.wait_for_shutdown(shutdown_timeout).await {
        error!(error = %e, "Connections did not close in time");
    }
    Ok(())
}
