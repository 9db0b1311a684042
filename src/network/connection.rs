use std::{
    io::ErrorKind,
    net::{IpAddr, SocketAddr},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use dashmap::DashMap;
use pushpoll_error::{LogLevel, ProtocolError, StackError};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    select,
    sync::{OwnedSemaphorePermit, Semaphore},
    time::{timeout, Instant},
};
use tracing::{debug, error, info, trace, warn};

use super::{
    dispatch::dispatch,
    protocol::{Command, Reply},
};
use crate::{
    broker::Broker,
    shutdown::{Shutdown, ShutdownSignal},
};

/// Конфигурация сетевого сервера и обработки соединений
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Максимальное кол-во одновременных соединений
    pub max_connections: usize,
    /// Максимальное кол-во соединений с одного IP
    pub max_connections_per_ip: usize,
    /// Сколько ждать следующую команду до закрытия соединения
    pub idle_timeout: Duration,
    /// Сколько ждать окончания уже начатой строки команды
    pub read_timeout: Duration,
    /// Таймаут записи ответа
    pub write_timeout: Duration,
    /// Размер буфера для чтения
    pub read_buffer_size: usize,
    /// Максимальная длина строки команды
    pub max_line_length: usize,
    /// Таймаут SUB, если клиент его не указал
    pub default_subscribe_timeout: Duration,
    /// Верхняя граница таймаута SUB
    pub max_subscribe_timeout: Duration,
    /// Сколько ждать закрытия соединений при остановке
    pub shutdown_timeout: Duration,
}

/// Менеджер соединений: лимиты и graceful shutdown
#[derive(Debug)]
pub struct ConnectionManager {
    config: ServerConfig,
    /// Семафор для общего лимита соединений
    connection_semaphore: Arc<Semaphore>,
    /// Счётчик соединений по IP адресам
    ip_connections: DashMap<IpAddr, usize>,
    /// Общий счётчик активных соединений
    active_connections: AtomicUsize,
    /// Сигнал для graceful shutdown; запоминается, поэтому его видят и
    /// соединения, занятые в момент остановки
    shutdown: Shutdown,
    /// Счётчик для генерации ID соединений
    connection_counter: AtomicU64,
}

/// Обработчик отдельного соединения
pub struct ConnectionHandler {
    connection_id: u64,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    addr: SocketAddr,
    broker: Arc<Broker>,
    config: ServerConfig,
    shutdown: ShutdownSignal,
}

/// Что прочитано из сокета.
enum Incoming {
    Line(String),
    Closed,
    Idle,
    /// Строка прочитана целиком, но не годится; соединение продолжается.
    Rejected(StackError),
    /// Поток сбит посреди строки; соединение закрывается.
    Invalid(Reply),
}

impl ConnectionManager {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            connection_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            config,
            ip_connections: DashMap::new(),
            active_connections: AtomicUsize::new(0),
            shutdown: Shutdown::new(),
            connection_counter: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Получение текущего кол-ва активных соединений
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Инициализация graceful shutdown
    pub fn shutdown(&self) {
        info!("Initiating graceful shutdown for connection manager");
        self.shutdown.trigger();
    }

    /// Ждать завершения всех активных соединений
    pub async fn wait_for_shutdown(
        &self,
        timeout_duration: Duration,
    ) -> Result<()> {
        let start = Instant::now();

        while self.active_connections() > 0 {
            if start.elapsed() > timeout_duration {
                warn!(
                    active = self.active_connections(),
                    "Shutdown timeout reached with active connections"
                );
                return Err(anyhow!("Shutdown timeout exceeded"));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        info!("All connections closed gracefully");
        Ok(())
    }

    /// Обрабатывает новое соединение
    pub async fn handle_connection(
        &self,
        mut socket: TcpStream,
        addr: SocketAddr,
        broker: Arc<Broker>,
    ) -> Result<()> {
        let _permit = match self.admit(addr) {
            Ok(permit) => permit,
            Err(e) => {
                warn!(%addr, error = %e, "Connection rejected");
                let reply = Reply::Error(e.to_string()).encode();
                let _ = timeout(self.config.write_timeout, socket.write_all(&reply)).await;
                return Err(e);
            }
        };

        let connection_count = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        let connection_id = self.connection_counter.fetch_add(1, Ordering::Relaxed) + 1;

        info!(
            connection_id,
            %addr,
            active = connection_count,
            "Connection established"
        );

        let handler = ConnectionHandler::new(
            connection_id,
            socket,
            addr,
            broker,
            self.config.clone(),
            self.shutdown.subscribe(),
        );

        let result = handler.run().await;

        self.release_ip(addr.ip());
        let remaining = self.active_connections.fetch_sub(1, Ordering::Relaxed) - 1;

        match &result {
            Ok(_) => debug!(connection_id, %addr, remaining, "Connection closed"),
            Err(e) => error!(
                connection_id,
                %addr,
                remaining,
                error = %e,
                "Connection closed with error"
            ),
        }

        result
    }

    /// Проверяет общий лимит и лимит по IP, резервируя место
    fn admit(
        &self,
        addr: SocketAddr,
    ) -> Result<OwnedSemaphorePermit> {
        let permit = self
            .connection_semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| anyhow!("Maximum connections limit reached"))?;

        let ip = addr.ip();
        let mut count = self.ip_connections.entry(ip).or_insert(0);
        if *count >= self.config.max_connections_per_ip {
            return Err(anyhow!("Too many connections from IP: {ip}"));
        }
        *count += 1;
        Ok(permit)
    }

    /// Уменьшить счётчик соединений для IP
    fn release_ip(
        &self,
        ip: IpAddr,
    ) {
        if let Some(mut count) = self.ip_connections.get_mut(&ip) {
            *count = count.saturating_sub(1);
        }
        // удаляем запись, если соединений больше нет
        self.ip_connections.remove_if(&ip, |_, count| *count == 0);
    }
}

impl ConnectionHandler {
    fn new(
        connection_id: u64,
        socket: TcpStream,
        addr: SocketAddr,
        broker: Arc<Broker>,
        config: ServerConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        let (read_half, write_half) = socket.into_split();
        let reader = BufReader::with_capacity(config.read_buffer_size, read_half);

        Self {
            connection_id,
            reader,
            writer: write_half,
            addr,
            broker,
            config,
            shutdown,
        }
    }

    /// Основной цикл обработки соединения.
    async fn run(mut self) -> Result<()> {
        let (connection_id, addr) = (self.connection_id, self.addr);
        let mut shutdown = self.shutdown.clone();

        loop {
            let incoming = select! {
                _ = shutdown.wait() => None,
                incoming = self.read_line() => Some(incoming?),
            };

            let line = match incoming {
                None => {
                    info!(connection_id, %addr, "Received shutdown signal");
                    self.send(&Reply::Error("Server shutting down".to_string())).await?;
                    break;
                }
                Some(incoming) => incoming,
            };

            let line = match line {
                Incoming::Line(line) => line,
                Incoming::Closed => {
                    debug!(connection_id, %addr, "Client closed connection");
                    break;
                }
                Incoming::Idle => {
                    warn!(connection_id, %addr, "Idle timeout");
                    self.send(&Reply::Error("Connection idle timeout".to_string()))
                        .await?;
                    break;
                }
                Incoming::Rejected(err) => {
                    let reply = self.command_failed(&err);
                    self.send(&reply).await?;
                    continue;
                }
                Incoming::Invalid(reply) => {
                    // поток мог остановиться посреди строки: дальше читать нельзя
                    self.send(&reply).await?;
                    break;
                }
            };

            trace!(connection_id, %addr, command = %line.trim(), "Received command");

            let command = match Command::parse(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(e) => {
                    debug!(connection_id, error = %e, "Bad command");
                    self.send(&Reply::from_error(&e)).await?;
                    continue;
                }
            };

            let quit = command == Command::Quit;
            let Some(reply) = self.execute(command).await else {
                info!(connection_id, %addr, "Shutdown during subscribe");
                self.send(&Reply::Error("Server shutting down".to_string())).await?;
                break;
            };
            self.send(&reply).await?;

            if quit {
                info!(connection_id, %addr, "Client sent QUIT, closing");
                break;
            }
        }

        self.graceful_close().await
    }

    /// Читает строку команды.
    ///
    /// Ожидание первого байта ограничено `idle_timeout`, получение всей
    /// строки после этого - `read_timeout`.
    async fn read_line(&mut self) -> Result<Incoming> {
        match timeout(self.config.idle_timeout, self.reader.fill_buf()).await {
            Err(_) => return Ok(Incoming::Idle),
            Ok(Ok([])) => return Ok(Incoming::Closed),
            Ok(Ok(_)) => {}
            Ok(Err(e)) if Self::is_recoverable_error(&e) => return Ok(Incoming::Closed),
            Ok(Err(e)) => return Err(e).context("Fatal read error"),
        }

        let max = self.config.max_line_length;
        let mut buf = Vec::new();
        let read = timeout(
            self.config.read_timeout,
            (&mut self.reader)
                .take(max as u64 + 2)
                .read_until(b'\n', &mut buf),
        )
        .await;

        match read {
            Err(_) => Ok(Incoming::Invalid(Reply::Error("Read timeout".to_string()))),
            Ok(Err(e)) if Self::is_recoverable_error(&e) => Ok(Incoming::Closed),
            Ok(Err(e)) => Err(e).context("Fatal read error"),
            Ok(Ok(_)) if !buf.ends_with(b"\n") && buf.len() > max => {
                let err = ProtocolError::LineTooLong {
                    size: buf.len(),
                    max,
                };
                Ok(Incoming::Invalid(Reply::from_error(&err)))
            }
            Ok(Ok(_)) => match String::from_utf8(buf) {
                Ok(line) => Ok(Incoming::Line(line)),
                Err(e) => Ok(Incoming::Rejected(
                    StackError::from(e.utf8_error()).context("read command"),
                )),
            },
        }
    }

    /// Выполняет команду. `None` - ожидание SUB прервано остановкой
    /// сервера.
    async fn execute(
        &mut self,
        command: Command,
    ) -> Option<Reply> {
        match dispatch(&self.broker, &self.config, &mut self.shutdown, command).await {
            Ok(reply) => reply,
            Err(err) => Some(self.command_failed(&err)),
        }
    }

    /// Логирует ошибку команды с уровнем по её коду и строит ответ клиенту.
    fn command_failed(
        &self,
        err: &StackError,
    ) -> Reply {
        let connection_id = self.connection_id;
        let status_code = err.status_code();
        let tags = err
            .metrics_tags()
            .into_iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(",");
        let trail = err.trail();

        match err.log_level() {
            LogLevel::Error => {
                error!(connection_id, %status_code, %tags, %trail, "Command failed")
            }
            LogLevel::Warn => {
                warn!(connection_id, %status_code, %tags, %trail, "Command failed")
            }
            LogLevel::Info => {
                info!(connection_id, %status_code, %tags, %trail, "Command failed")
            }
            LogLevel::Debug | LogLevel::Trace => {
                debug!(connection_id, %status_code, %tags, %trail, "Command failed")
            }
        }
        Reply::from_stack(err)
    }

    /// Отправляет ответ с таймаутом
    async fn send(
        &mut self,
        reply: &Reply,
    ) -> Result<()> {
        timeout(self.config.write_timeout, self.writer.write_all(&reply.encode()))
            .await
            .context("Write timeout")?
            .context("Failed to write response")?;
        Ok(())
    }

    /// Проверяет, является ли ошибка восстанавливаемой
    fn is_recoverable_error(error: &std::io::Error) -> bool {
        matches!(
            error.kind(),
            ErrorKind::UnexpectedEof
                | ErrorKind::BrokenPipe
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::TimedOut
        )
    }

    /// Graceful закрытие соединения
    async fn graceful_close(mut self) -> Result<()> {
        if let Err(e) = self.writer.shutdown().await {
            // ошибки закрытия уже закрытого соединения неинтересны
            if e.kind() != ErrorKind::NotConnected {
                debug!(connection_id = self.connection_id, error = %e, "Error during shutdown");
            }
        }
        debug!(connection_id = self.connection_id, "Connection closed gracefully");
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            max_connections_per_ip: 64,
            idle_timeout: Duration::from_secs(300),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
            read_buffer_size: 8192,
            max_line_length: 64 * 1024,
            default_subscribe_timeout: Duration::from_secs(30),
            max_subscribe_timeout: Duration::from_secs(600),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}
