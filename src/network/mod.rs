//! Сетевой модуль pushpoll.
//!
//! ## Подмодули
//!
//! - `protocol`: строковый протокол: разбор команд и кодирование ответов.
//! - `connection`: лимиты соединений и обработчик отдельного клиента.
//! - `dispatch`: выполнение команд над брокером.
//! - `server`: цикл приёма TCP-соединений с graceful shutdown.

pub mod connection;
mod dispatch;
pub mod protocol;
pub mod server;

pub use connection::{ConnectionManager, ServerConfig};
pub use protocol::{Command, Reply};
pub use server::run_server;
