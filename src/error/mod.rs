use std::io;

use thiserror::Error;

pub use pushpoll_error::{
    BrokerError, ErrorExt, ProtocolError, PushResult, StackError, StatusCode,
};

/// Ошибки загрузки и проверки настроек.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config load error: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Ошибки инициализации логирования.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Log directory error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),
    #[error("Invalid filter directive '{directive}': {reason}")]
    InvalidDirective { directive: String, reason: String },
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}
