use std::{path::Path, sync::Arc, time::Duration};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{
    broker::{
        BrokerConfig, DeliveryPolicy, IdleReaper, NeverReap, ReapPolicy, DEFAULT_ARENA_SIZE,
        DEFAULT_BUFFER_TIMEOUT_SECS, DEFAULT_MAX_MESSAGE_QUEUE_SIZE,
    },
    error::ConfigError,
    logging::LoggingConfig,
    network::ServerConfig,
};

/// Настройки сервера.
///
/// Порядок источников: значения по умолчанию, необязательный файл,
/// переменные окружения с префиксом `PUSHPOLL_` (вложенные поля через
/// `__`, например `PUSHPOLL_LOGGING__LEVEL`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub listen_address: String,
    pub max_message_queue_size: usize,
    /// Время жизни сообщения по умолчанию; 0 - бессрочно.
    pub buffer_timeout_secs: u64,
    pub arena_size: usize,
    pub default_subscribe_timeout_ms: u64,
    pub delivery_policy: DeliveryPolicy,
    /// Если задано, пустые каналы удаляются после такого простоя.
    pub channel_idle_secs: Option<u64>,
    pub sweep_interval_secs: u64,
    pub max_connections: usize,
    pub max_connections_per_ip: usize,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            // Добавляем значения по умолчанию
            .set_default("listen_address", "127.0.0.1:8090")?
            .set_default("max_message_queue_size", DEFAULT_MAX_MESSAGE_QUEUE_SIZE as i64)?
            .set_default("buffer_timeout_secs", DEFAULT_BUFFER_TIMEOUT_SECS as i64)?
            .set_default("arena_size", DEFAULT_ARENA_SIZE as i64)?
            .set_default("default_subscribe_timeout_ms", 30_000i64)?
            .set_default("delivery_policy", "retain")?
            .set_default("sweep_interval_secs", 60i64)?
            .set_default("max_connections", 1024i64)?
            .set_default("max_connections_per_ip", 64i64)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        // Добавляем переменные окружения с префиксом PUSHPOLL_
        let cfg = builder
            .add_source(
                Environment::with_prefix("PUSHPOLL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| ConfigError::Invalid {
            field,
            reason: reason.to_string(),
        };

        if self.max_message_queue_size == 0 {
            return Err(invalid("max_message_queue_size", "must be at least 1"));
        }
        if self.arena_size == 0 {
            return Err(invalid("arena_size", "must be greater than zero"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(invalid("sweep_interval_secs", "must be greater than zero"));
        }
        if self.max_connections == 0 {
            return Err(invalid("max_connections", "must be greater than zero"));
        }
        if self.max_connections_per_ip == 0 {
            return Err(invalid("max_connections_per_ip", "must be greater than zero"));
        }
        if Duration::from_millis(self.default_subscribe_timeout_ms)
            > ServerConfig::default().max_subscribe_timeout
        {
            return Err(invalid(
                "default_subscribe_timeout_ms",
                "must not exceed the SUB timeout limit",
            ));
        }
        if self.listen_address.trim().is_empty() {
            return Err(invalid("listen_address", "must not be empty"));
        }
        self.logging
            .validate()
            .map_err(|e| invalid("logging", &e.to_string()))
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            max_message_queue_size: self.max_message_queue_size,
            buffer_timeout_secs: self.buffer_timeout_secs,
            arena_size: self.arena_size,
            delivery_policy: self.delivery_policy,
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            max_connections: self.max_connections,
            max_connections_per_ip: self.max_connections_per_ip,
            default_subscribe_timeout: Duration::from_millis(self.default_subscribe_timeout_ms),
            ..ServerConfig::default()
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn reap_policy(&self) -> Arc<dyn ReapPolicy> {
        match self.channel_idle_secs {
            Some(max_idle) => Arc::new(IdleReaper { max_idle }),
            None => Arc::new(NeverReap),
        }
    }
}
