use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки брокера long-polling.
///
/// Таймаут ожидания и устаревший курсор ошибками не являются: это обычные
/// исходы подписки, и они возвращаются как варианты результата.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Арена исчерпана; состояние брокера не изменено
    ResourceExhausted { requested: usize, available: usize },
    /// Нарушен внутренний инвариант очереди или реестра
    InvariantViolation { reason: String },
    /// Некорректный идентификатор канала
    InvalidChannel { reason: String },
    /// Все теги курсора для этой секунды уже выданы
    CursorsExhausted { time: u64 },
    /// Слот ожидающего слушателя закрыт без результата
    Closed,
}

impl std::fmt::Display for BrokerError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::ResourceExhausted {
                requested,
                available,
            } => write!(
                f,
                "Arena exhausted: requested {requested} bytes, {available} available"
            ),
            Self::InvariantViolation { reason } => write!(f, "Invariant violation: {reason}"),
            Self::InvalidChannel { reason } => write!(f, "Invalid channel: {reason}"),
            Self::CursorsExhausted { time } => {
                write!(f, "No cursor tags left for second {time}")
            }
            Self::Closed => write!(f, "Listener slot closed without a result"),
        }
    }
}

impl std::error::Error for BrokerError {}

impl ErrorExt for BrokerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ResourceExhausted { .. } => StatusCode::ResourceExhausted,
            Self::InvariantViolation { .. } => StatusCode::InvariantViolation,
            Self::InvalidChannel { .. } => StatusCode::InvalidChannel,
            Self::CursorsExhausted { .. } => StatusCode::ResourceExhausted,
            Self::Closed => StatusCode::ConnectionClosed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::ResourceExhausted { .. } => "Broker out of memory, retry later".to_string(),
            Self::InvariantViolation { .. } => "Internal server error".to_string(),
            Self::InvalidChannel { reason } => format!("Invalid channel: {reason}"),
            Self::CursorsExhausted { .. } => {
                "Too many messages in one second, retry later".to_string()
            }
            Self::Closed => "Listener closed".to_string(),
        }
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "broker".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        if let Self::ResourceExhausted {
            requested,
            available,
        } = self
        {
            tags.push(("requested_bytes", requested.to_string()));
            tags.push(("available_bytes", available.to_string()));
        }

        tags
    }
}
