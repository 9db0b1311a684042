use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "serde_repr")]
use serde_repr::{Deserialize_repr, Serialize_repr};
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Коды статуса для категоризации ошибок.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки
/// - 2xxx: Ошибки данных и каналов
/// - 4xxx: Ограничения ресурсов
/// - 6xxx: Сеть / IO
/// - 8xxx: Протокольные ошибки
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[cfg_attr(feature = "serde_repr", derive(Serialize_repr, Deserialize_repr))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Unsupported = 1001,
    Unexpected = 1002,
    Internal = 1003,
    InvalidArgs = 1004,
    InvariantViolation = 1005,

    // === 2xxx: Данные / каналы ===
    NotFound = 2000,
    CursorGone = 2001,
    InvalidChannel = 2002,
    InvalidCursor = 2003,

    // === 4xxx: Ресурсы ===
    ResourceExhausted = 4000,
    TooManyConnections = 4001,

    // === 6xxx: Сеть/IO ===
    Io = 6000,
    ConnectionClosed = 6001,
    Timeout = 6002,
    ReadTimeout = 6003,
    WriteTimeout = 6004,
    Shutdown = 6005,

    // === 8xxx: Протокол ===
    InvalidCommand = 8000,
    WrongArity = 8001,
    InvalidInteger = 8002,
    SizeLimit = 8003,
    InvalidUtf8 = 8004,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Возвращает `true`, если операцию имеет смысл повторить позже.
    ///
    /// Сам брокер никогда не повторяет операции: политика повторов
    /// принадлежит клиенту.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::ReadTimeout
                | Self::WriteTimeout
                | Self::ResourceExhausted
                | Self::TooManyConnections
        )
    }

    pub fn is_success(code: u32) -> bool {
        Self::Success as u32 == code
    }

    /// Ошибка на стороне клиента (диапазоны `2xxx` и `8xxx`, плюс
    /// `InvalidArgs`).
    pub fn is_client_error(&self) -> bool {
        let c = self.code();
        (2000..=2999).contains(&c) || self.is_protocol_error() || matches!(self, Self::InvalidArgs)
    }

    /// Внутренняя или инфраструктурная ошибка.
    pub fn is_server_error(&self) -> bool {
        let c = self.code();
        matches!(c, 1000..=1999 | 4000..=7999) && !matches!(self, Self::InvalidArgs)
    }

    /// Ошибка протокола или парсинга (диапазон 8xxx).
    pub fn is_protocol_error(&self) -> bool {
        (8000..=8999).contains(&self.code())
    }

    /// Требуется ли логировать как критическую ошибку.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Internal | Self::InvariantViolation)
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::NotFound | Self::CursorGone | Self::Timeout => LogLevel::Debug,
            Self::InvalidArgs
            | Self::InvalidChannel
            | Self::InvalidCursor
            | Self::InvalidCommand
            | Self::WrongArity
            | Self::InvalidInteger
            | Self::InvalidUtf8 => LogLevel::Info,
            Self::ResourceExhausted | Self::TooManyConnections | Self::ConnectionClosed => {
                LogLevel::Warn
            }
            Self::Internal | Self::InvariantViolation => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }

    /// HTTP-статус, соответствующий коду (для HTTP-транспорта поверх
    /// брокера).
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Success => 200,
            Self::NotFound => 404,
            Self::CursorGone => 410,
            Self::InvalidArgs
            | Self::InvalidChannel
            | Self::InvalidCursor
            | Self::InvalidCommand
            | Self::WrongArity
            | Self::InvalidInteger
            | Self::InvalidUtf8 => 400,
            Self::SizeLimit => 413,
            Self::TooManyConnections => 429,
            Self::Timeout | Self::ReadTimeout | Self::WriteTimeout => 408,
            Self::Unsupported => 501,
            Self::ResourceExhausted | Self::Shutdown => 503,
            _ => 500,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        #[cfg(feature = "strum")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что retryable-коды помечаются корректно.
    #[test]
    fn test_retryable() {
        assert!(StatusCode::Timeout.is_retryable());
        assert!(StatusCode::ResourceExhausted.is_retryable());
        assert!(!StatusCode::CursorGone.is_retryable());
        assert!(!StatusCode::InvalidArgs.is_retryable());
    }

    /// Тест проверяет разделение клиентских и серверных ошибок.
    #[test]
    fn test_client_vs_server() {
        assert!(StatusCode::InvalidArgs.is_client_error());
        assert!(StatusCode::CursorGone.is_client_error());
        assert!(StatusCode::WrongArity.is_client_error());
        assert!(StatusCode::Internal.is_server_error());
        assert!(StatusCode::ResourceExhausted.is_server_error());
        assert!(!StatusCode::InvalidArgs.is_server_error());
    }

    /// Тест проверяет соответствие кодов HTTP-статусам.
    #[test]
    fn test_http_mapping() {
        assert_eq!(StatusCode::NotFound.http_status(), 404);
        assert_eq!(StatusCode::CursorGone.http_status(), 410);
        assert_eq!(StatusCode::ResourceExhausted.http_status(), 503);
        assert_eq!(StatusCode::Timeout.http_status(), 408);
        assert_eq!(StatusCode::Unexpected.http_status(), 500);
    }

    #[test]
    fn test_from_try_from_u32() {
        let n = StatusCode::CursorGone.code();
        assert_eq!(StatusCode::try_from(n).unwrap(), StatusCode::CursorGone);
        assert!(StatusCode::from_u32(99999).is_none());
        let raw: u32 = StatusCode::NotFound.into();
        assert_eq!(raw, 2000);
        assert!(StatusCode::is_success(0));
    }

    #[test]
    fn test_log_level_mappings() {
        assert_eq!(StatusCode::Success.log_level(), LogLevel::Trace);
        assert_eq!(StatusCode::CursorGone.log_level(), LogLevel::Debug);
        assert_eq!(StatusCode::ResourceExhausted.log_level(), LogLevel::Warn);
        assert_eq!(StatusCode::InvariantViolation.log_level(), LogLevel::Error);
        assert!(StatusCode::InvariantViolation.is_critical());
    }

    /// Тест проверяет, что `Display` содержит имя варианта и код.
    #[test]
    fn test_display_contains_name_and_code() {
        let s = format!("{}", StatusCode::CursorGone);
        assert!(s.contains("2001"), "got: {s}");
        assert!(s.contains("CursorGone"), "got: {s}");
    }
}
