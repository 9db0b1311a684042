use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки разбора команд текстового транспорта.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Неизвестная команда
    UnknownCommand { command: String },
    /// Неверное число аргументов
    WrongArity { command: &'static str },
    /// Аргумент не является целым числом
    InvalidInteger { argument: String },
    /// Некорректный курсор
    InvalidCursor { cursor: String },
    /// Превышен лимит размера строки команды
    LineTooLong { size: usize, max: usize },
}

impl std::fmt::Display for ProtocolError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::UnknownCommand { command } => write!(f, "Unknown command '{command}'"),
            Self::WrongArity { command } => {
                write!(f, "Wrong number of arguments for '{command}'")
            }
            Self::InvalidInteger { argument } => {
                write!(f, "Value is not an integer: '{argument}'")
            }
            Self::InvalidCursor { cursor } => {
                write!(f, "Invalid cursor '{cursor}', expected <time>:<tag>")
            }
            Self::LineTooLong { size, max } => {
                write!(f, "Command line too long: {size} bytes (max {max})")
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

impl ErrorExt for ProtocolError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownCommand { .. } => StatusCode::InvalidCommand,
            Self::WrongArity { .. } => StatusCode::WrongArity,
            Self::InvalidInteger { .. } => StatusCode::InvalidInteger,
            Self::InvalidCursor { .. } => StatusCode::InvalidCursor,
            Self::LineTooLong { .. } => StatusCode::SizeLimit,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_codes() {
        let err = ProtocolError::WrongArity { command: "SUB" };
        assert_eq!(err.status_code(), StatusCode::WrongArity);
        assert!(err.status_code().is_protocol_error());
        assert_eq!(err.to_string(), "Wrong number of arguments for 'SUB'");
    }

    #[test]
    fn test_cursor_error_message() {
        let err = ProtocolError::InvalidCursor {
            cursor: "abc".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::InvalidCursor);
        assert!(err.client_message().contains("<time>:<tag>"));
    }
}
