/// Возвращает `Err(StackError)` из текущей функции.
///
/// `bail!(err)` принимает любую ошибку с `ErrorExt`, `bail!(code, fmt, ..)`
/// создаёт `GenericError` с кодом и отформатированным текстом.
#[macro_export]
macro_rules! bail {
    ($err:expr $(,)?) => {
        return ::core::result::Result::Err($crate::StackError::from($err))
    };
    ($code:expr, $($fmt:tt)+) => {
        return ::core::result::Result::Err($crate::StackError::new(
            $crate::GenericError::new($code, format!($($fmt)+)),
        ))
    };
}

/// `bail!`, если условие ложно.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($rest:tt)+) => {
        if !($cond) {
            $crate::bail!($($rest)+);
        }
    };
}

/// Добавление шага к ошибке прямо на `Result`.
pub trait ResultExt<T> {
    fn context<C>(
        self,
        step: C,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>;

    /// То же, но текст шага строится только при ошибке.
    fn with_context<C, F>(
        self,
        step: F,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<crate::StackError>,
{
    #[track_caller]
    fn context<C>(
        self,
        step: C,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>,
    {
        match self {
            Ok(value) => Ok(value),
            Err(e) => Err(e.into().context(step)),
        }
    }

    #[track_caller]
    fn with_context<C, F>(
        self,
        step: F,
    ) -> Result<T, crate::StackError>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        match self {
            Ok(value) => Ok(value),
            Err(e) => Err(e.into().context(step())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::{BrokerError, PushResult, StatusCode};

    fn check_timeout(millis: u64) -> PushResult<u64> {
        ensure!(millis > 0, StatusCode::InvalidArgs, "timeout must be positive");
        ensure!(
            millis <= 1_000,
            StatusCode::InvalidArgs,
            "timeout {}ms exceeds {}ms",
            millis,
            1_000
        );
        Ok(millis)
    }

    #[test]
    fn test_bail_with_error_value() {
        fn closed() -> PushResult<()> {
            bail!(BrokerError::Closed);
        }

        let err = closed().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::ConnectionClosed);
        assert!(err.frames().is_empty());
    }

    /// Тест проверяет обе формы `ensure!`: с готовым текстом и с форматом.
    #[test]
    fn test_ensure_forms() {
        assert_eq!(check_timeout(500).unwrap(), 500);

        let zero = check_timeout(0).unwrap_err();
        assert_eq!(zero.to_string(), "timeout must be positive");

        let big = check_timeout(5_000).unwrap_err();
        assert_eq!(big.status_code(), StatusCode::InvalidArgs);
        assert_eq!(big.client_message(), "timeout 5000ms exceeds 1000ms");
    }

    #[test]
    fn test_context_wraps_foreign_error() {
        let res: Result<(), BrokerError> = Err(BrokerError::Closed);
        let err = res.context("SUB 'room'").unwrap_err();

        assert_eq!(err.outermost(), Some("SUB 'room'"));
        assert!(err.downcast_ref::<BrokerError>().is_some());
    }

    /// Тест проверяет, что шаг добавляется к уже обёрнутой ошибке, а место
    /// вызова указывает на вызывающий код.
    #[test]
    fn test_context_stacks_on_stack_error() {
        let res = check_timeout(0).context("parse SUB");
        let err = res.context("connection 7").unwrap_err();

        assert_eq!(err.frames().len(), 2);
        assert_eq!(err.to_string(), "connection 7: parse SUB: timeout must be positive");
        assert_eq!(err.frames()[0].at.file(), file!());
    }

    #[test]
    fn test_with_context_is_lazy() {
        let calls = Cell::new(0);
        let step = || {
            calls.set(calls.get() + 1);
            "lazy step"
        };

        assert!(check_timeout(1).with_context(step).is_ok());
        assert_eq!(calls.get(), 0);
        assert!(check_timeout(0).with_context(step).is_err());
        assert_eq!(calls.get(), 1);
    }
}
