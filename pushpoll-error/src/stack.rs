use std::{fmt, panic::Location};

use crate::{ErrorExt, LogLevel, StatusCode};

/// Ошибка команды вместе со следом шагов, через которые она поднялась.
///
/// Корневая ошибка определяет статус и текст для клиента; шаги (`Frame`)
/// видны только в логах. Шаги хранятся от внутреннего к внешнему.
pub struct StackError {
    root: Box<dyn ErrorExt>,
    frames: Vec<Frame>,
}

/// Один шаг следа: что выполнялось и где ошибка была обёрнута.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub step: String,
    pub at: &'static Location<'static>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StackError {
    pub fn new<E: ErrorExt>(err: E) -> Self {
        Self {
            root: Box::new(err),
            frames: Vec::new(),
        }
    }

    /// Добавляет внешний шаг к следу.
    #[track_caller]
    pub fn context(
        mut self,
        step: impl Into<String>,
    ) -> Self {
        self.frames.push(Frame {
            step: step.into(),
            at: Location::caller(),
        });
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.root.status_code()
    }

    /// Текст для клиента: только корневая ошибка, без шагов.
    pub fn client_message(&self) -> String {
        self.root.client_message()
    }

    pub fn root(&self) -> &dyn ErrorExt {
        self.root.as_ref()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Самый внешний шаг, если он есть.
    pub fn outermost(&self) -> Option<&str> {
        self.frames.last().map(|frame| frame.step.as_str())
    }

    pub fn downcast_ref<T: ErrorExt>(&self) -> Option<&T> {
        self.root.as_any().downcast_ref::<T>()
    }

    /// Теги корневой ошибки плюс внешний шаг и глубина следа.
    pub fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = self.root.metrics_tags();
        if let Some(step) = self.outermost() {
            tags.push(("step", step.to_string()));
        }
        tags.push(("depth", self.frames.len().to_string()));
        tags
    }

    pub fn log_level(&self) -> LogLevel {
        self.status_code().log_level()
    }

    pub fn is_critical(&self) -> bool {
        self.status_code().is_critical()
    }

    /// След с местами вызова, от внешнего шага к корню.
    pub fn trail(&self) -> String {
        let mut out = String::new();
        for frame in self.frames.iter().rev() {
            out.push_str(&format!(
                "{} at {}:{}; ",
                frame.step,
                frame.at.file(),
                frame.at.line()
            ));
        }
        out.push_str(&self.root.log_message());
        out
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StackError
////////////////////////////////////////////////////////////////////////////////

impl fmt::Debug for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("StackError")
            .field("status_code", &self.status_code())
            .field("root", &self.root.to_string())
            .field("frames", &self.frames)
            .finish()
    }
}

/// `внешний: внутренний: корень`.
impl fmt::Display for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        for frame in self.frames.iter().rev() {
            write!(f, "{}: ", frame.step)?;
        }
        write!(f, "{}", self.root)
    }
}

impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.root.as_ref())
    }
}

impl<E: ErrorExt> From<E> for StackError {
    fn from(e: E) -> Self {
        StackError::new(e)
    }
}
