use std::{collections::BTreeMap, fmt, fs, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::LoggingError;

const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Формат вывода событий.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    #[default]
    Compact,
    Json,
}

/// Настройки консольного вывода.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
}

/// Настройки файлового вывода (ежедневная ротация).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    pub filename: String,
    pub format: LogFormat,
}

/// Конфигурация логирования.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень: trace, debug, info, warn, error, off.
    pub level: String,
    pub log_dir: PathBuf,
    pub console: ConsoleConfig,
    pub file: FileConfig,
    /// Уровни для отдельных модулей, например `pushpoll::network = "debug"`.
    pub module_levels: BTreeMap<String, String>,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), LoggingError> {
        check_level(&self.level)?;
        self.module_levels.values().try_for_each(|l| check_level(l))?;
        if self.file.enabled && self.file.filename.trim().is_empty() {
            return Err(LoggingError::InvalidDirective {
                directive: "file.filename".to_string(),
                reason: "file name must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Создаёт каталог логов, если включён файловый вывод.
    pub fn ensure_log_dir(&self) -> Result<(), LoggingError> {
        if self.file.enabled {
            fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }

    /// Директива для `EnvFilter`: базовый уровень и уровни модулей.
    pub fn build_filter_directive(&self) -> String {
        let mut directive = self.level.to_lowercase();
        for (module, level) in &self.module_levels {
            directive.push_str(&format!(",{module}={}", level.to_lowercase()));
        }
        directive
    }
}

fn check_level(level: &str) -> Result<(), LoggingError> {
    if LEVELS.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        Err(LoggingError::InvalidLevel(level.to_string()))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: LogFormat::Compact,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            filename: "pushpoll.log".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
            module_levels: BTreeMap::new(),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        };
        f.write_str(name)
    }
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(LoggingError::InvalidDirective {
                directive: other.to_string(),
                reason: "unknown log format".to_string(),
            }),
        }
    }
}
