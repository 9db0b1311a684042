use std::path::PathBuf;

use clap::Parser;

use crate::{config::Settings, error::ConfigError, logging::LogFormat};

/// Аргументы командной строки сервера.
#[derive(Debug, Parser)]
#[command(name = "pushpoll")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Long-polling publish/subscribe broker", long_about = None)]
pub struct Cli {
    /// Путь к файлу конфигурации (TOML)
    #[arg(
        short,
        long,
        env = "PUSHPOLL_CONFIG",
        help = "Путь к файлу конфигурации"
    )]
    pub config: Option<PathBuf>,
    /// Адрес для входящих соединений
    #[arg(short, long, help = "Адрес для прослушивания, например 0.0.0.0:8090")]
    pub listen: Option<String>,
    /// Уровень логирования
    #[arg(long, help = "Уровень логирования (trace, debug, info, warn, error)")]
    pub log_level: Option<String>,
    /// Формат консольного вывода
    #[arg(long, value_parser = parse_format, help = "Формат логов: pretty, compact, json")]
    pub log_format: Option<LogFormat>,
}

impl Cli {
    /// Загружает настройки и применяет к ним аргументы командной строки.
    pub fn load_settings(&self) -> Result<Settings, ConfigError> {
        let mut settings = Settings::load_from(self.config.as_deref())?;
        if let Some(listen) = &self.listen {
            settings.listen_address = listen.clone();
        }
        if let Some(level) = &self.log_level {
            settings.logging.level = level.clone();
        }
        if let Some(format) = self.log_format {
            settings.logging.console.format = format;
        }
        settings.validate()?;
        Ok(settings)
    }
}

fn parse_format(s: &str) -> Result<LogFormat, String> {
    s.parse().map_err(|e: crate::error::LoggingError| e.to_string())
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn test_parse_args() {
        let cli = Cli::parse_from([
            "pushpoll",
            "--listen",
            "0.0.0.0:1234",
            "--log-format",
            "json",
        ]);
        assert_eq!(cli.listen.as_deref(), Some("0.0.0.0:1234"));
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_bad_format_rejected() {
        assert!(Cli::try_parse_from(["pushpoll", "--log-format", "xml"]).is_err());
    }

    /// Тест проверяет, что аргументы имеют приоритет над настройками.
    #[test]
    #[serial]
    fn test_overrides_applied() {
        std::env::remove_var("PUSHPOLL_CONFIG");
        let cli = Cli::parse_from(["pushpoll", "-l", "127.0.0.1:9999", "--log-level", "warn"]);
        let settings = cli.load_settings().unwrap();
        assert_eq!(settings.listen_address, "127.0.0.1:9999");
        assert_eq!(settings.logging.level, "warn");
    }

    #[test]
    #[serial]
    fn test_invalid_level_override_rejected() {
        std::env::remove_var("PUSHPOLL_CONFIG");
        let cli = Cli::parse_from(["pushpoll", "--log-level", "noisy"]);
        assert!(matches!(
            cli.load_settings(),
            Err(ConfigError::Invalid { field: "logging", .. })
        ));
    }
}
