//! Строковый протокол транспорта.
//!
//! Одна команда на строку, аргументы разделены пробелами:
//!
//! - `PING [text]`
//! - `QUIT`
//! - `PUB <channel> <ttl-secs|-> <content-type|-> <charset|-> <payload...>`
//! - `SUB <channel> <cursor|-> [timeout-ms]`
//! - `LATEST <channel>`
//! - `INFO <channel>`
//! - `DEL <channel>`
//! - `STATS`
//!
//! Сообщение отдаётся как `$<len> <cursor> <content-type> <charset>`, затем
//! ровно `len` байт тела и `\r\n`. Пустые метаданные передаются как `-`.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use pushpoll_error::{ErrorExt, ProtocolError, StackError};

use crate::broker::{Cursor, Message};

const EMPTY_FIELD: &str = "-";

/// Разобранная команда клиента.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping(Option<String>),
    Quit,
    Pub {
        channel: String,
        ttl_secs: Option<u64>,
        content_type: Option<String>,
        charset: Option<String>,
        payload: String,
    },
    Sub {
        channel: String,
        cursor: Option<Cursor>,
        timeout: Option<Duration>,
    },
    Latest {
        channel: String,
    },
    Info {
        channel: String,
    },
    Del {
        channel: String,
    },
    Stats,
}

/// Ответ сервера.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Pong(Option<String>),
    /// `+OK` с необязательным текстом.
    Ok(Option<String>),
    Message(std::sync::Arc<Message>),
    /// Значение отсутствует (`$-1`).
    Nil,
    Timeout,
    Gone,
    Error(String),
}

impl Command {
    /// Разбирает строку команды. Пустая строка даёт `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = parts.collect();

        let command = match name.to_ascii_uppercase().as_str() {
            "PING" => match args.as_slice() {
                [] => Command::Ping(None),
                [text] => Command::Ping(Some(text.to_string())),
                _ => return Err(ProtocolError::WrongArity { command: "PING" }),
            },
            "QUIT" => {
                expect_arity(&args, 0, "QUIT")?;
                Command::Quit
            }
            "STATS" => {
                expect_arity(&args, 0, "STATS")?;
                Command::Stats
            }
            "PUB" => {
                if args.len() < 5 {
                    return Err(ProtocolError::WrongArity { command: "PUB" });
                }
                Command::Pub {
                    channel: args[0].to_string(),
                    ttl_secs: optional(args[1]).map(parse_u64).transpose()?,
                    content_type: optional(args[2]).map(str::to_string),
                    charset: optional(args[3]).map(str::to_string),
                    payload: payload_after(line, 5),
                }
            }
            "SUB" => {
                if !(2..=3).contains(&args.len()) {
                    return Err(ProtocolError::WrongArity { command: "SUB" });
                }
                Command::Sub {
                    channel: args[0].to_string(),
                    cursor: optional(args[1]).map(str::parse).transpose()?,
                    timeout: args
                        .get(2)
                        .map(|ms| parse_u64(ms).map(Duration::from_millis))
                        .transpose()?,
                }
            }
            "LATEST" => Command::Latest {
                channel: single_channel(&args, "LATEST")?,
            },
            "INFO" => Command::Info {
                channel: single_channel(&args, "INFO")?,
            },
            "DEL" => Command::Del {
                channel: single_channel(&args, "DEL")?,
            },
            other => {
                return Err(ProtocolError::UnknownCommand {
                    command: other.to_string(),
                })
            }
        };
        Ok(Some(command))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping(_) => "PING",
            Command::Quit => "QUIT",
            Command::Pub { .. } => "PUB",
            Command::Sub { .. } => "SUB",
            Command::Latest { .. } => "LATEST",
            Command::Info { .. } => "INFO",
            Command::Del { .. } => "DEL",
            Command::Stats => "STATS",
        }
    }
}

impl Reply {
    pub fn ok(text: impl Into<String>) -> Self {
        Reply::Ok(Some(text.into()))
    }

    pub fn from_error<E: ErrorExt>(err: &E) -> Self {
        Reply::Error(err.client_message())
    }

    /// Ответ на ошибку со следом: клиент видит только корень.
    pub fn from_stack(err: &StackError) -> Self {
        Reply::Error(err.client_message())
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        match self {
            Reply::Pong(None) => out.put_slice(b"+PONG\r\n"),
            Reply::Pong(Some(text)) => put_line(&mut out, &format!("+{text}")),
            Reply::Ok(None) => out.put_slice(b"+OK\r\n"),
            Reply::Ok(Some(text)) => put_line(&mut out, &format!("+OK {text}")),
            Reply::Message(message) => {
                put_line(
                    &mut out,
                    &format!(
                        "${} {} {} {}",
                        message.payload.len(),
                        message.cursor,
                        field(&message.content_type),
                        field(&message.charset)
                    ),
                );
                out.put_slice(&message.payload);
                out.put_slice(b"\r\n");
            }
            Reply::Nil => out.put_slice(b"$-1\r\n"),
            Reply::Timeout => out.put_slice(b"-TIMEOUT\r\n"),
            Reply::Gone => out.put_slice(b"-GONE\r\n"),
            Reply::Error(message) => put_line(&mut out, &format!("-ERR {message}")),
        }
        out.freeze()
    }
}

fn put_line(
    out: &mut BytesMut,
    line: &str,
) {
    out.put_slice(line.as_bytes());
    out.put_slice(b"\r\n");
}

fn field(value: &str) -> &str {
    if value.is_empty() {
        EMPTY_FIELD
    } else {
        value
    }
}

fn optional(arg: &str) -> Option<&str> {
    (arg != EMPTY_FIELD).then_some(arg)
}

fn parse_u64(arg: &str) -> Result<u64, ProtocolError> {
    arg.parse().map_err(|_| ProtocolError::InvalidInteger {
        argument: arg.to_string(),
    })
}

fn expect_arity(
    args: &[&str],
    n: usize,
    command: &'static str,
) -> Result<(), ProtocolError> {
    if args.len() == n {
        Ok(())
    } else {
        Err(ProtocolError::WrongArity { command })
    }
}

fn single_channel(
    args: &[&str],
    command: &'static str,
) -> Result<String, ProtocolError> {
    expect_arity(args, 1, command)?;
    Ok(args[0].to_string())
}

/// Остаток строки после `skip` слов, с сохранением внутренних пробелов.
fn payload_after(
    line: &str,
    skip: usize,
) -> String {
    let mut rest = line.trim_start();
    for _ in 0..skip {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        rest = rest[end..].trim_start();
    }
    rest.to_string()
}
