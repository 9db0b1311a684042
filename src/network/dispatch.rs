//! Выполнение команд протокола над брокером.
//!
//! Ошибки поднимаются как `StackError` со шагом `<КОМАНДА> '<канал>'`;
//! клиент видит только текст корневой ошибки.

use pushpoll_error::{bail, ensure, PushResult, ResultExt, StatusCode};
use tokio::select;

use super::{
    connection::ServerConfig,
    protocol::{Command, Reply},
};
use crate::{
    broker::{Broker, PublishRequest, SubscribeOutcome},
    shutdown::ShutdownSignal,
};

/// Выполняет команду. `Ok(None)` - ожидание SUB прервано остановкой
/// сервера.
pub(crate) async fn dispatch(
    broker: &Broker,
    config: &ServerConfig,
    shutdown: &mut ShutdownSignal,
    command: Command,
) -> PushResult<Option<Reply>> {
    let reply = match command {
        Command::Ping(text) => Reply::Pong(text),
        Command::Quit => Reply::Ok(None),
        Command::Pub {
            channel,
            ttl_secs,
            content_type,
            charset,
            payload,
        } => {
            let mut request = PublishRequest::new(payload);
            if let Some(content_type) = content_type {
                request = request.with_content_type(content_type);
            }
            if let Some(charset) = charset {
                request = request.with_charset(charset);
            }
            request.ttl_secs = ttl_secs;

            let receipt = broker
                .publish(channel.as_bytes(), request)
                .with_context(|| format!("PUB '{channel}'"))?;
            Reply::ok(format!(
                "{} delivered={} messages={} listeners={}",
                receipt.cursor,
                receipt.delivered_to,
                receipt.info.messages,
                receipt.info.listeners
            ))
        }
        Command::Sub {
            channel,
            cursor,
            timeout,
        } => {
            let wait = timeout.unwrap_or(config.default_subscribe_timeout);
            ensure!(
                wait <= config.max_subscribe_timeout,
                StatusCode::InvalidArgs,
                "SUB timeout {}ms exceeds limit {}ms",
                wait.as_millis(),
                config.max_subscribe_timeout.as_millis()
            );

            let outcome = select! {
                outcome = broker.subscribe(channel.as_bytes(), cursor, wait) => outcome,
                _ = shutdown.wait() => return Ok(None),
            };
            match outcome.with_context(|| format!("SUB '{channel}'"))? {
                SubscribeOutcome::Delivered(message) => Reply::Message(message),
                SubscribeOutcome::Timeout => Reply::Timeout,
                SubscribeOutcome::Gone => Reply::Gone,
            }
        }
        Command::Latest { channel } => broker
            .latest(channel.as_bytes())
            .map_or(Reply::Nil, Reply::Message),
        Command::Info { channel } => match broker.channel_info(channel.as_bytes()) {
            Some(info) => json_reply(&info).context("INFO")?,
            None => Reply::Nil,
        },
        Command::Del { channel } => match broker.delete_channel(channel.as_bytes()) {
            Some(info) => json_reply(&info).context("DEL")?,
            None => Reply::Nil,
        },
        Command::Stats => json_reply(&broker.stats()).context("STATS")?,
    };
    Ok(Some(reply))
}

fn json_reply<T: serde::Serialize>(value: &T) -> PushResult<Reply> {
    match serde_json::to_string(value) {
        Ok(json) => Ok(Reply::ok(json)),
        Err(e) => bail!(StatusCode::Internal, "Failed to serialize reply: {}", e),
    }
}
