use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use parking_lot::Mutex;
use pushpoll_error::BrokerError;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::{
    arena::{message_footprint, Arena, ArenaStats, LISTENER_RECORD},
    channel::ChannelInfo,
    clock::{Clock, SystemClock},
    listener::{Delivery, ListenerId, ParkedListener},
    message::{Cursor, Message, StoredMessage},
    queue::Lookup,
    reaper::ReapPolicy,
    registry::ChannelRegistry,
};

/// Размер очереди сообщений канала по умолчанию.
pub const DEFAULT_MAX_MESSAGE_QUEUE_SIZE: usize = 5;
/// Время жизни сообщения по умолчанию, секунды.
pub const DEFAULT_BUFFER_TIMEOUT_SECS: u64 = 3600;
/// Размер арены по умолчанию.
pub const DEFAULT_ARENA_SIZE: usize = 3 * 1024 * 1024;

/// Что происходит с сообщением после выдачи слушателю.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Сообщение остаётся в очереди до вытеснения или истечения.
    #[default]
    Retain,
    /// Сообщение удаляется, как только его получил хотя бы один слушатель.
    ConsumeOnce,
}

/// Параметры брокера.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub max_message_queue_size: usize,
    /// Время жизни сообщения, если издатель не указал своё; 0 - бессрочно.
    pub buffer_timeout_secs: u64,
    pub arena_size: usize,
    pub delivery_policy: DeliveryPolicy,
}

/// Публикуемое сообщение.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub content_type: String,
    pub charset: String,
    pub payload: Bytes,
    /// Время жизни в секундах; `None` - значение брокера, `Some(0)` -
    /// бессрочно.
    pub ttl_secs: Option<u64>,
}

/// Ответ издателю.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub cursor: Cursor,
    /// Сколько ожидающих слушателей получили сообщение.
    pub delivered_to: usize,
    pub info: ChannelInfo,
}

/// Итог подписки.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Delivered(Arc<Message>),
    Timeout,
    /// Курсор вытеснен из истории или канал удалён во время ожидания.
    Gone,
}

/// Итог периодической чистки.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub pruned_listeners: usize,
    pub reaped: usize,
}

/// Снимок состояния брокера.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub channels: usize,
    pub messages: usize,
    pub listeners: usize,
    pub arena: ArenaStats,
    pub published: u64,
    pub delivered: u64,
    pub timeouts: u64,
    pub gone: u64,
    pub evicted: u64,
    pub expired: u64,
}

/// Брокер long-polling сообщений.
///
/// Всё изменяемое состояние (реестр, очереди каналов) находится под одной
/// блокировкой. Блокировка не удерживается во время ожидания подписчика:
/// ожидание идёт на личном `oneshot`-канале слушателя.
#[derive(Debug)]
pub struct Broker {
    registry: Mutex<ChannelRegistry>,
    arena: Arena,
    clock: Arc<dyn Clock>,
    config: BrokerConfig,
    next_listener: AtomicU64,
    counters: Counters,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    timeouts: AtomicU64,
    gone: AtomicU64,
    evicted: AtomicU64,
    expired: AtomicU64,
}

enum Query {
    Ready(SubscribeOutcome),
    Parked {
        id: ListenerId,
        rx: oneshot::Receiver<Delivery>,
    },
    WouldPark,
}

/// Снимает слушателя с ожидания, если подписка отменена до разрешения.
struct ParkGuard<'a> {
    broker: &'a Broker,
    channel: &'a [u8],
    id: ListenerId,
    armed: bool,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl PublishRequest {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            content_type: String::new(),
            charset: String::new(),
            payload: payload.into(),
            ttl_secs: None,
        }
    }

    pub fn with_content_type(
        mut self,
        content_type: impl Into<String>,
    ) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_charset(
        mut self,
        charset: impl Into<String>,
    ) -> Self {
        self.charset = charset.into();
        self
    }

    pub fn with_ttl(
        mut self,
        ttl_secs: u64,
    ) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: BrokerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry: Mutex::new(ChannelRegistry::new(config.max_message_queue_size)),
            arena: Arena::new(config.arena_size),
            clock,
            config,
            next_listener: AtomicU64::new(1),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Публикует сообщение в канал.
    ///
    /// Работает в четыре этапа:
    /// 1. Выделяет блок сообщения и, при необходимости, узел канала
    /// 2. Назначает курсор и ставит сообщение в очередь с вытеснением
    /// 3. Раздаёт сообщение всем подходящим ожидающим слушателям
    /// 4. Обновляет время последней активности канала
    ///
    /// При нехватке арены ничего не меняется.
    pub fn publish(
        &self,
        channel: &[u8],
        request: PublishRequest,
    ) -> Result<PublishReceipt, BrokerError> {
        let now = self.clock.now();
        let footprint = message_footprint(
            &request.content_type,
            &request.charset,
            request.payload.len(),
        );

        let mut registry = self.registry.lock();

        // 1) блок сообщения до создания канала: при ошибке канала блок
        //    просто освобождается
        let block = self.arena.alloc(footprint).inspect_err(|err| {
            tracing::warn!(
                channel = %String::from_utf8_lossy(channel),
                error = %err,
                "Publish rejected"
            );
        })?;
        let chan = registry.find_or_create(channel, &self.arena, now)?;

        // 2) курсор и постановка в очередь
        let cursor = chan.queue.next_cursor(now)?;
        let ttl = request.ttl_secs.unwrap_or(self.config.buffer_timeout_secs);
        let message = Message {
            cursor,
            content_type: request.content_type,
            charset: request.charset,
            payload: request.payload,
            expires: (ttl > 0).then(|| now.saturating_add(ttl)),
        };
        let stored = StoredMessage::new(message, block);
        let shared = stored.message.clone();
        let report = chan.queue.enqueue(stored, now)?;
        chan.record_publish();

        // 3) широковещательная раздача в порядке парковки
        let mut delivered = 0;
        for listener in chan.listeners.take_eligible(cursor) {
            if listener.deliver(Delivery::Message(shared.clone())) {
                delivered += 1;
            }
        }
        if delivered > 0 && self.config.delivery_policy == DeliveryPolicy::ConsumeOnce {
            chan.queue.remove(cursor);
        }

        // 4) активность канала
        chan.touch(now);

        if cfg!(debug_assertions) {
            chan.queue.validate()?;
        }
        let info = chan.info();
        drop(registry);

        self.counters.published.fetch_add(1, Ordering::Relaxed);
        self.counters
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.counters
            .evicted
            .fetch_add(report.evicted as u64, Ordering::Relaxed);
        self.counters
            .expired
            .fetch_add(report.expired as u64, Ordering::Relaxed);

        tracing::debug!(
            channel = %info.id,
            %cursor,
            delivered,
            evicted = report.evicted,
            expired = report.expired,
            "Message published"
        );

        Ok(PublishReceipt {
            cursor,
            delivered_to: delivered,
            info,
        })
    }

    /// Подписка на канал с ожиданием до `timeout`.
    ///
    /// Если подходящее сообщение уже есть, оно возвращается сразу. Иначе
    /// слушатель паркуется до публикации, таймаута или удаления канала.
    /// Гонка таймаута и доставки разрешается под блокировкой брокера:
    /// слушатель получает ровно один итог.
    pub async fn subscribe(
        &self,
        channel: &[u8],
        cursor: Option<Cursor>,
        timeout: Duration,
    ) -> Result<SubscribeOutcome, BrokerError> {
        let (id, mut rx) = match self.query(channel, cursor, true)? {
            Query::Ready(outcome) => return Ok(outcome),
            Query::Parked { id, rx } => (id, rx),
            Query::WouldPark => {
                return Err(BrokerError::InvariantViolation {
                    reason: "listener was not parked".to_string(),
                })
            }
        };

        let mut guard = ParkGuard {
            broker: self,
            channel,
            id,
            armed: true,
        };

        let resolved = tokio::time::timeout(timeout, &mut rx).await;
        guard.disarm();

        match resolved {
            Ok(Ok(delivery)) => Ok(self.resolve(delivery)),
            Ok(Err(_)) => Err(BrokerError::Closed),
            Err(_) => {
                if self.unpark(channel, id) {
                    self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(
                        channel = %String::from_utf8_lossy(channel),
                        listener = id,
                        "Subscribe timed out"
                    );
                    return Ok(SubscribeOutcome::Timeout);
                }
                // публикация успела забрать слушателя до таймаута
                match rx.try_recv() {
                    Ok(delivery) => Ok(self.resolve(delivery)),
                    Err(_) => Err(BrokerError::Closed),
                }
            }
        }
    }

    /// Подписка без ожидания. `None` означает, что слушателю пришлось бы
    /// ждать.
    pub fn try_subscribe(
        &self,
        channel: &[u8],
        cursor: Option<Cursor>,
    ) -> Result<Option<SubscribeOutcome>, BrokerError> {
        match self.query(channel, cursor, false)? {
            Query::Ready(outcome) => Ok(Some(outcome)),
            Query::WouldPark => Ok(None),
            Query::Parked { id, .. } => {
                self.unpark(channel, id);
                Err(BrokerError::InvariantViolation {
                    reason: "non-blocking subscribe parked a listener".to_string(),
                })
            }
        }
    }

    /// Самое новое сообщение канала, без создания канала.
    pub fn latest(
        &self,
        channel: &[u8],
    ) -> Option<Arc<Message>> {
        let now = self.clock.now();
        let mut registry = self.registry.lock();
        let chan = registry.find_mut(channel)?;
        let expired = chan.queue.purge_expired(now);
        self.counters
            .expired
            .fetch_add(expired as u64, Ordering::Relaxed);
        chan.queue.peek_newest().cloned()
    }

    pub fn channel_info(
        &self,
        channel: &[u8],
    ) -> Option<ChannelInfo> {
        self.registry.lock().find(channel).map(|c| c.info())
    }

    /// Удаляет канал. Все ожидающие слушатели получают `Gone`.
    ///
    /// Слушатели будятся под той же блокировкой, что и удаление: подписчик
    /// с истёкшим таймаутом либо снимает себя сам, либо уже видит `Gone`.
    pub fn delete_channel(
        &self,
        channel: &[u8],
    ) -> Option<ChannelInfo> {
        let mut registry = self.registry.lock();
        let mut removed = registry.remove(channel)?;
        let info = removed.info();
        let woken = removed
            .listeners
            .drain_all()
            .into_iter()
            .map(|listener| listener.deliver(Delivery::Gone))
            .filter(|sent| *sent)
            .count();
        drop(registry);

        tracing::info!(channel = %info.id, woken, "Channel deleted");
        Some(info)
    }

    /// Чистка: удаляет истёкшие сообщения и слушателей с закрытым
    /// получателем, затем убирает каналы, выбранные политикой.
    pub fn sweep(
        &self,
        policy: &dyn ReapPolicy,
    ) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        let mut registry = self.registry.lock();

        for chan in registry.iter_mut() {
            report.expired += chan.queue.purge_expired(now);
            report.pruned_listeners += chan.listeners.prune_closed();
        }
        registry.retain(|chan| {
            if !policy.should_reap(&chan.info(), now) {
                return true;
            }
            for listener in chan.listeners.drain_all() {
                listener.deliver(Delivery::Gone);
            }
            report.reaped += 1;
            false
        });
        drop(registry);

        self.counters
            .expired
            .fetch_add(report.expired as u64, Ordering::Relaxed);
        if report != SweepReport::default() {
            tracing::debug!(
                expired = report.expired,
                pruned_listeners = report.pruned_listeners,
                reaped = report.reaped,
                "Sweep finished"
            );
        }
        report
    }

    pub fn stats(&self) -> BrokerStats {
        let registry = self.registry.lock();
        let (messages, listeners) = registry.iter().fold((0, 0), |(m, l), c| {
            (m + c.queue.len(), l + c.listeners.len())
        });
        BrokerStats {
            channels: registry.len(),
            messages,
            listeners,
            arena: self.arena.stats(),
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            gone: self.counters.gone.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
        }
    }

    /// Проверяет упорядоченность и границы всех очередей.
    pub fn validate(&self) -> Result<(), BrokerError> {
        self.registry
            .lock()
            .iter()
            .try_for_each(|c| c.queue.validate())
    }

    /// Синхронная часть подписки: поиск сообщения или парковка.
    fn query(
        &self,
        channel: &[u8],
        cursor: Option<Cursor>,
        park: bool,
    ) -> Result<Query, BrokerError> {
        let now = self.clock.now();
        let mut registry = self.registry.lock();
        let existed = registry.find(channel).is_some();
        let chan = registry.find_or_create(channel, &self.arena, now)?;
        chan.touch(now);

        match chan.queue.find_after(cursor, now) {
            Lookup::Found(message) => {
                if self.config.delivery_policy == DeliveryPolicy::ConsumeOnce {
                    chan.queue.remove(message.cursor);
                }
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(Query::Ready(SubscribeOutcome::Delivered(message)))
            }
            Lookup::Gone => {
                self.counters.gone.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    channel = %String::from_utf8_lossy(channel),
                    cursor = ?cursor,
                    "Cursor is gone"
                );
                Ok(Query::Ready(SubscribeOutcome::Gone))
            }
            Lookup::Pending if !park => Ok(Query::WouldPark),
            Lookup::Pending => {
                let block = match self.arena.alloc(LISTENER_RECORD) {
                    Ok(block) => block,
                    Err(err) => {
                        // канал, созданный этим вызовом, не должен пережить
                        // неудачную парковку
                        if !existed {
                            registry.remove(channel);
                        }
                        return Err(err);
                    }
                };
                let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = oneshot::channel();
                chan.listeners
                    .enqueue(ParkedListener::new(id, cursor, tx, block));
                Ok(Query::Parked { id, rx })
            }
        }
    }

    /// Снимает слушателя с ожидания. `false`, если его уже забрала
    /// публикация или удаление канала.
    fn unpark(
        &self,
        channel: &[u8],
        id: ListenerId,
    ) -> bool {
        self.registry
            .lock()
            .find_mut(channel)
            .and_then(|c| c.listeners.remove(id))
            .is_some()
    }

    fn resolve(
        &self,
        delivery: Delivery,
    ) -> SubscribeOutcome {
        match delivery {
            Delivery::Message(message) => SubscribeOutcome::Delivered(message),
            Delivery::Gone => {
                self.counters.gone.fetch_add(1, Ordering::Relaxed);
                SubscribeOutcome::Gone
            }
        }
    }
}

impl ParkGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_message_queue_size: DEFAULT_MAX_MESSAGE_QUEUE_SIZE,
            buffer_timeout_secs: DEFAULT_BUFFER_TIMEOUT_SECS,
            arena_size: DEFAULT_ARENA_SIZE,
            delivery_policy: DeliveryPolicy::default(),
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl Drop for ParkGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.broker.unpark(self.channel, self.id) {
            tracing::trace!(listener = self.id, "Subscribe cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{clock::ManualClock, reaper::NeverReap};

    fn broker_with(
        max: usize,
        policy: DeliveryPolicy,
    ) -> (Broker, ManualClock) {
        let clock = ManualClock::new(1_000);
        let broker = Broker::with_clock(
            BrokerConfig {
                max_message_queue_size: max,
                delivery_policy: policy,
                ..BrokerConfig::default()
            },
            Arc::new(clock.clone()),
        );
        (broker, clock)
    }

    fn text(payload: &'static str) -> PublishRequest {
        PublishRequest::new(payload).with_content_type("text/plain")
    }

    /// Тест проверяет, что сообщение, опубликованное без слушателей,
    /// остаётся в очереди и отдаётся подписчику без курсора.
    #[test]
    fn test_publish_then_try_subscribe() {
        let (broker, _clock) = broker_with(5, DeliveryPolicy::Retain);
        let receipt = broker
            .publish(b"room1", text("hello").with_ttl(60))
            .unwrap();
        assert_eq!(receipt.delivered_to, 0);
        assert_eq!(receipt.info.messages, 1);
        assert_eq!(receipt.cursor, Cursor::new(1_000, 0));

        match broker.try_subscribe(b"room1", None).unwrap() {
            Some(SubscribeOutcome::Delivered(msg)) => {
                assert_eq!(msg.payload, Bytes::from_static(b"hello"));
                assert_eq!(msg.expires, Some(1_060));
            }
            other => panic!("expected delivery, got {other:?}"),
        }
        // сообщение сохраняется до вытеснения
        assert_eq!(broker.channel_info(b"room1").unwrap().messages, 1);
    }

    #[test]
    fn test_consume_once_removes_delivered_message() {
        let (broker, _clock) = broker_with(5, DeliveryPolicy::ConsumeOnce);
        broker.publish(b"q", text("job")).unwrap();

        assert!(matches!(
            broker.try_subscribe(b"q", None).unwrap(),
            Some(SubscribeOutcome::Delivered(_))
        ));
        assert_eq!(broker.try_subscribe(b"q", None).unwrap(), None);
    }

    #[test]
    fn test_ttl_zero_never_expires() {
        let (broker, clock) = broker_with(5, DeliveryPolicy::Retain);
        broker.publish(b"c", text("forever").with_ttl(0)).unwrap();
        clock.advance(1_000_000);
        assert!(broker.latest(b"c").is_some());
    }

    #[test]
    fn test_default_ttl_applies() {
        let (broker, clock) = broker_with(5, DeliveryPolicy::Retain);
        broker.publish(b"c", text("x")).unwrap();
        clock.advance(DEFAULT_BUFFER_TIMEOUT_SECS);
        assert!(broker.latest(b"c").is_none());
        assert_eq!(broker.stats().expired, 1);
    }

    /// Тест проверяет, что при нехватке арены публикация не создаёт канал.
    #[test]
    fn test_publish_exhaustion_leaves_no_state() {
        let clock = ManualClock::new(1);
        let broker = Broker::with_clock(
            BrokerConfig {
                arena_size: 200,
                ..BrokerConfig::default()
            },
            Arc::new(clock),
        );
        let big = PublishRequest::new(vec![0u8; 500]);
        let err = broker.publish(b"room", big).unwrap_err();
        assert!(matches!(err, BrokerError::ResourceExhausted { .. }));
        assert!(broker.channel_info(b"room").is_none());
        assert_eq!(broker.arena().used(), 0);
    }

    #[test]
    fn test_empty_channel_id_rejected() {
        let broker = Broker::default();
        assert!(matches!(
            broker.publish(b"", text("x")),
            Err(BrokerError::InvalidChannel { .. })
        ));
    }

    #[test]
    fn test_latest_and_info_do_not_create_channels() {
        let broker = Broker::default();
        assert!(broker.latest(b"none").is_none());
        assert!(broker.channel_info(b"none").is_none());
        assert_eq!(broker.stats().channels, 0);
    }

    #[tokio::test]
    async fn test_delete_channel_wakes_listeners_with_gone() {
        let broker = Arc::new(Broker::default());
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move {
                broker
                    .subscribe(b"room", None, Duration::from_secs(30))
                    .await
            })
        };
        while broker.channel_info(b"room").map_or(0, |i| i.listeners) == 0 {
            tokio::task::yield_now().await;
        }

        let info = broker.delete_channel(b"room").unwrap();
        assert_eq!(info.listeners, 1);
        assert_eq!(waiter.await.unwrap().unwrap(), SubscribeOutcome::Gone);
        assert!(broker.delete_channel(b"room").is_none());
    }

    #[test]
    fn test_sweep_purges_expired_messages() {
        let (broker, clock) = broker_with(5, DeliveryPolicy::Retain);
        broker.publish(b"a", text("1").with_ttl(10)).unwrap();
        broker.publish(b"a", text("2").with_ttl(100)).unwrap();
        clock.advance(50);

        let report = broker.sweep(&NeverReap);
        assert_eq!(report.expired, 1);
        assert_eq!(report.reaped, 0);
        assert_eq!(broker.stats().messages, 1);
        assert!(broker.validate().is_ok());
    }
}
