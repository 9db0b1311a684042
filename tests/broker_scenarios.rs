use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use pushpoll::{
    broker::{Clock, ManualClock, NeverReap},
    Broker, BrokerConfig, BrokerError, Cursor, DeliveryPolicy, PublishRequest,
    SubscribeOutcome,
};
use tokio::{task::JoinHandle, time::Instant};

fn broker_with(config: BrokerConfig) -> (Arc<Broker>, ManualClock) {
    let clock = ManualClock::new(1_700_000_000);
    let broker = Broker::with_clock(config, Arc::new(clock.clone()));
    (Arc::new(broker), clock)
}

fn queue_of(max: usize) -> BrokerConfig {
    BrokerConfig {
        max_message_queue_size: max,
        ..BrokerConfig::default()
    }
}

fn text(payload: &'static str) -> PublishRequest {
    PublishRequest::new(payload).with_content_type("text/plain")
}

fn payload_of(outcome: &SubscribeOutcome) -> Option<Bytes> {
    match outcome {
        SubscribeOutcome::Delivered(message) => Some(message.payload.clone()),
        _ => None,
    }
}

fn spawn_subscriber(
    broker: &Arc<Broker>,
    channel: &'static [u8],
    cursor: Option<Cursor>,
    timeout: Duration,
) -> JoinHandle<Result<SubscribeOutcome, BrokerError>> {
    let broker = broker.clone();
    tokio::spawn(async move { broker.subscribe(channel, cursor, timeout).await })
}

/// Ждёт, пока в канале не окажется `n` ожидающих слушателей.
async fn wait_for_listeners(
    broker: &Broker,
    channel: &[u8],
    n: usize,
) {
    while broker.channel_info(channel).map_or(0, |i| i.listeners) < n {
        tokio::task::yield_now().await;
    }
}

/// Тест проверяет публикацию без слушателей и немедленную выдачу
/// сообщения подписчику без курсора.
#[tokio::test]
async fn publish_then_subscribe_returns_immediately() {
    let (broker, _clock) = broker_with(BrokerConfig::default());

    let receipt = broker
        .publish(b"room1", text("hello").with_ttl(60))
        .unwrap();
    assert_eq!(receipt.info.messages, 1);
    assert_eq!(receipt.delivered_to, 0);

    let outcome = broker
        .subscribe(b"room1", None, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(payload_of(&outcome), Some(Bytes::from_static(b"hello")));

    // сообщение живёт до вытеснения, а подписчик с его курсором ждёт дальше
    assert_eq!(broker.channel_info(b"room1").unwrap().messages, 1);
    assert_eq!(
        broker.try_subscribe(b"room1", Some(receipt.cursor)).unwrap(),
        None
    );
}

#[tokio::test(start_paused = true)]
async fn subscribe_without_publish_times_out() {
    let (broker, _clock) = broker_with(BrokerConfig::default());

    let start = Instant::now();
    let outcome = broker
        .subscribe(b"room2", None, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(outcome, SubscribeOutcome::Timeout);
    assert!(start.elapsed() >= Duration::from_secs(5));
    // после таймаута слушатель снят с ожидания
    assert_eq!(broker.channel_info(b"room2").unwrap().listeners, 0);
    assert_eq!(broker.stats().timeouts, 1);
}

/// Тест проверяет вытеснение самого старого сообщения при переполнении.
#[tokio::test]
async fn eviction_keeps_newest_messages() {
    let (broker, _clock) = broker_with(queue_of(2));

    for payload in ["a", "b", "c"] {
        broker.publish(b"room", text(payload)).unwrap();
    }

    let info = broker.channel_info(b"room").unwrap();
    assert_eq!(info.messages, 2);
    assert_eq!(broker.stats().evicted, 1);

    let first = broker.try_subscribe(b"room", None).unwrap().unwrap();
    assert_eq!(payload_of(&first), Some(Bytes::from_static(b"b")));

    let SubscribeOutcome::Delivered(b) = first else {
        unreachable!()
    };
    let second = broker
        .try_subscribe(b"room", Some(b.cursor))
        .unwrap()
        .unwrap();
    assert_eq!(payload_of(&second), Some(Bytes::from_static(b"c")));
}

#[tokio::test]
async fn evicted_cursor_is_gone() {
    let (broker, _clock) = broker_with(queue_of(2));

    let a = broker.publish(b"room", text("a")).unwrap().cursor;
    broker.publish(b"room", text("b")).unwrap();
    broker.publish(b"room", text("c")).unwrap();

    let outcome = broker
        .subscribe(b"room", Some(a), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(outcome, SubscribeOutcome::Gone);
    assert_eq!(broker.stats().gone, 1);
}

/// Тест проверяет, что курсор старше истории, которая ничего не теряла,
/// отдаёт самое старое сообщение.
#[tokio::test]
async fn cursor_before_lossless_history_gets_oldest() {
    let (broker, clock) = broker_with(BrokerConfig::default());
    let early = Cursor::new(clock.now() - 100, 0);

    broker.publish(b"room", text("first")).unwrap();
    broker.publish(b"room", text("second")).unwrap();

    let outcome = broker.try_subscribe(b"room", Some(early)).unwrap().unwrap();
    assert_eq!(payload_of(&outcome), Some(Bytes::from_static(b"first")));
}

/// Тест проверяет широковещательную раздачу: все ожидающие слушатели
/// получают одно и то же сообщение, слушатель с более новым курсором
/// продолжает ждать.
#[tokio::test]
async fn publish_broadcasts_to_all_eligible_listeners() {
    let (broker, clock) = broker_with(BrokerConfig::default());
    let future = Cursor::new(clock.now() + 1_000, 0);

    let first = spawn_subscriber(&broker, b"news", None, Duration::from_secs(30));
    let second = spawn_subscriber(&broker, b"news", None, Duration::from_secs(30));
    let ahead = spawn_subscriber(&broker, b"news", Some(future), Duration::from_millis(200));
    wait_for_listeners(&broker, b"news", 3).await;

    let receipt = broker.publish(b"news", text("breaking")).unwrap();
    assert_eq!(receipt.delivered_to, 2);
    assert_eq!(receipt.info.listeners, 1);

    for handle in [first, second] {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(payload_of(&outcome), Some(Bytes::from_static(b"breaking")));
    }
    assert_eq!(ahead.await.unwrap().unwrap(), SubscribeOutcome::Timeout);
    assert_eq!(broker.channel_info(b"news").unwrap().listeners, 0);
}

/// Тест проверяет, что слушатель получает ровно один итог, даже если
/// публикация совпадает с истечением таймаута.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timeout_and_publish_race_resolves_once() {
    let (broker, _clock) = broker_with(BrokerConfig::default());

    for i in 0..200 {
        let channel = format!("race-{i}");
        let subscriber = {
            let broker = broker.clone();
            let channel = channel.clone();
            tokio::spawn(async move {
                broker
                    .subscribe(channel.as_bytes(), None, Duration::from_millis(1))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_micros(900)).await;

        let receipt = broker.publish(channel.as_bytes(), text("x")).unwrap();
        let outcome = subscriber.await.unwrap().unwrap();

        match outcome {
            SubscribeOutcome::Delivered(_) => {}
            SubscribeOutcome::Timeout => assert_eq!(receipt.delivered_to, 0),
            SubscribeOutcome::Gone => panic!("unexpected Gone on {channel}"),
        }
        if receipt.delivered_to == 1 {
            assert!(payload_of(&outcome).is_some());
        }
        assert_eq!(broker.channel_info(channel.as_bytes()).unwrap().listeners, 0);
    }
    assert!(broker.validate().is_ok());
}

/// Тест проверяет, что удаление канала в момент истечения таймаута даёт
/// слушателю `Gone` или `Timeout`, но никогда не закрытый слот.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_and_timeout_race_resolves_once() {
    let (broker, _clock) = broker_with(BrokerConfig::default());

    for i in 0..200 {
        let channel = format!("doomed-{i}");
        let subscriber = {
            let broker = broker.clone();
            let channel = channel.clone();
            tokio::spawn(async move {
                broker
                    .subscribe(channel.as_bytes(), None, Duration::from_millis(1))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_micros(900)).await;

        let deleted = broker.delete_channel(channel.as_bytes());
        let outcome = subscriber.await.unwrap();

        match outcome {
            Ok(SubscribeOutcome::Gone) => {
                assert_eq!(deleted.map(|info| info.listeners), Some(1));
            }
            Ok(SubscribeOutcome::Timeout) => {}
            other => panic!("unexpected outcome on {channel}: {other:?}"),
        }
    }
    assert!(broker.validate().is_ok());
    assert_eq!(broker.stats().listeners, 0);
}

/// Тест проверяет, что при `ConsumeOnce` сообщение не выдаётся повторно.
#[tokio::test]
async fn consume_once_delivers_at_most_once() {
    let (broker, _clock) = broker_with(BrokerConfig {
        delivery_policy: DeliveryPolicy::ConsumeOnce,
        ..BrokerConfig::default()
    });

    let waiter = spawn_subscriber(&broker, b"jobs", None, Duration::from_secs(30));
    wait_for_listeners(&broker, b"jobs", 1).await;

    let receipt = broker.publish(b"jobs", text("job-1")).unwrap();
    assert_eq!(receipt.delivered_to, 1);
    assert_eq!(receipt.info.messages, 0);
    let outcome = waiter.await.unwrap().unwrap();
    assert_eq!(payload_of(&outcome), Some(Bytes::from_static(b"job-1")));

    // следующий подписчик ничего не получает и не видит потерю
    assert_eq!(broker.try_subscribe(b"jobs", None).unwrap(), None);
    assert_eq!(broker.try_subscribe(b"jobs", Some(receipt.cursor)).unwrap(), None);

    broker.publish(b"jobs", text("job-2")).unwrap();
    let next = broker
        .try_subscribe(b"jobs", Some(receipt.cursor))
        .unwrap()
        .unwrap();
    assert_eq!(payload_of(&next), Some(Bytes::from_static(b"job-2")));
    assert_eq!(broker.try_subscribe(b"jobs", None).unwrap(), None);
}

/// Тест проверяет, что отменённая подписка снимает слушателя с ожидания.
#[tokio::test]
async fn dropped_subscribe_unparks_listener() {
    let (broker, _clock) = broker_with(BrokerConfig::default());

    let waiter = spawn_subscriber(&broker, b"room", None, Duration::from_secs(60));
    wait_for_listeners(&broker, b"room", 1).await;
    let used_while_parked = broker.arena().used();

    waiter.abort();
    assert!(waiter.await.unwrap_err().is_cancelled());

    let info = broker.channel_info(b"room").unwrap();
    assert_eq!(info.listeners, 0);
    assert!(broker.arena().used() < used_while_parked);

    let receipt = broker.publish(b"room", text("late")).unwrap();
    assert_eq!(receipt.delivered_to, 0);
}

#[tokio::test]
async fn expired_messages_are_not_delivered() {
    let (broker, clock) = broker_with(BrokerConfig::default());

    let old = broker.publish(b"room", text("old").with_ttl(10)).unwrap().cursor;
    clock.advance(20);

    assert_eq!(broker.try_subscribe(b"room", None).unwrap(), None);
    // курсор истёкшего сообщения указывает в последнюю выданную точку
    assert_eq!(broker.try_subscribe(b"room", Some(old)).unwrap(), None);

    let before = Cursor::new(old.time - 1, 0);
    assert_eq!(
        broker.try_subscribe(b"room", Some(before)).unwrap(),
        Some(SubscribeOutcome::Gone)
    );
}

/// Тест проверяет, что при нехватке арены подписка не оставляет канал.
#[tokio::test]
async fn subscribe_on_exhausted_arena_leaves_no_channel() {
    let (broker, _clock) = broker_with(BrokerConfig {
        arena_size: 100,
        ..BrokerConfig::default()
    });

    let err = broker
        .subscribe(b"room", None, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::ResourceExhausted { .. }));
    assert!(broker.channel_info(b"room").is_none());
    assert_eq!(broker.arena().used(), 0);
}

#[tokio::test]
async fn sweep_with_never_reap_keeps_channels() {
    let (broker, clock) = broker_with(BrokerConfig::default());
    broker.publish(b"a", text("x").with_ttl(1)).unwrap();
    clock.advance(10);

    let report = broker.sweep(&NeverReap);
    assert_eq!(report.expired, 1);
    assert_eq!(report.reaped, 0);
    assert_eq!(broker.stats().channels, 1);
}
