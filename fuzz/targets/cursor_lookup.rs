#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pushpoll::{
    broker::{Clock, ManualClock},
    Broker, BrokerConfig, Cursor, PublishRequest, SubscribeOutcome,
};

#[derive(Debug, Arbitrary)]
enum Op {
    Publish { ttl: Option<u8>, size: u8 },
    Tick(i8),
    Lookup { time_offset: i16, tag: u8 },
}

#[derive(Debug, Arbitrary)]
struct Input {
    max: u8,
    ops: Vec<Op>,
}

const START: u64 = 1_000_000;

fuzz_target!(|input: Input| {
    let clock = ManualClock::new(START);
    let broker = Broker::with_clock(
        BrokerConfig {
            max_message_queue_size: usize::from(input.max % 8) + 1,
            ..BrokerConfig::default()
        },
        Arc::new(clock.clone()),
    );

    for op in input.ops {
        match op {
            Op::Publish { ttl, size } => {
                let mut request = PublishRequest::new(vec![0u8; usize::from(size)]);
                request.ttl_secs = ttl.map(u64::from);
                broker.publish(b"fuzz", request).unwrap();
            }
            Op::Tick(delta) => {
                clock.set(clock.now().saturating_add_signed(i64::from(delta)));
            }
            Op::Lookup { time_offset, tag } => {
                let time = START.saturating_add_signed(i64::from(time_offset));
                let cursor = Cursor::new(time, u32::from(tag));
                if let Ok(Some(SubscribeOutcome::Delivered(message))) =
                    broker.try_subscribe(b"fuzz", Some(cursor))
                {
                    assert!(message.cursor > cursor);
                }
            }
        }
        broker.validate().unwrap();
    }
});
