#![no_main]

use libfuzzer_sys::fuzz_target;
use pushpoll::network::{Command, Reply};

fuzz_target!(|data: &[u8]| {
    let line = String::from_utf8_lossy(data);
    match Command::parse(&line) {
        // PUB с ответом кодируется без паники
        Ok(Some(Command::Pub { payload, .. })) => {
            let _ = Reply::ok(payload).encode();
        }
        Ok(_) => {}
        Err(err) => {
            let encoded = Reply::from_error(&err).encode();
            assert!(encoded.starts_with(b"-ERR "));
        }
    }
});
