#![no_main]

use libfuzzer_sys::fuzz_target;
use streamtri::io::{PointEvent, PointReader, SpbReader};

fuzz_target!(|data: &[u8]| {
    let Ok(mut reader) = SpbReader::new(data) else {
        return;
    };

    // an error ends the stream
    loop {
        match reader.read_event() {
            Ok(PointEvent::Eof) | Err(_) => break,
            Ok(_) => {}
        }
    }
    assert_eq!(reader.read_event().ok(), Some(PointEvent::Eof));
});
