//! Host-facing simulator binary.
//!
//! Wires the codec and dispatcher to two byte-oriented full-duplex
//! streams — stdin (host → device) and stdout (device → host) — standing
//! in for the real UART link (spec.md §1 treats the transport itself as
//! external). Every decoded frame is dispatched; every response frame
//! (including a `BATCH`'s sub-responses) is re-encoded and written back
//! immediately, preserving emission order per spec.md §5.

use sprite_core::codec::{encode_frame, DecodeEvent, Decoder};
use sprite_core::dispatcher::Dispatcher;
use std::io::{self, Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn main() -> io::Result<()> {
    sprite_core::device::init_from([0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02, 0x03, 0x04]);

    let dispatcher = Dispatcher::new();
    let mut decoder = Decoder::new(false);
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut byte = [0u8; 1];
    let mut input = stdin.lock();

    loop {
        dispatcher.fs_tick().ok();
        match input.read(&mut byte) {
            Ok(0) => break, // host closed the stream
            Ok(_) => {}
            Err(e) => return Err(e),
        }

        match decoder.push_byte(byte[0], now_ms()) {
            Some(DecodeEvent::Frame { cmd, len, .. }) => {
                let payload = decoder.payload()[..len as usize].to_vec();
                for resp in dispatcher.dispatch(cmd, &payload) {
                    encode_frame(resp.cmd, Some(resp.status), &resp.data, &mut |b| {
                        let _ = stdout.write_all(&[b]);
                    })
                    .ok();
                }
                stdout.flush()?;
            }
            Some(DecodeEvent::CrcError) | Some(DecodeEvent::Timeout) => {
                // Protocol errors emit no response; the host learns via timeout.
            }
            None => {}
        }
    }
    Ok(())
}
