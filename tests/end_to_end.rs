//! End-to-end scenarios over the full codec → dispatcher → worker stack
//! (spec.md §8's literal end-to-end scenarios).

use sprite_core::codec::{crc32, encode_frame_to_vec, DecodeEvent, Decoder};
use sprite_core::dispatcher::Dispatcher;

fn drive_request(dispatcher: &Dispatcher, cmd: u8, payload: &[u8]) -> Vec<(u8, Vec<u8>)> {
    dispatcher
        .dispatch(cmd, payload)
        .into_iter()
        .map(|r| (r.status, r.data))
        .collect()
}

/// Decode a response frame the way the host would, to check the wire
/// bytes the dispatcher + codec would actually produce together.
fn decode_one_response(bytes: &[u8]) -> (u8, u8, Vec<u8>) {
    let mut dec = Decoder::new(true);
    for (i, &b) in bytes.iter().enumerate() {
        if let Some(DecodeEvent::Frame { cmd, status, .. }) = dec.push_byte(b, i as u64) {
            return (cmd, status.unwrap(), dec.payload().to_vec());
        }
    }
    panic!("no frame decoded");
}

#[test]
fn version_request_produces_expected_wire_bytes() {
    // scenario 1: a VERSION request (`SYNC CMD=0x0F LEN=0 CRC32`).
    let request = encode_frame_to_vec(0x0F, None, &[]);
    let mut dec = Decoder::new(false);
    let mut frame = None;
    for (i, &b) in request.iter().enumerate() {
        if let Some(ev) = dec.push_byte(b, i as u64) {
            frame = Some(ev);
        }
    }
    assert_eq!(
        frame,
        Some(DecodeEvent::Frame {
            cmd: 0x0F,
            status: None,
            len: 0
        })
    );

    let dispatcher = Dispatcher::new();
    let responses = drive_request(&dispatcher, 0x0F, &[]);
    assert_eq!(responses.len(), 1);
    let (status, data) = &responses[0];
    assert_eq!(*status, 0x00);

    let wire = encode_frame_to_vec(0x0F, Some(0x00), data);
    let (cmd, status, payload) = decode_one_response(&wire);
    assert_eq!(cmd, 0x0F);
    assert_eq!(status, 0x00);
    assert_eq!(payload.len(), 3);
}

#[test]
fn xor_model_upload_select_and_infer() {
    // scenario 2: chunked upload of an XOR model, then an inference.
    let dispatcher = Dispatcher::new();
    let bytes = sprite_core::model::load::test_fixtures::xor_model_bytes();

    let filename = b"xor.aif32";
    assert_eq!(drive_request(&dispatcher, 0x63, filename)[0].0, 0x00);
    for chunk in bytes.chunks(200) {
        assert_eq!(drive_request(&dispatcher, 0x68, chunk)[0].0, 0x00);
    }
    let crc = crc32(&bytes);
    assert_eq!(
        drive_request(&dispatcher, 0x69, &crc.to_le_bytes())[0].0,
        0x00
    );
    assert_eq!(drive_request(&dispatcher, 0x62, filename)[0].0, 0x00);

    let mut inputs = Vec::new();
    inputs.extend_from_slice(&1.0f32.to_le_bytes());
    inputs.extend_from_slice(&0.0f32.to_le_bytes());
    let (status, data) = &drive_request(&dispatcher, 0x50, &inputs)[0];
    assert_eq!(*status, 0x00);
    let out = f32::from_le_bytes(data[0..4].try_into().unwrap());
    assert!(out >= 0.0 && out <= 1.0);
}

#[test]
fn no_model_infer_returns_not_found_status() {
    // scenario 4.
    let dispatcher = Dispatcher::new();
    let (status, _) = drive_request(&dispatcher, 0x50, &[])[0].clone();
    assert_eq!(status, 0x02);
}

#[test]
fn batch_packs_three_subresponses_in_order() {
    // scenario 5: BATCH [CLEAR][RECT][FLUSH].
    let dispatcher = Dispatcher::new();
    let mut payload = Vec::new();
    payload.extend_from_slice(&[0x10, 0x01, 0x00]);
    payload.extend_from_slice(&[0x12, 0x05, 0x0A, 0x0A, 0x32, 0x1E, 0x01]);
    payload.extend_from_slice(&[0x2F, 0x00]);

    let responses = dispatcher.dispatch(0x70, &payload);
    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0].cmd, 0x10);
    assert_eq!(responses[1].cmd, 0x12);
    assert_eq!(responses[2].cmd, 0x2F);
    assert!(responses.iter().all(|r| r.status == 0x00));
}

#[test]
fn industrial_buffer_evicts_oldest_past_sixty() {
    // scenario 6: 65 writes, snapshot returns 60 with the oldest five gone.
    let dispatcher = Dispatcher::new();
    for i in 0..65 {
        let payload = (i as f32).to_le_bytes();
        drive_request(&dispatcher, 0xA2, &payload);
    }
    let (status, data) = &drive_request(&dispatcher, 0xA3, &[])[0];
    assert_eq!(*status, 0x00);
    assert_eq!(data.len() / 4, 60);
    let first = f32::from_le_bytes(data[0..4].try_into().unwrap());
    assert_eq!(first, 5.0);
}

#[test]
fn finetune_session_converges_on_xor() {
    // scenario 3: FINETUNE_START then repeated FINETUNE_DATA over the XOR set.
    let dispatcher = Dispatcher::new();
    let bytes = sprite_core::model::load::test_fixtures::xor_model_bytes();
    let filename = b"xor.aif32";
    drive_request(&dispatcher, 0x63, filename);
    for chunk in bytes.chunks(200) {
        drive_request(&dispatcher, 0x68, chunk);
    }
    let crc = crc32(&bytes);
    drive_request(&dispatcher, 0x69, &crc.to_le_bytes());
    drive_request(&dispatcher, 0x62, filename);

    let lr: f32 = 0.5;
    assert_eq!(
        drive_request(&dispatcher, 0x65, &lr.to_le_bytes())[0].0,
        0x00
    );

    let samples = [
        ([0.0f32, 0.0], [0.0f32]),
        ([0.0, 1.0], [1.0]),
        ([1.0, 0.0], [1.0]),
        ([1.0, 1.0], [0.0]),
    ];
    for step in 0..2000 {
        let (x, t) = samples[step % samples.len()];
        let mut payload = Vec::new();
        payload.extend_from_slice(&x[0].to_le_bytes());
        payload.extend_from_slice(&x[1].to_le_bytes());
        payload.extend_from_slice(&t[0].to_le_bytes());
        let (status, _) = drive_request(&dispatcher, 0x66, &payload)[0].clone();
        assert_eq!(status, 0x00);
    }
    drive_request(&dispatcher, 0x67, &[]);

    for (x, t) in samples {
        let mut payload = Vec::new();
        payload.extend_from_slice(&x[0].to_le_bytes());
        payload.extend_from_slice(&x[1].to_le_bytes());
        let (_, data) = &drive_request(&dispatcher, 0x50, &payload)[0];
        let y = f32::from_le_bytes(data[0..4].try_into().unwrap());
        assert!((y - t[0]).abs() < 0.35, "expected {:?} ~ {:?}, got {}", x, t, y);
    }
}
