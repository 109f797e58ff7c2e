//! C5 — Command Dispatcher
//!
//! Classifies every parsed frame per spec.md §4.5: immediate commands run
//! on the calling (I/O) context against worker state directly; deferred
//! commands cross to the worker context through the [`CommandQueue`] (C2)
//! and back through its response ring. Grounded in the two-context split
//! `kernel/src/jarvis/mod.rs` and its hypervisor caller describe (an I/O
//! side issuing work, a compute side running it to completion), adapted
//! from the teacher's ad-hoc call sites into one explicit classification
//! table.
//!
//! The worker context here is a real background thread draining the
//! command queue — not a simulation of one — so the mutex/queue machinery
//! in `queue.rs` is genuinely exercised under concurrent access.

use crate::codec::Crc32;
use crate::config::{BATCH_MAX_DEPTH, FS_STEP_BYTES, MAX_FILENAME};
use crate::errors::{DispatcherError, IoError, Status, ToStatus};
use crate::queue::CommandQueue;
use crate::worker::{self, UploadSession, WorkerState};
use spin::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// One response frame's contents, used both for a single command and for
/// each sub-response a `BATCH` produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub cmd: u8,
    pub status: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FsState {
    Idle,
    SavePending,
    Saving,
    LoadPending,
    Loading,
}

/// Background filesystem task state: the file name and byte cursor for an
/// in-flight save/load plus the bytes being written or read in
/// `FS_STEP_BYTES`-sized steps (spec.md §4.5 "filesystem as background
/// task").
struct FsTask {
    state: FsState,
    filename: String,
    bytes: Vec<u8>,
    pos: usize,
}

impl FsTask {
    fn idle() -> Self {
        FsTask {
            state: FsState::Idle,
            filename: String::new(),
            bytes: Vec::new(),
            pos: 0,
        }
    }
}

/// Flags shared between the I/O context's immediate path and the worker
/// thread, guarded by one small mutex (spec.md §4.5).
struct Guards {
    is_training: bool,
    is_uploading: bool,
}

impl Guards {
    fn new() -> Self {
        Guards {
            is_training: false,
            is_uploading: false,
        }
    }
}

pub struct Dispatcher {
    queue: Arc<CommandQueue>,
    worker_state: Arc<Mutex<WorkerState>>,
    guards: Mutex<Guards>,
    fs: Mutex<FsTask>,
    shutdown: Arc<AtomicBool>,
    worker_thread: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let queue = Arc::new(CommandQueue::new());
        let worker_state = Arc::new(Mutex::new(WorkerState::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let bg_queue = Arc::clone(&queue);
        let bg_state = Arc::clone(&worker_state);
        let bg_shutdown = Arc::clone(&shutdown);
        let worker_thread = thread::spawn(move || {
            while !bg_shutdown.load(Ordering::Relaxed) {
                match bg_queue.pop_command() {
                    Some(entry) => {
                        let (status, data) = {
                            let mut state = bg_state.lock();
                            worker::process(&mut state, entry.cmd, entry.payload())
                        };
                        if !bg_queue.push_response(entry.cmd, status.byte(), &data) {
                            // Response too large for a queue entry (or the
                            // response ring is full): surface Error rather
                            // than hand the host a truncated payload.
                            bg_queue.push_response(entry.cmd, Status::Error.byte(), &[]);
                        }
                    }
                    None => thread::sleep(Duration::from_micros(200)),
                }
            }
        });

        Dispatcher {
            queue,
            worker_state,
            guards: Mutex::new(Guards::new()),
            fs: Mutex::new(FsTask::idle()),
            shutdown,
            worker_thread: Some(worker_thread),
        }
    }

    /// Dispatch one parsed frame, returning every response frame it
    /// produces in emission order (more than one only for `BATCH`).
    pub fn dispatch(&self, cmd: u8, payload: &[u8]) -> Vec<Response> {
        self.dispatch_at_depth(cmd, payload, 0)
    }

    fn dispatch_at_depth(&self, cmd: u8, payload: &[u8], depth: usize) -> Vec<Response> {
        if cmd == 0x70 {
            return self.batch(payload, depth);
        }
        let (status, data) = self.dispatch_one(cmd, payload, depth);
        vec![Response {
            cmd,
            status: status.byte(),
            data,
        }]
    }

    fn dispatch_one(&self, cmd: u8, payload: &[u8], depth: usize) -> (Status, Vec<u8>) {
        match cmd {
            0x00 => (Status::Ok, Vec::new()),
            0x02 => {
                self.worker_state.lock().model.reset();
                (Status::Ok, Vec::new())
            }
            0x0E => {
                let free = self.worker_state.lock().model.arena_free();
                (Status::Ok, (free.min(u16::MAX as usize) as u16).to_le_bytes().to_vec())
            }
            0x0F => (Status::Ok, vec![VERSION.0, VERSION.1, VERSION.2]),
            0x53 => self.ai_save(payload),
            0x54 => self.ai_load(payload),
            0x63 => self.model_upload(payload),
            0x68 => self.upload_chunk(payload),
            0x69 => self.upload_end(payload),
            0xA0..=0xA7 => self.industrial(cmd, payload),
            0x70 => unreachable!("handled by dispatch_at_depth"),
            _ if depth > BATCH_MAX_DEPTH => (DispatcherError::BatchTooDeep.to_status(), Vec::new()),
            _ => self.run_deferred(cmd, payload),
        }
    }

    fn run_deferred(&self, cmd: u8, payload: &[u8]) -> (Status, Vec<u8>) {
        if matches!(cmd, 0x51 | 0x65 | 0x66) && self.fs.lock().state != FsState::Idle {
            return (DispatcherError::FsBusy.to_status(), Vec::new());
        }
        if !self.queue.push_command(cmd, payload) {
            return (DispatcherError::QueueFull.to_status(), Vec::new());
        }
        if matches!(cmd, 0x65 | 0x66) {
            self.guards.lock().is_training = true;
        }
        loop {
            if let Some(resp) = self.queue.pop_response() {
                if matches!(cmd, 0x65 | 0x66 | 0x67) {
                    self.guards.lock().is_training = cmd == 0x65 || cmd == 0x66;
                }
                let status = match resp.status {
                    0x00 => Status::Ok,
                    0x02 => Status::NotFound,
                    _ => Status::Error,
                };
                return (status, resp.data().to_vec());
            }
            thread::sleep(Duration::from_micros(100));
        }
    }

    fn industrial(&self, cmd: u8, payload: &[u8]) -> (Status, Vec<u8>) {
        let mut state = self.worker_state.lock();
        match cmd {
            0xA0 => (Status::Ok, crate::device::get().to_vec()),
            0xA1 => {
                if payload.len() < 4 {
                    return (Status::Error, Vec::new());
                }
                let sample = f32::from_le_bytes(payload[0..4].try_into().unwrap());
                state.industrial.write(sample);
                (Status::Ok, Vec::new())
            }
            0xA2 => {
                if payload.len() < 4 {
                    return (Status::Error, Vec::new());
                }
                let sample = f32::from_le_bytes(payload[0..4].try_into().unwrap());
                state.industrial.write(sample);
                (Status::Ok, Vec::new())
            }
            0xA3 => {
                let snap = state.industrial.snapshot();
                let mut data = Vec::with_capacity(snap.len() * 4);
                for v in snap {
                    data.extend_from_slice(&v.to_le_bytes());
                }
                (Status::Ok, data)
            }
            0xA4 => {
                state.industrial.baseline_capture();
                (Status::Ok, Vec::new())
            }
            0xA5 => (Status::Ok, state.industrial.delta().to_le_bytes().to_vec()),
            0xA6 => {
                let reference: Vec<f32> = payload
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                match state.industrial.correlate(&reference) {
                    Some(r) => (Status::Ok, r.to_le_bytes().to_vec()),
                    None => (Status::Error, Vec::new()),
                }
            }
            0xA7 => (Status::Ok, Vec::new()),
            _ => (DispatcherError::UnknownCommand.to_status(), Vec::new()),
        }
    }

    fn model_upload(&self, payload: &[u8]) -> (Status, Vec<u8>) {
        let mut guards = self.guards.lock();
        if guards.is_uploading {
            return (DispatcherError::UploadBusy.to_status(), Vec::new());
        }
        if payload.is_empty() || payload.len() > MAX_FILENAME {
            return (Status::Error, Vec::new());
        }
        let filename = String::from_utf8_lossy(payload).into_owned();
        self.worker_state.lock().upload = Some(UploadSession {
            filename,
            buffer: Vec::new(),
            crc: Crc32::new(),
        });
        guards.is_uploading = true;
        (Status::Ok, Vec::new())
    }

    fn upload_chunk(&self, payload: &[u8]) -> (Status, Vec<u8>) {
        let mut state = self.worker_state.lock();
        match &mut state.upload {
            Some(session) => {
                session.buffer.extend_from_slice(payload);
                session.crc.update_all(payload);
                (Status::Ok, Vec::new())
            }
            None => (DispatcherError::UnknownCommand.to_status(), Vec::new()),
        }
    }

    fn upload_end(&self, payload: &[u8]) -> (Status, Vec<u8>) {
        if payload.len() != 4 {
            return (Status::Error, Vec::new());
        }
        let expected = u32::from_le_bytes(payload.try_into().unwrap());
        let mut state = self.worker_state.lock();
        let session = match state.upload.take() {
            Some(s) => s,
            None => return (DispatcherError::UnknownCommand.to_status(), Vec::new()),
        };
        self.guards.lock().is_uploading = false;
        let actual = session.crc.finish();
        if actual != expected {
            crate::device_warn!("[UPLOAD] crc mismatch for '{}', discarding", session.filename);
            return (Status::Error, Vec::new());
        }
        match state.store.write(&session.filename, &session.buffer) {
            Ok(()) => (Status::Ok, Vec::new()),
            Err(e) => (e.to_status(), Vec::new()),
        }
    }

    fn ai_save(&self, payload: &[u8]) -> (Status, Vec<u8>) {
        if payload.is_empty() || payload.len() > MAX_FILENAME {
            return (Status::Error, Vec::new());
        }
        let mut fs = self.fs.lock();
        if fs.state != FsState::Idle {
            return (DispatcherError::FsBusy.to_status(), Vec::new());
        }
        if self.guards.lock().is_training {
            return (DispatcherError::TrainingBusy.to_status(), Vec::new());
        }
        let filename = String::from_utf8_lossy(payload).into_owned();
        let bytes = match self.worker_state.lock().model.raw_bytes() {
            Some(b) => b.to_vec(),
            None => return (Status::NotFound, Vec::new()),
        };
        fs.state = FsState::SavePending;
        fs.filename = filename;
        fs.bytes = bytes;
        fs.pos = 0;
        (Status::Ok, Vec::new())
    }

    fn ai_load(&self, payload: &[u8]) -> (Status, Vec<u8>) {
        if payload.is_empty() || payload.len() > MAX_FILENAME {
            return (Status::Error, Vec::new());
        }
        let mut fs = self.fs.lock();
        if fs.state != FsState::Idle {
            return (DispatcherError::FsBusy.to_status(), Vec::new());
        }
        if self.guards.lock().is_training {
            return (DispatcherError::TrainingBusy.to_status(), Vec::new());
        }
        let filename = String::from_utf8_lossy(payload).into_owned();
        let bytes = match self.worker_state.lock().store.read(&filename) {
            Ok(b) => b,
            Err(e) => return (e.to_status(), Vec::new()),
        };
        fs.state = FsState::LoadPending;
        fs.filename = filename;
        fs.bytes = bytes;
        fs.pos = 0;
        (Status::Ok, Vec::new())
    }

    /// Advance the background filesystem task by one `FS_STEP_BYTES` step.
    /// Call this once per event-loop tick; it is a no-op when `fs_state`
    /// is idle.
    pub fn fs_tick(&self) -> Result<(), IoError> {
        let mut fs = self.fs.lock();
        match fs.state {
            FsState::Idle => Ok(()),
            FsState::SavePending => {
                fs.state = FsState::Saving;
                Ok(())
            }
            FsState::LoadPending => {
                fs.state = FsState::Loading;
                Ok(())
            }
            FsState::Saving => {
                let end = (fs.pos + FS_STEP_BYTES).min(fs.bytes.len());
                fs.pos = end;
                if fs.pos >= fs.bytes.len() {
                    let filename = fs.filename.clone();
                    let bytes = std::mem::take(&mut fs.bytes);
                    drop(fs);
                    let result = self.worker_state.lock().store.write(&filename, &bytes);
                    self.fs.lock().state = FsState::Idle;
                    return result;
                }
                Ok(())
            }
            FsState::Loading => {
                let end = (fs.pos + FS_STEP_BYTES).min(fs.bytes.len());
                fs.pos = end;
                if fs.pos >= fs.bytes.len() {
                    let filename = fs.filename.clone();
                    let bytes = fs.bytes.clone();
                    drop(fs);
                    let result = self.worker_state.lock().model.load(&bytes, &filename);
                    self.fs.lock().state = FsState::Idle;
                    return result.map_err(|_| IoError::Read);
                }
                Ok(())
            }
        }
    }

    /// Run `fs_tick` to completion; used by tests and the simulator when
    /// an immediate result is wanted instead of polling every tick.
    pub fn fs_drain(&self) -> Result<(), IoError> {
        loop {
            self.fs_tick()?;
            if self.fs.lock().state == FsState::Idle {
                return Ok(());
            }
        }
    }

    fn batch(&self, payload: &[u8], depth: usize) -> Vec<Response> {
        if depth >= BATCH_MAX_DEPTH {
            return vec![Response {
                cmd: 0x70,
                status: DispatcherError::BatchTooDeep.to_status().byte(),
                data: Vec::new(),
            }];
        }
        let mut responses = Vec::new();
        let mut i = 0;
        while i + 2 <= payload.len() {
            let sub_cmd = payload[i];
            let sub_len = payload[i + 1] as usize;
            let start = i + 2;
            let end = start + sub_len;
            if end > payload.len() {
                break;
            }
            let sub_payload = &payload[start..end];
            responses.extend(self.dispatch_at_depth(sub_cmd, sub_payload, depth + 1));
            i = end;
        }
        responses
    }
}

const VERSION: (u8, u8, u8) = (1, 0, 0);

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.worker_thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_str(payload: &mut Vec<u8>, s: &str) {
        payload.extend_from_slice(s.as_bytes());
    }

    #[test]
    fn version_responds_with_fixed_triplet() {
        let d = Dispatcher::new();
        let r = d.dispatch(0x0F, &[]);
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].status, Status::Ok.byte());
        assert_eq!(r[0].data, vec![VERSION.0, VERSION.1, VERSION.2]);
    }

    #[test]
    fn no_model_infer_is_not_found() {
        let d = Dispatcher::new();
        let r = d.dispatch(0x50, &[]);
        assert_eq!(r[0].status, Status::NotFound.byte());
    }

    #[test]
    fn upload_select_and_infer_round_trip() {
        let d = Dispatcher::new();
        let bytes = crate::model::load::test_fixtures::xor_model_bytes();

        let mut name_payload = Vec::new();
        push_str(&mut name_payload, "xor.aif32");
        assert_eq!(d.dispatch(0x63, &name_payload)[0].status, Status::Ok.byte());

        for chunk in bytes.chunks(200) {
            assert_eq!(d.dispatch(0x68, chunk)[0].status, Status::Ok.byte());
        }
        let crc = crate::codec::crc32(&bytes);
        assert_eq!(d.dispatch(0x69, &crc.to_le_bytes())[0].status, Status::Ok.byte());

        assert_eq!(d.dispatch(0x62, &name_payload)[0].status, Status::Ok.byte());

        let mut inputs = Vec::new();
        inputs.extend_from_slice(&1.0f32.to_le_bytes());
        inputs.extend_from_slice(&0.0f32.to_le_bytes());
        let r = d.dispatch(0x50, &inputs);
        assert_eq!(r[0].status, Status::Ok.byte());
        assert_eq!(r[0].data.len(), 4);
    }

    #[test]
    fn upload_with_bad_crc_is_rejected() {
        let d = Dispatcher::new();
        let mut name_payload = Vec::new();
        push_str(&mut name_payload, "bad.aif32");
        d.dispatch(0x63, &name_payload);
        d.dispatch(0x68, &[1, 2, 3]);
        let r = d.dispatch(0x69, &0xDEADBEEFu32.to_le_bytes());
        assert_eq!(r[0].status, Status::Error.byte());
    }

    #[test]
    fn batch_runs_subcommands_in_order() {
        let d = Dispatcher::new();
        let mut payload = Vec::new();
        payload.extend_from_slice(&[0x10, 0x01, 0x00]);
        payload.extend_from_slice(&[0x12, 0x05, 0x0A, 0x0A, 0x32, 0x1E, 0x01]);
        payload.extend_from_slice(&[0x2F, 0x00]);
        let r = d.dispatch(0x70, &payload);
        assert_eq!(r.len(), 3);
        assert_eq!(r[0].cmd, 0x10);
        assert_eq!(r[1].cmd, 0x12);
        assert_eq!(r[2].cmd, 0x2F);
        assert!(r.iter().all(|resp| resp.status == Status::Ok.byte()));
    }

    #[test]
    fn industrial_overflow_keeps_sixty_samples() {
        let d = Dispatcher::new();
        for i in 0..65 {
            let payload = (i as f32).to_le_bytes();
            d.dispatch(0xA2, &payload);
        }
        let r = d.dispatch(0xA3, &[]);
        assert_eq!(r[0].data.len() / 4, 60);
    }

    #[test]
    fn save_then_load_round_trips_model() {
        let d = Dispatcher::new();
        let bytes = crate::model::load::test_fixtures::xor_model_bytes();
        let mut name_payload = Vec::new();
        push_str(&mut name_payload, "xor.aif32");
        d.dispatch(0x63, &name_payload);
        for chunk in bytes.chunks(200) {
            d.dispatch(0x68, chunk);
        }
        let crc = crate::codec::crc32(&bytes);
        d.dispatch(0x69, &crc.to_le_bytes());
        d.dispatch(0x62, &name_payload);

        let r = d.dispatch(0x53, &name_payload);
        assert_eq!(r[0].status, Status::Ok.byte());
        d.fs_drain().unwrap();

        d.dispatch(0x02, &[]);
        let r = d.dispatch(0x54, &name_payload);
        assert_eq!(r[0].status, Status::Ok.byte());
        d.fs_drain().unwrap();

        let r = d.dispatch(0x60, &[]);
        assert_eq!(r[0].status, Status::Ok.byte());
    }

    fn upload_select_xor(d: &Dispatcher, filename: &str) {
        let bytes = crate::model::load::test_fixtures::xor_model_bytes();
        let mut name_payload = Vec::new();
        push_str(&mut name_payload, filename);
        d.dispatch(0x63, &name_payload);
        for chunk in bytes.chunks(200) {
            d.dispatch(0x68, chunk);
        }
        let crc = crate::codec::crc32(&bytes);
        d.dispatch(0x69, &crc.to_le_bytes());
        d.dispatch(0x62, &name_payload);
    }

    #[test]
    fn ai_load_is_rejected_while_training_active() {
        let d = Dispatcher::new();
        upload_select_xor(&d, "xor.aif32");
        assert_eq!(
            d.dispatch(0x65, &0.5f32.to_le_bytes())[0].status,
            Status::Ok.byte()
        );

        let mut name_payload = Vec::new();
        push_str(&mut name_payload, "xor.aif32");
        let r = d.dispatch(0x54, &name_payload);
        assert_eq!(r[0].status, Status::Error.byte());

        assert_eq!(d.dispatch(0x67, &[])[0].status, Status::Ok.byte());
    }

    #[test]
    fn ai_train_is_rejected_while_fs_busy() {
        let d = Dispatcher::new();
        upload_select_xor(&d, "xor.aif32");

        let mut name_payload = Vec::new();
        push_str(&mut name_payload, "xor.aif32");
        assert_eq!(d.dispatch(0x53, &name_payload)[0].status, Status::Ok.byte());

        let mut inputs = Vec::new();
        inputs.extend_from_slice(&1.0f32.to_le_bytes());
        inputs.extend_from_slice(&0.0f32.to_le_bytes());
        inputs.extend_from_slice(&1.0f32.to_le_bytes());
        let r = d.dispatch(0x51, &inputs);
        assert_eq!(r[0].status, Status::Error.byte());

        d.fs_drain().unwrap();
    }
}
