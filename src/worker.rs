//! Worker-owned state and the deferred-command interpreter
//!
//! spec.md §9's redesign note replaces file-scope statics (the active
//! model, the upload session) with a single struct the worker side owns
//! outright — mirrored here as [`WorkerState`], bundling the model
//! manager, the industrial buffer, the graphics/sprite stub, the model
//! file store, and the in-flight upload session. Grounded in
//! `kernel/src/jarvis/mod.rs`'s role as the one place the rest of the
//! kernel reaches into for model state.
//!
//! [`process`] is what the worker thread runs for every command popped off
//! the command queue: graphics, sprites, inference, training, and model
//! query/management commands that don't need the large-payload bypass
//! upload and filesystem commands use (see `dispatcher.rs`).

use crate::codec::Crc32;
use crate::config::MAX_FILENAME;
use crate::errors::{DispatcherError, Status, ToStatus};
use crate::fs::{MemStore, ModelStore};
use crate::graphics_stub::GraphicsStub;
use crate::industrial::IndustrialBuffer;
use crate::model::{ModelManager, ModelState, ModelType};

/// State of an in-progress `MODEL_UPLOAD` ... `UPLOAD_END` handshake.
pub struct UploadSession {
    pub filename: String,
    pub buffer: Vec<u8>,
    pub crc: Crc32,
}

pub struct WorkerState {
    pub model: ModelManager,
    pub industrial: IndustrialBuffer,
    pub graphics: GraphicsStub,
    pub store: Box<dyn ModelStore + Send>,
    pub upload: Option<UploadSession>,
}

impl WorkerState {
    pub fn new() -> Self {
        WorkerState {
            model: ModelManager::new(),
            industrial: IndustrialBuffer::new(),
            graphics: GraphicsStub::new(),
            store: Box::new(MemStore::new()),
            upload: None,
        }
    }
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::new()
    }
}

fn read_f32_le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn push_f32_le(out: &mut Vec<u8>, values: &[f32]) {
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn model_state_code(s: ModelState) -> u8 {
    match s {
        ModelState::Empty => 0,
        ModelState::Loaded => 1,
        ModelState::Trainable => 2,
        ModelState::Training => 3,
    }
}

fn model_type_code(t: ModelType) -> u8 {
    match t {
        ModelType::None => 0,
        ModelType::LegacyStatic => 1,
        ModelType::DynamicV3 => 2,
    }
}

fn ai_infer(model: &mut ModelManager, payload: &[u8]) -> (Status, Vec<u8>) {
    let input_dim = model.input_dim();
    if input_dim == 0 {
        return (Status::NotFound, Vec::new());
    }
    let mut inputs = read_f32_le(payload);
    // Legacy 2-float callers zero-pad when the selected model wants more
    // inputs than they supply (spec.md §6).
    inputs.resize(input_dim, 0.0);
    inputs.truncate(input_dim);
    match model.infer(&inputs) {
        Ok(outputs) => {
            let mut data = Vec::with_capacity(outputs.len() * 4);
            push_f32_le(&mut data, &outputs);
            (Status::Ok, data)
        }
        Err(e) => (e.to_status(), Vec::new()),
    }
}

/// `AI_TRAIN` accepts a modern `(inputs ∥ targets)` payload sized to the
/// active model's dimensions. The legacy single-byte epoch-count form
/// (spec.md §9 open question) has no surviving caller in this firmware and
/// is rejected outright rather than guessed at.
fn ai_train(model: &mut ModelManager, payload: &[u8]) -> (Status, Vec<u8>) {
    let input_dim = model.input_dim();
    let output_dim = model.output_dim();
    if input_dim == 0 {
        return (Status::NotFound, Vec::new());
    }
    if payload.len() == 1 {
        crate::device_warn!("[AI_TRAIN] legacy epoch-count payload rejected");
        return (Status::Error, Vec::new());
    }
    let expected = (input_dim + output_dim) * 4;
    if payload.len() != expected {
        return (Status::Error, Vec::new());
    }
    let values = read_f32_le(payload);
    let (inputs, targets) = values.split_at(input_dim);

    if !model.is_trainable() {
        if let Err(e) = model.prepare_training(crate::config::DEFAULT_TRAIN_LR) {
            return (e.to_status(), Vec::new());
        }
    }
    match model.train_step(inputs, targets) {
        Ok(loss) => {
            let mut data = Vec::new();
            push_f32_le(&mut data, &[loss]);
            (Status::Ok, data)
        }
        Err(e) => (e.to_status(), Vec::new()),
    }
}

fn ai_status(model: &ModelManager) -> (Status, Vec<u8>) {
    let snap = model.status();
    let mut data = Vec::with_capacity(12);
    data.push(model_state_code(snap.state));
    data.push(model_type_code(snap.model_type));
    data.extend_from_slice(&snap.epochs.to_le_bytes());
    data.extend_from_slice(&snap.last_loss.to_le_bytes());
    data.extend_from_slice(&snap.input_dim.to_le_bytes());
    data.extend_from_slice(&snap.output_dim.to_le_bytes());
    (Status::Ok, data)
}

fn list_models(store: &dyn ModelStore) -> (Status, Vec<u8>) {
    let mut data = Vec::new();
    for name in store.list() {
        let bytes = name.as_bytes();
        data.push(bytes.len().min(MAX_FILENAME) as u8);
        data.extend_from_slice(&bytes[..bytes.len().min(MAX_FILENAME)]);
    }
    data.push(0);
    (Status::Ok, data)
}

fn delete_model(state: &mut WorkerState, filename: &str) -> (Status, Vec<u8>) {
    match state.store.delete(filename) {
        Ok(()) => {
            if state.model.filename() == Some(filename) {
                state.model.reset();
            }
            (Status::Ok, Vec::new())
        }
        Err(e) => (e.to_status(), Vec::new()),
    }
}

fn model_select(state: &mut WorkerState, filename: &str) -> (Status, Vec<u8>) {
    match state.store.read(filename) {
        Ok(bytes) => match state.model.load(&bytes, filename) {
            Ok(()) => (Status::Ok, Vec::new()),
            Err(e) => (e.to_status(), Vec::new()),
        },
        Err(e) => (e.to_status(), Vec::new()),
    }
}

fn model_info(model: &ModelManager) -> (Status, Vec<u8>) {
    if model.state() == ModelState::Empty {
        return (Status::NotFound, Vec::new());
    }
    (Status::Ok, model.header_snapshot().to_vec())
}

fn finetune_start(model: &mut ModelManager, payload: &[u8]) -> (Status, Vec<u8>) {
    if payload.len() != 4 {
        return (Status::Error, Vec::new());
    }
    let lr = f32::from_le_bytes(payload.try_into().unwrap());
    match model.prepare_training(lr) {
        Ok(()) => (Status::Ok, Vec::new()),
        Err(e) => (e.to_status(), Vec::new()),
    }
}

fn finetune_data(model: &mut ModelManager, payload: &[u8]) -> (Status, Vec<u8>) {
    ai_train_like(model, payload)
}

fn ai_train_like(model: &mut ModelManager, payload: &[u8]) -> (Status, Vec<u8>) {
    let input_dim = model.input_dim();
    let output_dim = model.output_dim();
    if input_dim == 0 {
        return (Status::NotFound, Vec::new());
    }
    let expected = (input_dim + output_dim) * 4;
    if payload.len() != expected {
        return (Status::Error, Vec::new());
    }
    let values = read_f32_le(payload);
    let (inputs, targets) = values.split_at(input_dim);
    match model.train_step(inputs, targets) {
        Ok(loss) => {
            let mut data = Vec::new();
            push_f32_le(&mut data, &[loss]);
            (Status::Ok, data)
        }
        Err(e) => (e.to_status(), Vec::new()),
    }
}

fn finetune_stop(model: &mut ModelManager) -> (Status, Vec<u8>) {
    model.stop_training();
    (Status::Ok, Vec::new())
}

fn graphics(state: &mut WorkerState, cmd: u8, payload: &[u8]) -> (Status, Vec<u8>) {
    match cmd {
        0x10 => {
            if payload.is_empty() {
                return (Status::Error, Vec::new());
            }
            state.graphics.clear(payload[0]);
            (Status::Ok, Vec::new())
        }
        0x11 => {
            if payload.len() < 3 {
                return (Status::Error, Vec::new());
            }
            state.graphics.pixel(payload[0], payload[1], payload[2]);
            (Status::Ok, Vec::new())
        }
        0x12 => {
            if payload.len() < 5 {
                return (Status::Error, Vec::new());
            }
            state
                .graphics
                .rect(payload[0], payload[1], payload[2], payload[3], payload[4]);
            (Status::Ok, Vec::new())
        }
        0x21 => {
            if payload.len() < 3 {
                return (Status::Error, Vec::new());
            }
            state.graphics.text(payload[0], payload[1], payload[2], &payload[3..]);
            (Status::Ok, Vec::new())
        }
        0x2F => {
            state.graphics.flush();
            (Status::Ok, Vec::new())
        }
        _ => (DispatcherError::UnknownCommand.to_status(), Vec::new()),
    }
}

fn sprites(state: &mut WorkerState, cmd: u8, payload: &[u8]) -> (Status, Vec<u8>) {
    match cmd {
        0x30 => {
            if payload.len() < 9 {
                return (Status::Error, Vec::new());
            }
            let slot = payload[0] as usize;
            let x = u32::from_le_bytes(payload[1..5].try_into().unwrap());
            let y = u32::from_le_bytes(payload[5..9].try_into().unwrap());
            let collided = state.graphics.sprite_set(slot, x, y);
            (Status::Ok, vec![collided as u8])
        }
        0x31 => {
            if payload.is_empty() {
                return (Status::Error, Vec::new());
            }
            state.graphics.sprite_clear(payload[0] as usize);
            (Status::Ok, Vec::new())
        }
        _ => (DispatcherError::UnknownCommand.to_status(), Vec::new()),
    }
}

/// Interpret one deferred command against worker-owned state, returning the
/// status and response payload the dispatcher frames back to the host.
pub fn process(state: &mut WorkerState, cmd: u8, payload: &[u8]) -> (Status, Vec<u8>) {
    match cmd {
        0x10..=0x2F => graphics(state, cmd, payload),
        0x30..=0x36 => sprites(state, cmd, payload),
        0x50 => ai_infer(&mut state.model, payload),
        0x51 => ai_train(&mut state.model, payload),
        0x52 => ai_status(&state.model),
        0x55 | 0x61 => list_models(state.store.as_ref()),
        0x56 | 0x64 => {
            let name = String::from_utf8_lossy(payload).into_owned();
            delete_model(state, &name)
        }
        0x60 => model_info(&state.model),
        0x62 => {
            let name = String::from_utf8_lossy(payload).into_owned();
            model_select(state, &name)
        }
        0x65 => finetune_start(&mut state.model, payload),
        0x66 => finetune_data(&mut state.model, payload),
        0x67 => finetune_stop(&mut state.model),
        _ => (DispatcherError::UnknownCommand.to_status(), Vec::new()),
    }
}
