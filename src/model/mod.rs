//! C4 — Dynamic Model: interpreter + trainer
//!
//! Ties together loading, inference, and training behind the per-model
//! state machine spec.md §4.4.4 names: `empty -> loaded(type) -> trainable
//! -> training`. Grounded in `kernel/src/jarvis/mod.rs`'s role as the
//! single entry point wrapping model init/status/save/load for the rest of
//! the kernel.

pub mod infer;
pub mod layer;
pub mod load;
pub mod train;

use crate::arena::Arena;
use crate::config::{ARENA_SIZE, MODEL_HEADER_SIZE};
use crate::errors::{ModelError, Status, ToStatus, TrainingError};
use layer::RuntimeGraph;
use train::TrainingState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Empty,
    Loaded,
    Trainable,
    Training,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    None,
    LegacyStatic,
    DynamicV3,
}

/// Failures that can occur going through the manager rather than the
/// lower-level loader/trainer directly — adds "no model is loaded" on top
/// of [`ModelError`]/[`TrainingError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerError {
    NoModel,
    Model(ModelError),
    Training(TrainingError),
}

impl From<ModelError> for ManagerError {
    fn from(e: ModelError) -> Self {
        ManagerError::Model(e)
    }
}
impl From<TrainingError> for ManagerError {
    fn from(e: TrainingError) -> Self {
        ManagerError::Training(e)
    }
}
impl ToStatus for ManagerError {
    fn to_status(&self) -> Status {
        match self {
            ManagerError::NoModel => Status::NotFound,
            ManagerError::Model(_) => Status::Error,
            ManagerError::Training(e) => e.to_status(),
        }
    }
}

/// Snapshot returned for `AI_STATUS` (spec.md §6).
pub struct AiStatus {
    pub state: ModelState,
    pub model_type: ModelType,
    pub epochs: u16,
    pub last_loss: f32,
    pub input_dim: u16,
    pub output_dim: u16,
}

/// The single active model plus the arena backing it. Holds exactly the
/// fields spec.md §3's "Model manager state" names.
pub struct ModelManager {
    arena: Arena,
    state: ModelState,
    model_type: ModelType,
    graph: Option<RuntimeGraph>,
    filename: Option<String>,
    header_bytes: [u8; MODEL_HEADER_SIZE],
    /// The complete `.aif32` bytes the active model was loaded from, kept so
    /// `AI_SAVE` can write back the original file rather than re-serializing
    /// the runtime graph (which only the loader's weight-slicing logic
    /// knows how to produce).
    raw_bytes: Option<Vec<u8>>,
    training: Option<TrainingState>,
    last_loss: f32,
    epoch: u32,
}

impl ModelManager {
    pub fn new() -> Self {
        ModelManager {
            arena: Arena::new(ARENA_SIZE),
            state: ModelState::Empty,
            model_type: ModelType::None,
            graph: None,
            filename: None,
            header_bytes: [0u8; MODEL_HEADER_SIZE],
            raw_bytes: None,
            training: None,
            last_loss: 0.0,
            epoch: 0,
        }
    }

    pub fn raw_bytes(&self) -> Option<&[u8]> {
        self.raw_bytes.as_deref()
    }

    pub fn arena_free(&self) -> usize {
        self.arena.free()
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn header_snapshot(&self) -> [u8; MODEL_HEADER_SIZE] {
        self.header_bytes
    }

    /// Load a `.aif32` V3 model from `bytes`, tagging it with `filename`.
    /// Failures leave the manager in `Empty` (spec.md §4.4.5).
    pub fn load(&mut self, bytes: &[u8], filename: &str) -> Result<(), ModelError> {
        match load::load(bytes, &mut self.arena) {
            Ok((_header, graph)) => {
                let mut header_bytes = [0u8; MODEL_HEADER_SIZE];
                let n = bytes.len().min(MODEL_HEADER_SIZE);
                header_bytes[..n].copy_from_slice(&bytes[..n]);
                self.header_bytes = header_bytes;
                self.graph = Some(graph);
                self.filename = Some(filename.to_string());
                self.model_type = ModelType::DynamicV3;
                self.state = ModelState::Loaded;
                self.last_loss = 0.0;
                self.epoch = 0;
                self.training = None;
                self.raw_bytes = Some(bytes.to_vec());
                crate::device_log!("[MODEL] loaded '{}' ({} layers)", filename, self.graph.as_ref().unwrap().layers.len());
                Ok(())
            }
            Err(e) => {
                self.reset();
                crate::device_warn!("[MODEL] load failed: {}", e);
                Err(e)
            }
        }
    }

    /// Return to `Empty`, freeing all arena memory for the model.
    pub fn reset(&mut self) {
        self.arena.reset();
        self.graph = None;
        self.filename = None;
        self.header_bytes = [0u8; MODEL_HEADER_SIZE];
        self.raw_bytes = None;
        self.model_type = ModelType::None;
        self.state = ModelState::Empty;
        self.training = None;
        self.last_loss = 0.0;
        self.epoch = 0;
    }

    pub fn input_dim(&self) -> usize {
        self.graph.as_ref().map(|g| g.input_dim()).unwrap_or(0)
    }

    pub fn output_dim(&self) -> usize {
        self.graph.as_ref().map(|g| g.output_dim()).unwrap_or(0)
    }

    pub fn infer(&mut self, inputs: &[f32]) -> Result<Vec<f32>, ManagerError> {
        let graph = self.graph.as_ref().ok_or(ManagerError::NoModel)?;
        Ok(infer::infer(graph, &mut self.arena, inputs)?)
    }

    /// Allocate Adam gradient/momentum/variance buffers for every
    /// parametric layer (spec.md §4.4.3). Transitions `loaded -> trainable`.
    pub fn prepare_training(&mut self, lr: f32) -> Result<(), ManagerError> {
        let graph = self.graph.as_ref().ok_or(ManagerError::NoModel)?;
        self.training = Some(TrainingState::prepare(graph, lr));
        self.state = ModelState::Trainable;
        Ok(())
    }

    /// Free the optimizer's gradient/momentum/variance buffers, bounding
    /// arena usage (DESIGN.md open-question decision: `FINETUNE_STOP`
    /// frees rather than parks optimizer state).
    pub fn stop_training(&mut self) {
        self.training = None;
        if self.state == ModelState::Trainable || self.state == ModelState::Training {
            self.state = ModelState::Loaded;
        }
    }

    pub fn is_trainable(&self) -> bool {
        self.training.is_some()
    }

    /// One forward + backward + Adam-update step (spec.md §4.4.3). The
    /// state machine's `trainable -> training -> trainable` transition is
    /// atomic: this call runs to completion before returning either state.
    pub fn train_step(&mut self, inputs: &[f32], targets: &[f32]) -> Result<f32, ManagerError> {
        let graph = self.graph.as_ref().ok_or(ManagerError::NoModel)?;
        let training = self.training.as_mut().ok_or(ManagerError::Training(TrainingError::OptimizerNotPrepared))?;
        self.state = ModelState::Training;
        let result = train::train_step(graph, &mut self.arena, training, inputs, targets);
        self.state = ModelState::Trainable;
        match result {
            Ok(loss) => {
                self.last_loss = loss;
                self.epoch += 1;
                Ok(loss)
            }
            Err(e) => Err(ManagerError::Training(e)),
        }
    }

    pub fn status(&self) -> AiStatus {
        AiStatus {
            state: self.state,
            model_type: self.model_type,
            epochs: self.epoch.min(u16::MAX as u32) as u16,
            last_loss: self.last_loss,
            input_dim: self.input_dim().min(u16::MAX as usize) as u16,
            output_dim: self.output_dim().min(u16::MAX as usize) as u16,
        }
    }
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_model_infer_is_no_model_error() {
        let mut mgr = ModelManager::new();
        assert_eq!(mgr.state(), ModelState::Empty);
        assert_eq!(mgr.infer(&[0.0, 0.0]), Err(ManagerError::NoModel));
    }

    #[test]
    fn load_infer_train_state_machine() {
        let bytes = load::test_fixtures::xor_model_bytes();
        let mut mgr = ModelManager::new();
        mgr.load(&bytes, "xor.aif32").unwrap();
        assert_eq!(mgr.state(), ModelState::Loaded);
        assert_eq!(mgr.filename(), Some("xor.aif32"));

        let out = mgr.infer(&[1.0, 0.0]).unwrap();
        assert_eq!(out.len(), 1);

        mgr.prepare_training(0.5).unwrap();
        assert_eq!(mgr.state(), ModelState::Trainable);

        let loss = mgr.train_step(&[0.0, 1.0], &[1.0]).unwrap();
        assert!(loss.is_finite());
        assert_eq!(mgr.state(), ModelState::Trainable);
        assert_eq!(mgr.status().epochs, 1);

        mgr.stop_training();
        assert!(!mgr.is_trainable());
        assert_eq!(mgr.state(), ModelState::Loaded);
    }

    #[test]
    fn bad_model_bytes_leave_manager_empty() {
        let mut mgr = ModelManager::new();
        let bad = vec![0u8; 10];
        assert!(mgr.load(&bad, "bad.aif32").is_err());
        assert_eq!(mgr.state(), ModelState::Empty);
        assert_eq!(mgr.filename(), None);
    }
}
