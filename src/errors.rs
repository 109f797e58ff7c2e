//! Error taxonomy (spec.md §7)
//!
//! Plain enums with hand-written `Display`/`Error` impls, generalizing the
//! teacher's `Result<T, &'static str>` returns (`jarvis::save_weights`,
//! `jarvis::load_weights`) into the five categories spec.md names. No
//! `thiserror`/`anyhow` — the teacher pulls in neither.

use std::fmt;

/// Wire status byte a response frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0x00,
    Error = 0x01,
    NotFound = 0x02,
}

impl Status {
    pub fn byte(self) -> u8 {
        self as u8
    }
}

/// Implemented by every error enum so the dispatcher can turn any failure
/// into a response status per spec.md §7's propagation policy.
pub trait ToStatus {
    fn to_status(&self) -> Status;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    Crc,
    MalformedFraming,
    Timeout,
    PayloadTooLarge,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Crc => write!(f, "CRC mismatch"),
            ProtocolError::MalformedFraming => write!(f, "malformed framing"),
            ProtocolError::Timeout => write!(f, "mid-frame timeout"),
            ProtocolError::PayloadTooLarge => write!(f, "payload too large for LEN"),
        }
    }
}
impl std::error::Error for ProtocolError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherError {
    UnknownCommand,
    QueueFull,
    FsBusy,
    UploadBusy,
    TrainingBusy,
    BatchTooDeep,
}

impl fmt::Display for DispatcherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatcherError::UnknownCommand => write!(f, "unknown command"),
            DispatcherError::QueueFull => write!(f, "command queue full"),
            DispatcherError::FsBusy => write!(f, "filesystem busy"),
            DispatcherError::UploadBusy => write!(f, "upload session active"),
            DispatcherError::TrainingBusy => write!(f, "training in progress"),
            DispatcherError::BatchTooDeep => write!(f, "batch recursion too deep"),
        }
    }
}
impl std::error::Error for DispatcherError {}
impl ToStatus for DispatcherError {
    fn to_status(&self) -> Status {
        Status::Error
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelError {
    BadMagic,
    UnsupportedVersion,
    Truncated,
    WeightsCrcMismatch,
    UnknownLayerType,
    ArenaOverflow,
    ShapeMismatch,
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::BadMagic => write!(f, "bad model magic"),
            ModelError::UnsupportedVersion => write!(f, "unsupported model version"),
            ModelError::Truncated => write!(f, "model file truncated"),
            ModelError::WeightsCrcMismatch => write!(f, "weights CRC32 mismatch"),
            ModelError::UnknownLayerType => write!(f, "unknown layer type"),
            ModelError::ArenaOverflow => write!(f, "arena exhausted"),
            ModelError::ShapeMismatch => write!(f, "layer shape mismatch"),
        }
    }
}
impl std::error::Error for ModelError {}
impl ToStatus for ModelError {
    fn to_status(&self) -> Status {
        Status::Error
    }
}

impl From<crate::arena::ArenaOverflow> for ModelError {
    fn from(_: crate::arena::ArenaOverflow) -> Self {
        ModelError::ArenaOverflow
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingError {
    NoModel,
    OptimizerNotPrepared,
    UnsupportedLayer,
    BadInputShape,
    BadTargetShape,
}

impl fmt::Display for TrainingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingError::NoModel => write!(f, "no model loaded"),
            TrainingError::OptimizerNotPrepared => write!(f, "optimizer not prepared"),
            TrainingError::UnsupportedLayer => write!(f, "unsupported layer in backprop"),
            TrainingError::BadInputShape => write!(f, "input shape mismatch"),
            TrainingError::BadTargetShape => write!(f, "target shape mismatch"),
        }
    }
}
impl std::error::Error for TrainingError {}
impl ToStatus for TrainingError {
    fn to_status(&self) -> Status {
        match self {
            TrainingError::NoModel => Status::NotFound,
            _ => Status::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoError {
    Open,
    Read,
    Write,
    Delete,
    NotFound,
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::Open => write!(f, "open failed"),
            IoError::Read => write!(f, "read failed"),
            IoError::Write => write!(f, "write failed"),
            IoError::Delete => write!(f, "delete failed"),
            IoError::NotFound => write!(f, "not found"),
        }
    }
}
impl std::error::Error for IoError {}
impl ToStatus for IoError {
    fn to_status(&self) -> Status {
        match self {
            IoError::NotFound => Status::NotFound,
            _ => Status::Error,
        }
    }
}

/// Umbrella error the dispatcher deals in, so a single `match` at the
/// response-writing boundary can turn any of the taxonomies into a status
/// byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    Dispatcher(DispatcherError),
    Model(ModelError),
    Training(TrainingError),
    Io(IoError),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Dispatcher(e) => write!(f, "{e}"),
            CoreError::Model(e) => write!(f, "{e}"),
            CoreError::Training(e) => write!(f, "{e}"),
            CoreError::Io(e) => write!(f, "{e}"),
        }
    }
}
impl std::error::Error for CoreError {}

impl ToStatus for CoreError {
    fn to_status(&self) -> Status {
        match self {
            CoreError::Dispatcher(e) => e.to_status(),
            CoreError::Model(e) => e.to_status(),
            CoreError::Training(e) => e.to_status(),
            CoreError::Io(e) => e.to_status(),
        }
    }
}

impl From<DispatcherError> for CoreError {
    fn from(e: DispatcherError) -> Self {
        CoreError::Dispatcher(e)
    }
}
impl From<ModelError> for CoreError {
    fn from(e: ModelError) -> Self {
        CoreError::Model(e)
    }
}
impl From<TrainingError> for CoreError {
    fn from(e: TrainingError) -> Self {
        CoreError::Training(e)
    }
}
impl From<IoError> for CoreError {
    fn from(e: IoError) -> Self {
        CoreError::Io(e)
    }
}
