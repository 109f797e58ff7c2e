//! Compile-time constants
//!
//! Kept next to the crate root rather than in a settings file, the way the
//! teacher keeps `VOCAB_SIZE`/`D_MODEL`/`N_LAYERS` beside `jarvis::model`
//! instead of externalizing them — there is no on-device settings format
//! in scope for this firmware.

/// Sync byte that begins every frame.
pub const SYNC: u8 = 0xAA;

/// Maximum payload length a single frame can carry (`LEN` is a `u8`).
pub const MAX_PAYLOAD: usize = 255;

/// Codec mid-frame inactivity timeout.
pub const FRAME_TIMEOUT_MS: u64 = 500;

/// CRC32 parameters (reversed polynomial, standard "CRC-32/ISO-HDLC").
pub const CRC32_POLY: u32 = 0xEDB8_8320;
pub const CRC32_INIT: u32 = 0xFFFF_FFFF;
pub const CRC32_XOROUT: u32 = 0xFFFF_FFFF;

/// Command-queue and response-queue ring capacity.
pub const QUEUE_CAPACITY: usize = 16;

/// Max payload a single queue entry can carry; larger commands
/// (`MODEL_UPLOAD`/chunks) execute synchronously on the I/O side instead.
pub const QUEUE_ENTRY_PAYLOAD: usize = 64;

/// Arena size backing the model graph, weights, scratch, and training state.
pub const ARENA_SIZE: usize = 80 * 1024;

/// Arena allocations are 4-byte aligned.
pub const ARENA_ALIGN: usize = 4;

/// Model file magic, `"SPRT"` read little-endian.
pub const MODEL_MAGIC: u32 = 0x5452_5053;

/// Supported `.aif32` version.
pub const MODEL_VERSION: u8 = 3;

/// Bytes in a model header.
pub const MODEL_HEADER_SIZE: usize = 32;

/// Bytes in one layer descriptor.
pub const LAYER_DESCRIPTOR_SIZE: usize = 16;

/// Max characters in a model's embedded name field.
pub const MODEL_NAME_SIZE: usize = 16;

/// Max outputs a single inference call can return.
pub const MAX_OUTPUTS: usize = 128;

/// Adam optimizer defaults (spec.md §4.4.3).
pub const ADAM_BETA1: f32 = 0.9;
pub const ADAM_BETA2: f32 = 0.999;
pub const ADAM_EPS: f32 = 1e-7;

/// Learning rate `AI_TRAIN` prepares the optimizer with when no finetune
/// session has already done so.
pub const DEFAULT_TRAIN_LR: f32 = 0.1;

/// Industrial circular buffer depth.
pub const INDUSTRIAL_CAPACITY: usize = 60;

/// Max filename length for uploads / model store entries.
pub const MAX_FILENAME: usize = 31;

/// Batch command recursion depth limit (spec.md §4.5).
pub const BATCH_MAX_DEPTH: usize = 2;

/// Chunk size used by the background filesystem save/load task.
pub const FS_STEP_BYTES: usize = 256;
