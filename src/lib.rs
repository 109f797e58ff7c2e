//! Sprite One coprocessor firmware core: framed serial protocol, dynamic
//! neural-network interpreter/trainer, and industrial signal primitives.

pub mod arena;
pub mod codec;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod errors;
pub mod fs;
pub mod graphics_stub;
pub mod industrial;
pub mod log;
pub mod model;
pub mod queue;
pub mod worker;
