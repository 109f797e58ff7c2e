//! `.aif32` V3 loading (spec.md §4.4.1)
//!
//! Header (32 bytes):
//!   magic:u32 LE @0      version:u8 @4        layer_count:u16 LE @5
//!   total_weights_size:u32 LE @7               weights_crc32:u32 LE @11
//!   name:[u8;16] @15                           reserved:u8 @31
//!
//! Layer descriptor (16 bytes):
//!   type:u8 @0  flags:u8 @1  param1..param6:u16 LE @2,4,6,8,10,12  reserved:u16 @14
//!
//! `flags` bit 0 on an Input layer selects the 3-D form (`[C,H,W]`) over
//! the 1-D form (`[size]`) — spec.md's parameter table names both forms
//! but leaves the discriminant to the implementation.

use super::layer::{LayerKind, LayerRecord, RuntimeGraph, Shape};
use crate::arena::Arena;
use crate::codec::crc32;
use crate::config::{LAYER_DESCRIPTOR_SIZE, MODEL_HEADER_SIZE, MODEL_MAGIC, MODEL_NAME_SIZE, MODEL_VERSION};
use crate::errors::ModelError;

pub struct ModelHeader {
    pub version: u8,
    pub layer_count: u16,
    pub total_weights_size: u32,
    pub weights_crc32: u32,
    pub name: [u8; MODEL_NAME_SIZE],
}

impl ModelHeader {
    pub fn name_str(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }
}

struct Descriptor {
    type_code: u8,
    flags: u8,
    params: [u16; 6],
}

fn parse_header(bytes: &[u8]) -> Result<ModelHeader, ModelError> {
    if bytes.len() < MODEL_HEADER_SIZE {
        return Err(ModelError::Truncated);
    }
    let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    if magic != MODEL_MAGIC {
        return Err(ModelError::BadMagic);
    }
    let version = bytes[4];
    if version != MODEL_VERSION {
        return Err(ModelError::UnsupportedVersion);
    }
    let layer_count = u16::from_le_bytes(bytes[5..7].try_into().unwrap());
    let total_weights_size = u32::from_le_bytes(bytes[7..11].try_into().unwrap());
    let weights_crc32 = u32::from_le_bytes(bytes[11..15].try_into().unwrap());
    let mut name = [0u8; MODEL_NAME_SIZE];
    name.copy_from_slice(&bytes[15..15 + MODEL_NAME_SIZE]);
    Ok(ModelHeader {
        version,
        layer_count,
        total_weights_size,
        weights_crc32,
        name,
    })
}

fn parse_descriptor(bytes: &[u8]) -> Descriptor {
    let mut params = [0u16; 6];
    for i in 0..6 {
        let off = 2 + i * 2;
        params[i] = u16::from_le_bytes([bytes[off], bytes[off + 1]]);
    }
    Descriptor {
        type_code: bytes[0],
        flags: bytes[1],
        params,
    }
}

/// Parse and build a runtime graph from a complete `.aif32` V3 file,
/// copying the weight blob into `arena` and resetting `arena` first (the
/// caller must not retain the input buffer, per spec.md §4.4.1).
pub fn load(bytes: &[u8], arena: &mut Arena) -> Result<(ModelHeader, RuntimeGraph), ModelError> {
    let header = parse_header(bytes)?;
    let layer_count = header.layer_count as usize;
    let descriptors_end = MODEL_HEADER_SIZE + layer_count * LAYER_DESCRIPTOR_SIZE;
    let total_needed = descriptors_end + header.total_weights_size as usize;
    if total_needed > bytes.len() {
        return Err(ModelError::Truncated);
    }

    let weights_blob_bytes = &bytes[descriptors_end..descriptors_end + header.total_weights_size as usize];
    if crc32(weights_blob_bytes) != header.weights_crc32 {
        return Err(ModelError::WeightsCrcMismatch);
    }

    arena.reset();
    let weights_blob = arena.alloc_copy(weights_blob_bytes)?;

    let mut layers = Vec::with_capacity(layer_count);
    let mut cursor_shape: Option<Shape> = None;
    let mut weight_cursor: usize = 0; // f32 elements consumed from the blob

    for i in 0..layer_count {
        let off = MODEL_HEADER_SIZE + i * LAYER_DESCRIPTOR_SIZE;
        let desc = parse_descriptor(&bytes[off..off + LAYER_DESCRIPTOR_SIZE]);
        let prev_shape = cursor_shape;
        let (kind, out_shape) = build_layer(&desc, prev_shape, &mut weight_cursor, header.total_weights_size as usize / 4, &weights_blob, arena)?;
        let in_shape = prev_shape.unwrap_or(out_shape);
        layers.push(LayerRecord {
            kind,
            input_shape: in_shape,
            output_shape: out_shape,
        });
        cursor_shape = Some(out_shape);
    }

    Ok((
        header,
        RuntimeGraph {
            layers,
            weights_blob,
        },
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_layer(
    desc: &Descriptor,
    prev_shape: Option<Shape>,
    weight_cursor: &mut usize,
    total_weight_elems: usize,
    weights_blob: &core::ops::Range<usize>,
    _arena: &Arena,
) -> Result<(LayerKind, Shape), ModelError> {
    let p = desc.params;
    let take = |cursor: &mut usize, n: usize| -> Result<core::ops::Range<usize>, ModelError> {
        let start = *cursor;
        let end = start
            .checked_add(n)
            .filter(|&e| e <= total_weight_elems)
            .ok_or(ModelError::Truncated)?;
        *cursor = end;
        let byte_start = weights_blob.start + start * 4;
        let byte_end = weights_blob.start + end * 4;
        Ok(byte_start..byte_end)
    };

    match desc.type_code {
        1 => {
            // Input
            let is_3d = desc.flags & 0x01 != 0;
            let shape = if is_3d {
                Shape::D3 {
                    c: p[2] as usize,
                    h: p[0] as usize,
                    w: p[1] as usize,
                }
            } else {
                Shape::D1(p[0] as usize)
            };
            Ok((LayerKind::Input, shape))
        }
        2 => {
            // Dense
            let prev = prev_shape.ok_or(ModelError::ShapeMismatch)?;
            let in_dim = prev.numel();
            let out_dim = p[0] as usize;
            let weights = take(weight_cursor, in_dim * out_dim)?;
            let bias = take(weight_cursor, out_dim)?;
            Ok((
                LayerKind::Dense {
                    weights,
                    bias,
                    in_dim,
                    out_dim,
                },
                Shape::D1(out_dim),
            ))
        }
        3 => Ok((LayerKind::Relu, prev_shape.ok_or(ModelError::ShapeMismatch)?)),
        4 => Ok((LayerKind::Sigmoid, prev_shape.ok_or(ModelError::ShapeMismatch)?)),
        5 => Ok((LayerKind::Softmax, prev_shape.ok_or(ModelError::ShapeMismatch)?)),
        6 => {
            // Conv2D, channels-first
            let (in_c, h, w) = prev_shape
                .and_then(|s| s.as_d3())
                .ok_or(ModelError::ShapeMismatch)?;
            let filters = p[0] as usize;
            let kh = p[1] as usize;
            let kw = p[2] as usize;
            let sh = p[3] as usize;
            let sw = p[4] as usize;
            let pad = p[5] as usize;
            let weights = take(weight_cursor, filters * in_c * kh * kw)?;
            let bias = take(weight_cursor, filters)?;
            let out_h = (h + 2 * pad).saturating_sub(kh) / sh + 1;
            let out_w = (w + 2 * pad).saturating_sub(kw) / sw + 1;
            Ok((
                LayerKind::Conv2d {
                    weights,
                    bias,
                    filters,
                    in_channels: in_c,
                    kh,
                    kw,
                    sh,
                    sw,
                    pad,
                },
                Shape::D3 {
                    c: filters,
                    h: out_h,
                    w: out_w,
                },
            ))
        }
        7 => {
            // Flatten
            let prev = prev_shape.ok_or(ModelError::ShapeMismatch)?;
            Ok((LayerKind::Flatten, Shape::D1(prev.numel())))
        }
        8 => {
            // MaxPool
            let (c, h, w) = prev_shape
                .and_then(|s| s.as_d3())
                .ok_or(ModelError::ShapeMismatch)?;
            let kh = p[1] as usize;
            let kw = p[2] as usize;
            let sh = p[3] as usize;
            let sw = p[4] as usize;
            let pad = p[5] as usize;
            let out_h = (h + 2 * pad).saturating_sub(kh) / sh + 1;
            let out_w = (w + 2 * pad).saturating_sub(kw) / sw + 1;
            Ok((
                LayerKind::MaxPool { kh, kw, sh, sw, pad },
                Shape::D3 {
                    c,
                    h: out_h,
                    w: out_w,
                },
            ))
        }
        _ => Err(ModelError::UnknownLayerType),
    }
}

/// Shared fixtures other modules' tests also need (inference, training),
/// plus the crate's integration tests — left compiled in (not `cfg(test)`)
/// so `tests/end_to_end.rs` can reach it as an external crate.
pub mod test_fixtures {
    use super::*;

    fn push_u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Build a tiny 2-2-1 Dense/Sigmoid network (the XOR shape) as raw
    /// `.aif32` V3 bytes.
    pub fn xor_model_bytes() -> Vec<u8> {
        let mut weights = Vec::new();
        // layer 0: Input [2] (no weights)
        // layer 1: Dense(2 -> 2): 4 weights + 2 bias
        let dense1_w = [0.5f32, -0.5, 0.5, -0.5];
        let dense1_b = [0.1f32, -0.1];
        // layer 2: Sigmoid (no weights)
        // layer 3: Dense(2 -> 1): 2 weights + 1 bias
        let dense2_w = [1.0f32, 1.0];
        let dense2_b = [0.0f32];
        // layer 4: Sigmoid (no weights)
        for v in dense1_w.iter().chain(dense1_b.iter()) {
            weights.extend_from_slice(&v.to_le_bytes());
        }
        for v in dense2_w.iter().chain(dense2_b.iter()) {
            weights.extend_from_slice(&v.to_le_bytes());
        }

        let layer_count: u16 = 5;
        let mut body = Vec::new();
        // Input
        body.push(1);
        body.push(0);
        push_u16(&mut body, 2); // size
        for _ in 0..6 {
            push_u16(&mut body, 0); // param2..param6 + reserved
        }
        // Dense(2)
        body.push(2);
        body.push(0);
        push_u16(&mut body, 2);
        for _ in 0..6 {
            push_u16(&mut body, 0);
        }
        // Sigmoid
        body.push(4);
        body.push(0);
        for _ in 0..7 {
            push_u16(&mut body, 0);
        }
        // Dense(1)
        body.push(2);
        body.push(0);
        push_u16(&mut body, 1);
        for _ in 0..6 {
            push_u16(&mut body, 0);
        }
        // Sigmoid
        body.push(4);
        body.push(0);
        for _ in 0..7 {
            push_u16(&mut body, 0);
        }
        assert_eq!(body.len(), layer_count as usize * LAYER_DESCRIPTOR_SIZE);

        let mut file = Vec::new();
        file.extend_from_slice(&MODEL_MAGIC.to_le_bytes());
        file.push(MODEL_VERSION);
        push_u16(&mut file, layer_count);
        file.extend_from_slice(&(weights.len() as u32).to_le_bytes());
        file.extend_from_slice(&crc32(&weights).to_le_bytes());
        let mut name = [0u8; 16];
        name[..3].copy_from_slice(b"xor");
        file.extend_from_slice(&name);
        file.push(0); // reserved
        assert_eq!(file.len(), MODEL_HEADER_SIZE);
        file.extend_from_slice(&body);
        file.extend_from_slice(&weights);
        file
    }
}

#[cfg(test)]
mod tests {
    use super::test_fixtures::xor_model_bytes;
    use super::*;
    use crate::config::ARENA_SIZE;

    #[test]
    fn loads_valid_model_and_builds_shapes() {
        let bytes = xor_model_bytes();
        let mut arena = Arena::new(ARENA_SIZE);
        let (header, graph) = load(&bytes, &mut arena).unwrap();
        assert_eq!(header.name_str(), "xor");
        assert_eq!(graph.input_dim(), 2);
        assert_eq!(graph.output_dim(), 1);
        assert_eq!(graph.layers.len(), 5);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = xor_model_bytes();
        bytes[0] ^= 0xFF;
        let mut arena = Arena::new(ARENA_SIZE);
        assert!(matches!(load(&bytes, &mut arena), Err(ModelError::BadMagic)));
    }

    #[test]
    fn truncated_weights_is_rejected() {
        let mut bytes = xor_model_bytes();
        bytes.truncate(bytes.len() - 4);
        let mut arena = Arena::new(ARENA_SIZE);
        assert!(matches!(load(&bytes, &mut arena), Err(ModelError::Truncated)));
    }

    #[test]
    fn weights_crc_mismatch_is_rejected() {
        let mut bytes = xor_model_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let mut arena = Arena::new(ARENA_SIZE);
        assert!(matches!(
            load(&bytes, &mut arena),
            Err(ModelError::WeightsCrcMismatch)
        ));
    }
}
