//! Forward pass (spec.md §4.4.2)
//!
//! Grounded in `kernel/src/jarvis/inference.rs`'s forward-pass driver shape
//! (walk the layer list, apply each layer's math in place) generalized
//! from the teacher's fixed transformer block sequence to the dynamic
//! tagged-variant graph.

use super::layer::{LayerKind, RuntimeGraph, Shape};
use crate::arena::Arena;
use crate::config::MAX_OUTPUTS;
use crate::errors::ModelError;

fn relu(x: &[f32]) -> Vec<f32> {
    x.iter().map(|&v| v.max(0.0)).collect()
}

fn sigmoid(x: &[f32]) -> Vec<f32> {
    x.iter().map(|&v| 1.0 / (1.0 + (-v).exp())).collect()
}

fn softmax(x: &[f32]) -> Vec<f32> {
    let max = x.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = x.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|&v| v / sum).collect()
}

fn dense_forward(x: &[f32], weights: &[f32], bias: &[f32], in_dim: usize, out_dim: usize) -> Vec<f32> {
    let mut y = vec![0.0f32; out_dim];
    for o in 0..out_dim {
        let mut acc = bias[o];
        let row = &weights[o * in_dim..(o + 1) * in_dim];
        for i in 0..in_dim {
            acc += x[i] * row[i];
        }
        y[o] = acc;
    }
    y
}

fn conv2d_forward(
    x: &[f32],
    weights: &[f32],
    bias: &[f32],
    in_c: usize,
    h: usize,
    w: usize,
    filters: usize,
    kh: usize,
    kw: usize,
    sh: usize,
    sw: usize,
    pad: usize,
    out_h: usize,
    out_w: usize,
) -> Vec<f32> {
    let mut y = vec![0.0f32; filters * out_h * out_w];
    for f in 0..filters {
        for oy in 0..out_h {
            for ox in 0..out_w {
                let mut acc = bias[f];
                for ic in 0..in_c {
                    for ky in 0..kh {
                        let iy = oy * sh + ky;
                        if iy < pad || iy - pad >= h {
                            continue;
                        }
                        let iy = iy - pad;
                        for kx in 0..kw {
                            let ix = ox * sw + kx;
                            if ix < pad || ix - pad >= w {
                                continue;
                            }
                            let ix = ix - pad;
                            let xv = x[ic * h * w + iy * w + ix];
                            let wv = weights[((f * in_c + ic) * kh + ky) * kw + kx];
                            acc += xv * wv;
                        }
                    }
                }
                y[f * out_h * out_w + oy * out_w + ox] = acc;
            }
        }
    }
    y
}

fn maxpool_forward(
    x: &[f32],
    c: usize,
    h: usize,
    w: usize,
    kh: usize,
    kw: usize,
    sh: usize,
    sw: usize,
    pad: usize,
    out_h: usize,
    out_w: usize,
) -> Vec<f32> {
    let mut y = vec![0.0f32; c * out_h * out_w];
    for ch in 0..c {
        for oy in 0..out_h {
            for ox in 0..out_w {
                let mut best: Option<f32> = None;
                for ky in 0..kh {
                    let iy = oy * sh + ky;
                    if iy < pad || iy - pad >= h {
                        continue;
                    }
                    let iy = iy - pad;
                    for kx in 0..kw {
                        let ix = ox * sw + kx;
                        if ix < pad || ix - pad >= w {
                            continue;
                        }
                        let ix = ix - pad;
                        let v = x[ch * h * w + iy * w + ix];
                        best = Some(best.map_or(v, |b| b.max(v)));
                    }
                }
                y[ch * out_h * out_w + oy * out_w + ox] = best.unwrap_or(0.0);
            }
        }
    }
    y
}

/// Apply a single layer's forward equation to `x`, returning the layer's
/// output. `arena` supplies the (already loaded) weight/bias values.
pub fn forward_layer(kind: &LayerKind, input_shape: Shape, x: &[f32], arena: &Arena) -> Result<Vec<f32>, ModelError> {
    match kind {
        LayerKind::Input => Ok(x.to_vec()),
        LayerKind::Dense {
            weights,
            bias,
            in_dim,
            out_dim,
        } => {
            if x.len() != *in_dim {
                return Err(ModelError::ShapeMismatch);
            }
            let w = arena.read_f32(weights.clone());
            let b = arena.read_f32(bias.clone());
            Ok(dense_forward(x, &w, &b, *in_dim, *out_dim))
        }
        LayerKind::Relu => Ok(relu(x)),
        LayerKind::Sigmoid => Ok(sigmoid(x)),
        LayerKind::Softmax => Ok(softmax(x)),
        LayerKind::Conv2d {
            weights,
            bias,
            filters,
            in_channels,
            kh,
            kw,
            sh,
            sw,
            pad,
        } => {
            let (in_c, h, w) = input_shape.as_d3().ok_or(ModelError::ShapeMismatch)?;
            if in_c != *in_channels {
                return Err(ModelError::ShapeMismatch);
            }
            let out_h = (h + 2 * pad).saturating_sub(*kh) / sh + 1;
            let out_w = (w + 2 * pad).saturating_sub(*kw) / sw + 1;
            let wv = arena.read_f32(weights.clone());
            let bv = arena.read_f32(bias.clone());
            Ok(conv2d_forward(
                x, &wv, &bv, in_c, h, w, *filters, *kh, *kw, *sh, *sw, *pad, out_h, out_w,
            ))
        }
        LayerKind::MaxPool { kh, kw, sh, sw, pad } => {
            let (c, h, w) = input_shape.as_d3().ok_or(ModelError::ShapeMismatch)?;
            let out_h = (h + 2 * pad).saturating_sub(*kh) / sh + 1;
            let out_w = (w + 2 * pad).saturating_sub(*kw) / sw + 1;
            Ok(maxpool_forward(x, c, h, w, *kh, *kw, *sh, *sw, *pad, out_h, out_w))
        }
        LayerKind::Flatten => Ok(x.to_vec()),
    }
}

/// Run the full forward pass. A single intermediate-activation buffer sized
/// to the largest layer's output is bump-allocated from `arena` and marked
/// for rewind per spec.md §4.4.2: every layer's activation is written into
/// and read back from that buffer in place of a loose heap vector, so the
/// memory that actually carries state across the loop lives in the arena —
/// only the per-layer working copy `forward_layer` computes into (mirroring
/// how it already reads weight/bias views out of the arena) is transient.
pub fn infer(graph: &RuntimeGraph, arena: &mut Arena, inputs: &[f32]) -> Result<Vec<f32>, ModelError> {
    if inputs.len() != graph.input_dim() {
        return Err(ModelError::ShapeMismatch);
    }
    let mark = arena.mark();
    let max_elems = graph.max_activation_elems().max(inputs.len()).max(1);
    let scratch = arena.alloc(max_elems * 4)?;

    arena.write_f32(scratch.start..scratch.start + inputs.len() * 4, inputs);
    let mut current_len = inputs.len();

    for layer in &graph.layers {
        let current = arena.read_f32(scratch.start..scratch.start + current_len * 4);
        let output = forward_layer(&layer.kind, layer.input_shape, &current, arena)?;
        arena.write_f32(scratch.start..scratch.start + output.len() * 4, &output);
        current_len = output.len();
    }

    let result = arena.read_f32(scratch.start..scratch.start + current_len * 4);
    arena.reset_to(mark);

    if result.len() > MAX_OUTPUTS {
        return Err(ModelError::ShapeMismatch);
    }
    Ok(result)
}

/// Forward pass that additionally caches every layer's output, needed by
/// [`super::train::train_step`] for backprop.
pub fn infer_with_activations(
    graph: &RuntimeGraph,
    arena: &Arena,
    inputs: &[f32],
) -> Result<Vec<Vec<f32>>, ModelError> {
    if inputs.len() != graph.input_dim() {
        return Err(ModelError::ShapeMismatch);
    }
    let mut activations = Vec::with_capacity(graph.layers.len() + 1);
    activations.push(inputs.to_vec());
    let mut current = inputs.to_vec();
    for layer in &graph.layers {
        current = forward_layer(&layer.kind, layer.input_shape, &current, arena)?;
        activations.push(current.clone());
    }
    Ok(activations)
}
