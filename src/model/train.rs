//! One-step forward/backward/update training (spec.md §4.4.3)
//!
//! Grounded in `kernel/src/jarvis/{training,backprop,optimizer}.rs`: the
//! teacher keeps per-layer gradient buffers shaped like the weights
//! (`LayerGrads` mirrors `LayerWeights`) and a single `AdamState` that
//! walks every weight slice in a fixed order (`optimizer::AdamState::step`).
//! Here the layer set is dynamic, so gradient/momentum buffers are kept
//! per graph-layer-index instead of as named struct fields, and only the
//! layer kinds spec.md §4.4.3 lists get backward support; everything else
//! surfaces `TrainingError::UnsupportedLayer`.

use super::infer::infer_with_activations;
use super::layer::{LayerKind, RuntimeGraph};
use crate::arena::Arena;
use crate::config::{ADAM_BETA1, ADAM_BETA2, ADAM_EPS};
use crate::errors::TrainingError;

/// Adam moment buffers for one parametric layer.
struct AdamBuf {
    m_w: Vec<f32>,
    v_w: Vec<f32>,
    m_b: Vec<f32>,
    v_b: Vec<f32>,
}

/// Per-model training state: allocated by `prepare_training`, consumed and
/// mutated by every `train_step`. Conceptually the arena-backed
/// gradient/momentum/variance buffers spec.md §3's "Finetune session"
/// describes — kept as a plain struct here (see `DESIGN.md` for why the
/// dispatcher-level finetune session and this struct are the same thing).
pub struct TrainingState {
    pub lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    t: u64,
    bufs: Vec<Option<AdamBuf>>,
}

impl TrainingState {
    pub fn prepare(graph: &RuntimeGraph, lr: f32) -> Self {
        let bufs = graph
            .layers
            .iter()
            .map(|l| match &l.kind {
                LayerKind::Dense {
                    in_dim, out_dim, ..
                } => Some(AdamBuf {
                    m_w: vec![0.0; in_dim * out_dim],
                    v_w: vec![0.0; in_dim * out_dim],
                    m_b: vec![0.0; *out_dim],
                    v_b: vec![0.0; *out_dim],
                }),
                _ => None,
            })
            .collect();
        TrainingState {
            lr,
            beta1: ADAM_BETA1,
            beta2: ADAM_BETA2,
            eps: ADAM_EPS,
            t: 0,
            bufs,
        }
    }

    pub fn memory_bytes(&self) -> usize {
        self.bufs
            .iter()
            .flatten()
            .map(|b| (b.m_w.len() + b.v_w.len() + b.m_b.len() + b.v_b.len()) * 4)
            .sum()
    }
}

fn relu_grad(pre_activation: &[f32], g: &[f32]) -> Vec<f32> {
    g.iter()
        .zip(pre_activation)
        .map(|(&gi, &xi)| if xi > 0.0 { gi } else { 0.0 })
        .collect()
}

fn sigmoid_grad(post_activation: &[f32], g: &[f32]) -> Vec<f32> {
    g.iter()
        .zip(post_activation)
        .map(|(&gi, &yi)| gi * yi * (1.0 - yi))
        .collect()
}

fn adam_update(w: &mut [f32], grad: &[f32], m: &mut [f32], v: &mut [f32], lr_t: f32, beta1: f32, beta2: f32, bc2: f32, eps: f32) {
    for i in 0..w.len() {
        m[i] = beta1 * m[i] + (1.0 - beta1) * grad[i];
        v[i] = beta2 * v[i] + (1.0 - beta2) * grad[i] * grad[i];
        let v_hat = v[i] / bc2;
        w[i] -= lr_t * m[i] / (v_hat.sqrt() + eps);
    }
}

/// One forward + backward + Adam-update step. Returns the scalar MSE loss
/// computed during the forward pass. Weights are left unchanged if the
/// graph contains a layer backprop doesn't support (spec.md §4.4.5).
pub fn train_step(
    graph: &RuntimeGraph,
    arena: &mut Arena,
    state: &mut TrainingState,
    inputs: &[f32],
    targets: &[f32],
) -> Result<f32, TrainingError> {
    if inputs.len() != graph.input_dim() {
        return Err(TrainingError::BadInputShape);
    }
    if targets.len() != graph.output_dim() {
        return Err(TrainingError::BadTargetShape);
    }

    // Reject unsupported layers up front so a failed step leaves weights
    // and optimizer state untouched (spec.md §4.4.5).
    for layer in &graph.layers {
        if matches!(
            layer.kind,
            LayerKind::Softmax | LayerKind::Conv2d { .. } | LayerKind::MaxPool { .. }
        ) {
            return Err(TrainingError::UnsupportedLayer);
        }
    }

    let activations = infer_with_activations(graph, arena, inputs).map_err(|_| TrainingError::BadInputShape)?;
    let y = activations.last().unwrap();
    let out_dim = y.len() as f32;
    let loss: f32 = y
        .iter()
        .zip(targets)
        .map(|(&yi, &ti)| (yi - ti) * (yi - ti))
        .sum::<f32>()
        / out_dim;

    let mut grad: Vec<f32> = y
        .iter()
        .zip(targets)
        .map(|(&yi, &ti)| 2.0 * (yi - ti) / out_dim)
        .collect();

    // Gradients are zeroed at the start of every step (fresh Vecs below);
    // collected per-layer so the optimizer can run after backprop succeeds.
    let mut pending_updates: Vec<(usize, Vec<f32>, Vec<f32>)> = Vec::new();

    for (idx, layer) in graph.layers.iter().enumerate().rev() {
        let layer_input = &activations[idx];
        let layer_output = &activations[idx + 1];
        match &layer.kind {
            LayerKind::Input => break,
            LayerKind::Relu => {
                grad = relu_grad(layer_input, &grad);
            }
            LayerKind::Sigmoid => {
                grad = sigmoid_grad(layer_output, &grad);
            }
            LayerKind::Flatten => {
                // reverse reshape is the identity on flat storage
            }
            LayerKind::Dense {
                weights,
                in_dim,
                out_dim,
                ..
            } => {
                let w = arena.read_f32(weights.clone());
                let mut grad_w = vec![0.0f32; in_dim * out_dim];
                let mut grad_b = vec![0.0f32; *out_dim];
                let mut next_grad = vec![0.0f32; *in_dim];
                for o in 0..*out_dim {
                    let go = grad[o];
                    grad_b[o] = go;
                    for i in 0..*in_dim {
                        grad_w[o * in_dim + i] = go * layer_input[i];
                        next_grad[i] += go * w[o * in_dim + i];
                    }
                }
                pending_updates.push((idx, grad_w, grad_b));
                grad = next_grad;
            }
            LayerKind::Softmax | LayerKind::Conv2d { .. } | LayerKind::MaxPool { .. } => {
                unreachable!("rejected above")
            }
        }
    }

    state.t += 1;
    let bc1 = 1.0 - state.beta1.powi(state.t as i32);
    let bc2 = 1.0 - state.beta2.powi(state.t as i32);
    let lr_t = state.lr / bc1;

    for (idx, grad_w, grad_b) in pending_updates {
        if let LayerKind::Dense { weights, bias, .. } = &graph.layers[idx].kind {
            let buf = state.bufs[idx].as_mut().expect("prepared for every Dense layer");
            let mut w = arena.read_f32(weights.clone());
            let mut b = arena.read_f32(bias.clone());
            adam_update(&mut w, &grad_w, &mut buf.m_w, &mut buf.v_w, lr_t, state.beta1, state.beta2, bc2, state.eps);
            adam_update(&mut b, &grad_b, &mut buf.m_b, &mut buf.v_b, lr_t, state.beta1, state.beta2, bc2, state.eps);
            arena.write_f32(weights.clone(), &w);
            arena.write_f32(bias.clone(), &b);
        }
    }

    Ok(loss)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ARENA_SIZE;
    use crate::model::load::load;

    #[test]
    fn xor_converges_with_adam() {
        let bytes = crate::model::load::test_fixtures::xor_model_bytes();
        let mut arena = Arena::new(ARENA_SIZE);
        let (_, graph) = load(&bytes, &mut arena).unwrap();
        let mut state = TrainingState::prepare(&graph, 0.5);

        let samples = [
            ([0.0f32, 0.0], [0.0f32]),
            ([0.0, 1.0], [1.0]),
            ([1.0, 0.0], [1.0]),
            ([1.0, 1.0], [0.0]),
        ];

        let mut last_loss = f32::MAX;
        for step in 0..2000 {
            let (x, t) = samples[step % samples.len()];
            last_loss = train_step(&graph, &mut arena, &mut state, &x, &t).unwrap();
        }
        assert!(last_loss.is_finite());

        for (x, t) in samples {
            let y = crate::model::infer::infer(&graph, &mut arena, &x).unwrap();
            assert!(
                (y[0] - t[0]).abs() < 0.35,
                "expected {:?} close to {:?}, got {:?}",
                x,
                t,
                y
            );
        }
    }

    #[test]
    fn unsupported_layer_leaves_weights_unchanged() {
        // A lone Softmax-only graph (no Dense) should be rejected outright.
        use crate::model::layer::{LayerRecord, Shape};
        let graph = RuntimeGraph {
            layers: vec![
                LayerRecord {
                    kind: LayerKind::Input,
                    input_shape: Shape::D1(2),
                    output_shape: Shape::D1(2),
                },
                LayerRecord {
                    kind: LayerKind::Softmax,
                    input_shape: Shape::D1(2),
                    output_shape: Shape::D1(2),
                },
            ],
            weights_blob: 0..0,
        };
        let mut arena = Arena::new(ARENA_SIZE);
        let mut state = TrainingState::prepare(&graph, 0.1);
        let result = train_step(&graph, &mut arena, &mut state, &[0.2, 0.8], &[1.0, 0.0]);
        assert!(matches!(result, Err(TrainingError::UnsupportedLayer)));
    }
}
