//! Layer graph data model
//!
//! spec.md §9's redesign note calls for "a tagged variant per layer type,
//! with its descriptor data inline and a uniform forward/backward
//! dispatch" in place of the teacher's ad-hoc function-pointer layers
//! (`kernel/src/jarvis::model::LayerWeights` is a fixed struct-of-vecs, one
//! field per weight matrix of a hardwired transformer block — here the
//! layer set is dynamic, so each layer is a variant of [`LayerKind`]
//! instead).

use core::ops::Range;

/// Up to 3-D tensor shape; a 1-D shape is `[N]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    D1(usize),
    D3 { c: usize, h: usize, w: usize },
}

impl Shape {
    pub fn numel(&self) -> usize {
        match *self {
            Shape::D1(n) => n,
            Shape::D3 { c, h, w } => c * h * w,
        }
    }

    pub fn as_d3(&self) -> Option<(usize, usize, usize)> {
        match *self {
            Shape::D3 { c, h, w } => Some((c, h, w)),
            Shape::D1(_) => None,
        }
    }
}

/// One parsed layer: its type tag, scalar parameters, and — for parametric
/// layers — byte ranges into the arena's weight-blob copy (weights tensor
/// then bias tensor, per spec.md §4.4.1).
#[derive(Debug, Clone)]
pub enum LayerKind {
    Input,
    Dense {
        weights: Range<usize>,
        bias: Range<usize>,
        in_dim: usize,
        out_dim: usize,
    },
    Relu,
    Sigmoid,
    Softmax,
    Conv2d {
        weights: Range<usize>,
        bias: Range<usize>,
        filters: usize,
        in_channels: usize,
        kh: usize,
        kw: usize,
        sh: usize,
        sw: usize,
        pad: usize,
    },
    MaxPool {
        kh: usize,
        kw: usize,
        sh: usize,
        sw: usize,
        pad: usize,
    },
    Flatten,
}

impl LayerKind {
    pub fn type_code(&self) -> u8 {
        match self {
            LayerKind::Input => 1,
            LayerKind::Dense { .. } => 2,
            LayerKind::Relu => 3,
            LayerKind::Sigmoid => 4,
            LayerKind::Softmax => 5,
            LayerKind::Conv2d { .. } => 6,
            LayerKind::Flatten => 7,
            LayerKind::MaxPool { .. } => 8,
        }
    }

    pub fn is_parametric(&self) -> bool {
        matches!(self, LayerKind::Dense { .. } | LayerKind::Conv2d { .. })
    }
}

/// A layer in the runtime graph: its kind plus the input/output shapes the
/// loader's shape-tracking cursor computed for it.
#[derive(Debug, Clone)]
pub struct LayerRecord {
    pub kind: LayerKind,
    pub input_shape: Shape,
    pub output_shape: Shape,
}

/// An ordered, parsed layer graph ready for inference or training.
pub struct RuntimeGraph {
    pub layers: Vec<LayerRecord>,
    /// Byte range of the full copied weight blob within the arena.
    pub weights_blob: Range<usize>,
}

impl RuntimeGraph {
    pub fn input_dim(&self) -> usize {
        self.layers
            .first()
            .map(|l| l.input_shape.numel())
            .unwrap_or(0)
    }

    pub fn output_dim(&self) -> usize {
        self.layers
            .last()
            .map(|l| l.output_shape.numel())
            .unwrap_or(0)
    }

    pub fn max_activation_elems(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.output_shape.numel().max(l.input_shape.numel()))
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_numel() {
        assert_eq!(Shape::D1(10).numel(), 10);
        assert_eq!(
            Shape::D3 { c: 3, h: 4, w: 5 }.numel(),
            60
        );
    }
}
