//! Industrial signal-processing primitives (0xA0-0xA7, spec.md §3/§6)
//!
//! A fixed-capacity circular FIFO of `f32` samples plus a captured
//! baseline and a simple cross-correlation helper. Grounded in the ring
//! shape of `kernel/src/touch.rs`'s `EventRingBuffer`, reduced to a plain
//! `Vec`-backed FIFO since this buffer is worker-only and single-threaded
//! (spec.md §5: "the industrial buffer ... all worker-only").

use crate::config::INDUSTRIAL_CAPACITY;
use std::collections::VecDeque;

pub struct IndustrialBuffer {
    samples: VecDeque<f32>,
    baseline: Option<f32>,
}

impl IndustrialBuffer {
    pub fn new() -> Self {
        IndustrialBuffer {
            samples: VecDeque::with_capacity(INDUSTRIAL_CAPACITY),
            baseline: None,
        }
    }

    /// Insert a sample, evicting the oldest on overflow.
    pub fn write(&mut self, sample: f32) {
        if self.samples.len() == INDUSTRIAL_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Current contents, oldest first.
    pub fn snapshot(&self) -> Vec<f32> {
        self.samples.iter().copied().collect()
    }

    /// Capture the current mean as the baseline.
    pub fn baseline_capture(&mut self) {
        self.baseline = Some(self.mean());
    }

    pub fn mean(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f32>() / self.samples.len() as f32
    }

    /// Current mean minus the captured baseline (0 if never captured).
    pub fn delta(&self) -> f32 {
        self.mean() - self.baseline.unwrap_or(0.0)
    }

    /// Pearson-style cross-correlation against `reference`, using the
    /// shorter of the two series' lengths (spec.md §8). Returns `None`
    /// when either series is empty.
    pub fn correlate(&self, reference: &[f32]) -> Option<f32> {
        if reference.is_empty() || self.samples.is_empty() {
            return None;
        }
        let n = reference.len().min(self.samples.len());
        let buf: Vec<f32> = self.samples.iter().rev().take(n).copied().collect();
        let refr = &reference[reference.len() - n..];

        let mean_a = buf.iter().sum::<f32>() / n as f32;
        let mean_b = refr.iter().sum::<f32>() / n as f32;
        let mut num = 0.0f32;
        let mut den_a = 0.0f32;
        let mut den_b = 0.0f32;
        for i in 0..n {
            let da = buf[i] - mean_a;
            let db = refr[i] - mean_b;
            num += da * db;
            den_a += da * da;
            den_b += db * db;
        }
        if den_a == 0.0 || den_b == 0.0 {
            return Some(0.0);
        }
        Some(num / (den_a.sqrt() * den_b.sqrt()))
    }
}

impl Default for IndustrialBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_evicts_oldest_keeps_capacity() {
        let mut buf = IndustrialBuffer::new();
        for i in 0..65 {
            buf.write(i as f32);
        }
        let snap = buf.snapshot();
        assert_eq!(snap.len(), INDUSTRIAL_CAPACITY);
        assert_eq!(snap[0], 5.0); // oldest five (0..5) evicted
    }

    #[test]
    fn baseline_then_delta_is_zero_without_change() {
        let mut buf = IndustrialBuffer::new();
        for _ in 0..10 {
            buf.write(1.0);
        }
        buf.baseline_capture();
        assert!((buf.delta()).abs() < 1e-6);
    }

    #[test]
    fn correlate_with_empty_is_none() {
        let buf = IndustrialBuffer::new();
        assert_eq!(buf.correlate(&[1.0, 2.0]), None);
        let mut buf2 = IndustrialBuffer::new();
        buf2.write(1.0);
        assert_eq!(buf2.correlate(&[]), None);
    }

    #[test]
    fn correlate_uses_minimum_length() {
        let mut buf = IndustrialBuffer::new();
        for v in [1.0, 2.0, 3.0, 4.0] {
            buf.write(v);
        }
        let reference = [10.0, 20.0, 30.0];
        let r = buf.correlate(&reference).unwrap();
        assert!(r.is_finite());
    }
}
