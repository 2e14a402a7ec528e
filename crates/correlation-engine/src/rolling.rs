//! Incremental rolling-window correlation accumulator.
//!
//! Keeps running sums over a bounded window of aligned return pairs so a
//! cycle costs one append/evict per pair instead of an O(window) rescan.

use std::collections::VecDeque;

/// Pearson correlation over a bounded rolling window of (x, y) samples.
#[derive(Debug, Clone)]
pub struct RollingCorrelation {
    capacity: usize,
    samples: VecDeque<(f64, f64)>,
    sum_x: f64,
    sum_y: f64,
    sum_xx: f64,
    sum_yy: f64,
    sum_xy: f64,
}

impl RollingCorrelation {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
            sum_x: 0.0,
            sum_y: 0.0,
            sum_xx: 0.0,
            sum_yy: 0.0,
            sum_xy: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append a sample pair, evicting the oldest beyond capacity.
    pub fn push(&mut self, x: f64, y: f64) {
        if !x.is_finite() || !y.is_finite() {
            return;
        }
        if self.samples.len() == self.capacity {
            if let Some((ox, oy)) = self.samples.pop_front() {
                self.sum_x -= ox;
                self.sum_y -= oy;
                self.sum_xx -= ox * ox;
                self.sum_yy -= oy * oy;
                self.sum_xy -= ox * oy;
            }
        }
        self.samples.push_back((x, y));
        self.sum_x += x;
        self.sum_y += y;
        self.sum_xx += x * x;
        self.sum_yy += y * y;
        self.sum_xy += x * y;
    }

    /// Current coefficient, clamped to [-1, 1]. `None` with fewer than two
    /// samples or when either side has zero variance.
    pub fn correlation(&self) -> Option<f64> {
        let n = self.samples.len() as f64;
        if n < 2.0 {
            return None;
        }
        let cov = self.sum_xy - self.sum_x * self.sum_y / n;
        let var_x = self.sum_xx - self.sum_x * self.sum_x / n;
        let var_y = self.sum_yy - self.sum_y * self.sum_y / n;
        if var_x <= f64::EPSILON || var_y <= f64::EPSILON {
            return None;
        }
        Some((cov / (var_x * var_y).sqrt()).clamp(-1.0, 1.0))
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.sum_x = 0.0;
        self.sum_y = 0.0;
        self.sum_xx = 0.0;
        self.sum_yy = 0.0;
        self.sum_xy = 0.0;
    }
}
