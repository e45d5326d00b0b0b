//! Weighted collections for probability-proportional sampling.
//!
//! Two concrete forms share one informal interface instead of a trait
//! object: [`CompactWeightedCollection`] (prefix sums, O(log n) sample,
//! cheap to build on the hot path) and [`FastWeightedCollection`]
//! (Walker alias table, O(1) sample, built once for the long-lived
//! global samplers).

use tracing::error;

use crate::random::{random_select, thread_index, thread_uniform};

/// Prefix-sum weighted collection. Construction is a single pass, so it
/// is the right choice for per-request sub-samplers.
#[derive(Debug, Clone, Default)]
pub struct CompactWeightedCollection<T> {
    ids: Vec<T>,
    sum_weights: Vec<f32>,
    sum_weight: f32,
}

impl<T: Clone> CompactWeightedCollection<T> {
    pub fn new() -> Self {
        Self {
            ids: Vec::new(),
            sum_weights: Vec::new(),
            sum_weight: 0.0,
        }
    }

    /// Initialize from parallel id/weight slices. Mismatched lengths
    /// leave the collection empty.
    pub fn init(&mut self, ids: &[T], weights: &[f32]) {
        if ids.len() != weights.len() {
            error!("ids size != weights size, init error");
            self.ids.clear();
            self.sum_weights.clear();
            self.sum_weight = 0.0;
            return;
        }
        self.ids = ids.to_vec();
        self.sum_weights.clear();
        self.sum_weights.reserve(weights.len());
        self.sum_weight = 0.0;
        for &w in weights {
            self.sum_weight += w;
            self.sum_weights.push(self.sum_weight);
        }
    }

    pub fn init_pairs(&mut self, pairs: &[(T, f32)]) {
        self.ids.clear();
        self.sum_weights.clear();
        self.ids.reserve(pairs.len());
        self.sum_weights.reserve(pairs.len());
        self.sum_weight = 0.0;
        for (id, w) in pairs {
            self.ids.push(id.clone());
            self.sum_weight += w;
            self.sum_weights.push(self.sum_weight);
        }
    }

    pub fn from_pairs(pairs: &[(T, f32)]) -> Self {
        let mut c = Self::new();
        c.init_pairs(pairs);
        c
    }

    /// Weighted draw. `None` when the collection is empty or all
    /// weights are zero.
    pub fn sample(&self) -> Option<(T, f32)> {
        if self.ids.is_empty() || self.sum_weight <= 0.0 {
            return None;
        }
        let mid = random_select(&self.sum_weights, 0, self.ids.len() - 1);
        self.get(mid)
    }

    /// The (id, weight) pair at `idx`.
    pub fn get(&self, idx: usize) -> Option<(T, f32)> {
        if idx >= self.ids.len() {
            return None;
        }
        let pre = if idx == 0 {
            0.0
        } else {
            self.sum_weights[idx - 1]
        };
        Some((self.ids[idx].clone(), self.sum_weights[idx] - pre))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn sum_weight(&self) -> f32 {
        self.sum_weight
    }
}

/// Alias-table weighted collection. O(n) to build, O(1) to sample.
#[derive(Debug, Clone, Default)]
pub struct FastWeightedCollection<T> {
    ids: Vec<T>,
    weights: Vec<f32>,
    prob: Vec<f32>,
    alias: Vec<usize>,
    sum_weight: f32,
}

impl<T: Clone> FastWeightedCollection<T> {
    pub fn new() -> Self {
        Self {
            ids: Vec::new(),
            weights: Vec::new(),
            prob: Vec::new(),
            alias: Vec::new(),
            sum_weight: 0.0,
        }
    }

    pub fn init(&mut self, ids: &[T], weights: &[f32]) {
        if ids.len() != weights.len() {
            error!("ids size != weights size, init error");
            *self = Self::new();
            return;
        }
        self.ids = ids.to_vec();
        self.weights = weights.to_vec();
        self.sum_weight = weights.iter().sum();
        self.build_alias_table();
    }

    pub fn init_pairs(&mut self, pairs: &[(T, f32)]) {
        self.ids = pairs.iter().map(|(id, _)| id.clone()).collect();
        self.weights = pairs.iter().map(|&(_, w)| w).collect();
        self.sum_weight = self.weights.iter().sum();
        self.build_alias_table();
    }

    /// Standard Walker construction: normalize to mean 1, then pair
    /// underfull columns with overfull donors, smallest donor first.
    fn build_alias_table(&mut self) {
        let n = self.ids.len();
        self.prob = vec![0.0; n];
        self.alias = (0..n).collect();
        if n == 0 || self.sum_weight <= 0.0 {
            self.ids.clear();
            self.weights.clear();
            self.prob.clear();
            self.alias.clear();
            self.sum_weight = 0.0;
            return;
        }
        let scale = n as f32 / self.sum_weight;
        let mut scaled: Vec<f32> = self.weights.iter().map(|w| w * scale).collect();
        let mut small: Vec<usize> = Vec::with_capacity(n);
        let mut large: Vec<usize> = Vec::with_capacity(n);
        for (i, &p) in scaled.iter().enumerate() {
            if p < 1.0 {
                small.push(i);
            } else {
                large.push(i);
            }
        }
        while let (Some(s), Some(l)) = (small.pop(), large.pop()) {
            self.prob[s] = scaled[s];
            self.alias[s] = l;
            scaled[l] = (scaled[l] + scaled[s]) - 1.0;
            if scaled[l] < 1.0 {
                small.push(l);
            } else {
                large.push(l);
            }
        }
        for i in large.into_iter().chain(small) {
            self.prob[i] = 1.0;
        }
    }

    /// Weighted draw. `None` when the collection is empty or all
    /// weights are zero.
    pub fn sample(&self) -> Option<(T, f32)> {
        if self.ids.is_empty() || self.sum_weight <= 0.0 {
            return None;
        }
        let column = thread_index(self.ids.len());
        let idx = if thread_uniform() < self.prob[column] {
            column
        } else {
            self.alias[column]
        };
        Some((self.ids[idx].clone(), self.weights[idx]))
    }

    pub fn get(&self, idx: usize) -> Option<(T, f32)> {
        if idx >= self.ids.len() {
            return None;
        }
        Some((self.ids[idx].clone(), self.weights[idx]))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn sum_weight(&self) -> f32 {
        self.sum_weight
    }
}
