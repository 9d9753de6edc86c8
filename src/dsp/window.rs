//! Precomputed analysis window tables.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock, RwLock};

/// Window selection controlling spectral leakage characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Rectangular,
    Hann,
    Hamming,
    Blackman,
}

impl WindowKind {
    pub(crate) fn coefficients(self, len: usize) -> Vec<f32> {
        match self {
            WindowKind::Rectangular => vec![1.0; len],
            WindowKind::Hann => (0..len)
                .map(|n| {
                    let phase = (n as f32) * core::f32::consts::TAU / (len as f32);
                    0.5 * (1.0 - phase.cos())
                })
                .collect(),
            WindowKind::Hamming => (0..len)
                .map(|n| {
                    let phase = (n as f32) * core::f32::consts::TAU / (len as f32);
                    0.54 - 0.46 * phase.cos()
                })
                .collect(),
            WindowKind::Blackman => {
                let a0 = 0.42;
                let a1 = 0.5;
                let a2 = 0.08;
                (0..len)
                    .map(|n| {
                        let phase = (n as f32) * core::f32::consts::TAU / (len as f32);
                        a0 - a1 * phase.cos() + a2 * (2.0 * phase).cos()
                    })
                    .collect()
            }
        }
    }
}

/// Shared per-sample gain table plus its precomputed normalization sum.
///
/// Tables are cached process-wide by `(kind, length)`; engines sharing a
/// window size share one allocation.
#[derive(Debug, Clone)]
pub struct WindowTable {
    coefficients: Arc<[f32]>,
    sum: f32,
}

impl WindowTable {
    pub fn get(kind: WindowKind, len: usize) -> Self {
        let coefficients = WindowCache::global().get(kind, len);
        let sum = coefficients.iter().sum();
        Self { coefficients, sum }
    }

    #[inline]
    pub fn coefficients(&self) -> &[f32] {
        &self.coefficients
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    /// Sum of all coefficients, used to normalize transform magnitudes.
    #[inline]
    pub fn normalization_sum(&self) -> f32 {
        self.sum
    }

    /// Multiply `buffer` in place with the gain table.
    pub fn apply(&self, buffer: &mut [f32]) {
        debug_assert_eq!(buffer.len(), self.coefficients.len());
        for (sample, coeff) in buffer.iter_mut().zip(self.coefficients.iter()) {
            *sample *= *coeff;
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct WindowKey {
    kind: WindowKind,
    len: usize,
}

struct WindowCache {
    entries: RwLock<FxHashMap<WindowKey, Arc<[f32]>>>,
}

impl WindowCache {
    fn global() -> &'static WindowCache {
        static INSTANCE: OnceLock<WindowCache> = OnceLock::new();
        INSTANCE.get_or_init(|| WindowCache {
            entries: RwLock::new(FxHashMap::default()),
        })
    }

    fn get(&self, kind: WindowKind, len: usize) -> Arc<[f32]> {
        if len == 0 {
            return Arc::from([]);
        }

        let key = WindowKey { kind, len };
        if let Some(existing) = self.entries.read().unwrap().get(&key) {
            return Arc::clone(existing);
        }

        let mut write = self.entries.write().unwrap();
        Arc::clone(
            write
                .entry(key)
                .or_insert_with(|| Arc::from(kind.coefficients(len))),
        )
    }
}
