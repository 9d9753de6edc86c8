//! Constant-Q band analyzer driven by a precomputed kernel table.

use super::BandEntry;
use crate::dsp::window::WindowKind;
use rustfft::num_complex::Complex32;
use tracing::debug;

/// Magnitudes below this snap to zero before gamma shaping.
const NOISE_FLOOR: f32 = 1.0 / 65536.0;
/// Retained history is capped at this many analysis blocks, bounding memory
/// for arbitrarily low band frequencies.
const MAX_SUPPORT_BLOCKS: usize = 8;

/// One precomputed analysis band.
struct BandKernel {
    frequency_hz: f32,
    /// Sample count the band integrates over, inversely proportional to its
    /// frequency.
    support: usize,
    /// Windowed complex exponential, oldest sample first.
    kernel: Vec<Complex32>,
    /// Scales the projection to unit response for a unit-amplitude tone.
    norm: f32,
}

impl BandKernel {
    fn new(sample_rate: f32, frequency_hz: f32, q: f32, max_support: usize) -> Self {
        let ideal = (q * sample_rate / frequency_hz).ceil() as usize;
        let support = ideal.clamp(2, max_support);
        let window = WindowKind::Hann.coefficients(support);
        let window_sum: f32 = window.iter().sum();
        let omega = core::f32::consts::TAU * frequency_hz / sample_rate;
        let kernel = window
            .iter()
            .enumerate()
            .map(|(n, &coeff)| {
                let phase = omega * n as f32;
                Complex32::new(phase.cos(), -phase.sin()) * coeff
            })
            .collect();

        Self {
            frequency_hz,
            support,
            kernel,
            norm: 2.0 / window_sum.max(f32::EPSILON),
        }
    }
}

pub(super) struct ConstantQAnalyzer {
    bands: Vec<BandKernel>,
    bands_per_octave: usize,
    /// Most recent mixed samples, sized to the longest band support.
    history: Vec<f32>,
    samples_seen: u64,
    /// Current-slice complex coefficient per band.
    coefficients: Vec<Complex32>,
    gain: f32,
}

impl ConstantQAnalyzer {
    pub(super) fn new(
        sample_rate: f32,
        block_size: usize,
        bands_per_octave: usize,
        min_frequency: f32,
        max_frequency: f32,
        gain: f32,
    ) -> Self {
        let ratio = 2f32.powf(1.0 / bands_per_octave as f32);
        let q = 1.0 / (ratio - 1.0);
        let max_support = (block_size * MAX_SUPPORT_BLOCKS).max(2);
        let nyquist = sample_rate * 0.5;

        let mut bands = Vec::new();
        let mut frequency = min_frequency;
        while frequency <= max_frequency && frequency < nyquist {
            bands.push(BandKernel::new(sample_rate, frequency, q, max_support));
            frequency *= ratio;
        }

        let history_len = bands.iter().map(|band| band.support).max().unwrap_or(2);
        debug!(
            "[chromagram] constant-q bands={} q={q:.1} history={history_len}",
            bands.len()
        );

        Self {
            coefficients: vec![Complex32::new(0.0, 0.0); bands.len()],
            history: vec![0.0; history_len],
            samples_seen: 0,
            bands_per_octave,
            bands,
            gain,
        }
    }

    pub(super) fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub(super) fn bands_per_octave(&self) -> usize {
        self.bands_per_octave
    }

    pub(super) fn band_frequency(&self, band: usize) -> Option<f32> {
        self.bands.get(band).map(|kernel| kernel.frequency_hz)
    }

    pub(super) fn coefficient(&self, band: usize) -> Option<Complex32> {
        self.coefficients.get(band).copied()
    }

    /// Slide the retained history by one block and refresh every band whose
    /// support is fully covered by the samples seen so far; the rest stay
    /// out of the table until more audio arrives.
    pub(super) fn analyze(&mut self, block: &[f32], table: &mut Vec<BandEntry>) -> bool {
        let len = self.history.len();
        if block.len() >= len {
            self.history.copy_from_slice(&block[block.len() - len..]);
        } else {
            self.history.copy_within(block.len().., 0);
            self.history[len - block.len()..].copy_from_slice(block);
        }
        self.samples_seen = self.samples_seen.saturating_add(block.len() as u64);

        table.clear();
        for (band, kernel) in self.bands.iter().enumerate() {
            if self.samples_seen < kernel.support as u64 {
                continue;
            }

            let tail = &self.history[len - kernel.support..];
            let mut acc = Complex32::new(0.0, 0.0);
            for (&sample, &coeff) in tail.iter().zip(&kernel.kernel) {
                acc += coeff * sample;
            }
            let coefficient = acc * kernel.norm;
            self.coefficients[band] = coefficient;

            table.push(BandEntry {
                band,
                frequency_hz: kernel.frequency_hz,
                magnitude: shape_magnitude(coefficient.norm(), self.gain),
            });
        }

        true
    }

    pub(super) fn reset(&mut self) {
        self.history.fill(0.0);
        self.samples_seen = 0;
        self.coefficients.fill(Complex32::new(0.0, 0.0));
    }
}

/// Fuzzy zeros snap to silence; the rest get square-root gamma and display
/// gain.
fn shape_magnitude(raw: f32, gain: f32) -> f32 {
    if raw < NOISE_FLOOR { 0.0 } else { gain * raw.sqrt() }
}
