//! Fixed 12-bin pitch-class chromagram.
//!
//! The input is low-pass filtered and decimated into an internal analysis
//! ring; every half ring of fresh samples a Hamming-windowed transform is
//! folded across two octaves and two harmonics into one magnitude per pitch
//! class.

use super::BandEntry;
use crate::dsp::window::WindowKind;
use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex32;
use std::sync::Arc;
use tracing::debug;

pub(super) const PITCH_CLASSES: usize = 12;
/// Decimated samples in the analysis window.
const ANALYSIS_SIZE: usize = 8192;
/// Fresh decimated samples required between successive chroma evaluations.
const ANALYSIS_INTERVAL: usize = ANALYSIS_SIZE / 2;
const DECIMATION: usize = 4;
const NUM_OCTAVES: usize = 2;
const NUM_HARMONICS: usize = 2;
const SEARCH_WIDTH: usize = 2;
/// Reference frequency of pitch class 0: C3.
const C3_HZ: f32 = 130.812_78;

/// Second-order low-pass retained across blocks so decimation stays
/// alias-free at block boundaries.
#[derive(Debug, Default, Clone, Copy)]
struct LowPassState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl LowPassState {
    #[inline]
    fn advance(&mut self, x0: f32) -> f32 {
        const B0: f32 = 0.2929;
        const B1: f32 = 0.5858;
        const B2: f32 = 0.2929;
        const A2: f32 = 0.1716;

        let y0 = B0 * x0 + B1 * self.x1 + B2 * self.x2 - A2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x0;
        self.y2 = self.y1;
        self.y1 = y0;
        y0
    }
}

pub(super) struct PitchClassAnalyzer {
    sample_rate: f32,
    /// Decimated sample ring; `head` is the oldest slot (next write).
    ring: Vec<f32>,
    head: usize,
    low_pass: LowPassState,
    decimation_phase: usize,
    since_last: usize,
    window: Vec<f32>,
    fft: Arc<dyn RealToComplex<f32>>,
    real_input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
    magnitude: Vec<f32>,
    note_frequencies: [f32; PITCH_CLASSES],
    ready: bool,
}

impl PitchClassAnalyzer {
    pub(super) fn new(sample_rate: f32) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(ANALYSIS_SIZE);

        let mut note_frequencies = [0.0; PITCH_CLASSES];
        for (index, slot) in note_frequencies.iter_mut().enumerate() {
            *slot = C3_HZ * 2f32.powf(index as f32 / PITCH_CLASSES as f32);
        }
        debug!("[chromagram] pitch-class window={ANALYSIS_SIZE} decimation={DECIMATION}");

        Self {
            sample_rate,
            ring: vec![0.0; ANALYSIS_SIZE],
            head: 0,
            low_pass: LowPassState::default(),
            decimation_phase: 0,
            since_last: 0,
            window: WindowKind::Hamming.coefficients(ANALYSIS_SIZE),
            real_input: vec![0.0; ANALYSIS_SIZE],
            spectrum: fft.make_output_vec(),
            scratch: fft.make_scratch_vec(),
            magnitude: vec![0.0; ANALYSIS_SIZE / 2 + 1],
            note_frequencies,
            fft,
            ready: false,
        }
    }

    pub(super) fn is_ready(&self) -> bool {
        self.ready
    }

    pub(super) fn band_frequency(&self, band: usize) -> Option<f32> {
        self.note_frequencies.get(band).copied()
    }

    /// Fold one mixed block into the ring; refreshes `table` and returns
    /// true once enough fresh samples have accumulated.
    pub(super) fn analyze(&mut self, block: &[f32], table: &mut Vec<BandEntry>) -> bool {
        self.decimate_into_ring(block);
        if self.since_last < ANALYSIS_INTERVAL {
            return false;
        }
        self.since_last -= ANALYSIS_INTERVAL;

        self.compute_spectrum();
        self.compute_chroma(table);
        self.ready = true;
        true
    }

    pub(super) fn reset(&mut self) {
        self.ring.fill(0.0);
        self.head = 0;
        self.low_pass = LowPassState::default();
        self.decimation_phase = 0;
        self.since_last = 0;
        self.magnitude.fill(0.0);
        self.ready = false;
    }

    fn decimate_into_ring(&mut self, block: &[f32]) {
        for &sample in block {
            let filtered = self.low_pass.advance(sample);
            if self.decimation_phase == 0 {
                self.ring[self.head] = filtered;
                self.head = (self.head + 1) % ANALYSIS_SIZE;
                self.since_last += 1;
            }
            self.decimation_phase = (self.decimation_phase + 1) % DECIMATION;
        }
    }

    fn compute_spectrum(&mut self) {
        for (index, slot) in self.real_input.iter_mut().enumerate() {
            let sample = self.ring[(self.head + index) % ANALYSIS_SIZE];
            *slot = sample * self.window[index];
        }

        self.fft
            .process_with_scratch(&mut self.real_input, &mut self.spectrum, &mut self.scratch)
            .expect("real FFT forward transform");

        for (slot, complex) in self.magnitude.iter_mut().zip(&self.spectrum) {
            *slot = complex.norm();
        }
    }

    fn compute_chroma(&mut self, table: &mut Vec<BandEntry>) {
        let bin_width = (self.sample_rate / DECIMATION as f32) / ANALYSIS_SIZE as f32;
        let max_bin = self.magnitude.len() - 1;

        table.clear();
        for (class, &reference) in self.note_frequencies.iter().enumerate() {
            let mut class_sum = 0.0;
            for octave in 1..=NUM_OCTAVES {
                for harmonic in 1..=NUM_HARMONICS {
                    let frequency = reference * octave as f32 * harmonic as f32;
                    let center = (frequency / bin_width).round() as usize;
                    let lo = center.saturating_sub(SEARCH_WIDTH * harmonic);
                    let hi = (center + SEARCH_WIDTH * harmonic).min(max_bin);
                    if lo > hi {
                        continue;
                    }
                    let peak = self.magnitude[lo..=hi]
                        .iter()
                        .fold(0.0f32, |acc, &value| acc.max(value));
                    class_sum += peak / harmonic as f32;
                }
            }
            table.push(BandEntry {
                band: class,
                frequency_hz: reference,
                magnitude: class_sum,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_grid_spans_one_equal_tempered_octave() {
        let analyzer = PitchClassAnalyzer::new(48_000.0);
        assert!((analyzer.band_frequency(0).unwrap() - C3_HZ).abs() < 1e-3);
        assert!((analyzer.band_frequency(9).unwrap() - 220.0).abs() < 1e-2);
        assert!(analyzer.band_frequency(PITCH_CLASSES).is_none());
    }

    #[test]
    fn low_pass_settles_on_dc() {
        let mut state = LowPassState::default();
        let mut out = 0.0;
        for _ in 0..64 {
            out = state.advance(1.0);
        }
        // Unity-gain pass band: (b0 + b1 + b2) / (1 + a2).
        assert!((out - 1.0).abs() < 1e-3, "settled at {out}");
    }

    #[test]
    fn readiness_requires_half_a_ring_of_fresh_samples() {
        let mut analyzer = PitchClassAnalyzer::new(48_000.0);
        let mut table = Vec::new();

        let quiet = vec![0.0; ANALYSIS_INTERVAL * DECIMATION - DECIMATION];
        assert!(!analyzer.analyze(&quiet, &mut table));
        assert!(!analyzer.is_ready());

        assert!(analyzer.analyze(&[0.0; DECIMATION], &mut table));
        assert!(analyzer.is_ready());
        assert_eq!(table.len(), PITCH_CLASSES);
    }
}
