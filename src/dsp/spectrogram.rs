//! Short-time spectrogram engine with a decaying peak-hold trace.
//!
//! Samples stream into a fixed-capacity fifo; every full hop advances a
//! retained analysis window by `hop_size` samples and runs one magnitude-only
//! transform over it. The windowed frame is rotated zero-phase before the
//! transform so the magnitude spectrum carries no window-placement phase
//! artifacts.

use super::fifo::{PullOutcome, SampleFifo};
use super::window::{WindowKind, WindowTable};
use super::{AudioBlock, AudioProcessor, ProcessorUpdate, Reconfigurable};
use crate::util::{ChannelMixdown, DEFAULT_SAMPLE_RATE, mixdown_planar, remove_dc};
use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Smallest magnitude admitted into log compression.
pub const MAGNITUDE_EPSILON: f32 = 1.0e-6;
/// Floor of the published spectrum: `20 * log10(MAGNITUDE_EPSILON)`.
pub const DB_FLOOR: f32 = -120.0;
/// Floor the peak-hold trace decays towards.
pub const PEAK_FLOOR_DB: f32 = -100.0;

/// Natural log to amplitude-decibel factor: 20 * log10(e).
const MAG_LOG_FACTOR: f32 = 20.0 * core::f32::consts::LOG10_E;
const MIN_FFT_SIZE: usize = 128;
const DEFAULT_HOP_DIVISOR: usize = 16;
/// Fifo capacity, in analysis windows, absorbing producer/consumer jitter.
const FIFO_WINDOWS: usize = 4;

/// Configuration for spectrogram FFT analysis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpectrogramConfig {
    pub sample_rate: f32,
    /// FFT size (must be a power of two for radix-2 implementations).
    pub fft_size: usize,
    /// Hop size between successive frames.
    pub hop_size: usize,
    /// Window selection controlling spectral leakage characteristics.
    pub window: WindowKind,
    /// Decibels subtracted from an unrefreshed peak-hold bin every frame.
    pub peak_decay_db_per_frame: f32,
    pub mixdown: ChannelMixdown,
    /// Channel count of the blocks this engine will be fed.
    pub channels: usize,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            fft_size: 2048,
            hop_size: 2048 / DEFAULT_HOP_DIVISOR,
            window: WindowKind::Hann,
            peak_decay_db_per_frame: 2.0,
            mixdown: ChannelMixdown::Sum,
            channels: 2,
        }
    }
}

impl SpectrogramConfig {
    /// Ensures the configuration respects runtime invariants and sane defaults.
    pub fn normalize(&mut self) {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            self.sample_rate = DEFAULT_SAMPLE_RATE;
        }

        self.fft_size = self.fft_size.max(MIN_FFT_SIZE);
        if !self.fft_size.is_power_of_two() {
            self.fft_size = self.fft_size.next_power_of_two();
        }

        self.hop_size = if self.hop_size == 0 {
            (self.fft_size / DEFAULT_HOP_DIVISOR).max(1)
        } else {
            self.hop_size.min(self.fft_size).max(1)
        };
        // Hops must tile the analysis window exactly; round down to the
        // nearest power of two so every hop size divides the FFT size.
        if !self.hop_size.is_power_of_two() {
            self.hop_size = 1 << (usize::BITS - 1 - self.hop_size.leading_zeros());
        }

        if !self.peak_decay_db_per_frame.is_finite() || self.peak_decay_db_per_frame < 0.0 {
            self.peak_decay_db_per_frame = 2.0;
        }

        self.channels = self.channels.max(1);
    }

    /// Returns a normalized copy of this configuration.
    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }

    /// Number of frequency bins in a published frame.
    pub fn bins(&self) -> usize {
        self.fft_size / 2
    }
}

/// Latest magnitude frame and peak-hold trace, one value per frequency bin.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralSnapshot {
    pub magnitudes_db: Vec<f32>,
    pub peaks_db: Vec<f32>,
}

impl SpectralSnapshot {
    /// Frame at the clamp floor everywhere; what consumers observe before
    /// the first analysis pass completes.
    pub fn sized(bins: usize) -> Self {
        Self {
            magnitudes_db: vec![DB_FLOOR; bins],
            peaks_db: vec![PEAK_FLOOR_DB; bins],
        }
    }
}

pub struct SpectrogramProcessor {
    config: SpectrogramConfig,
    fifo: SampleFifo,
    window: WindowTable,
    fft: Arc<dyn RealToComplex<f32>>,
    /// Most recent `fft_size` mixed samples, shift-and-append per hop.
    analysis_window: Vec<f32>,
    /// Samples appended so far; saturates at `fft_size` once the window fills.
    accumulated: usize,
    hop_planar: Vec<f32>,
    hop_mono: Vec<f32>,
    windowed: Vec<f32>,
    real_input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
    snapshot: SpectralSnapshot,
}

impl SpectrogramProcessor {
    pub fn new(config: SpectrogramConfig) -> Self {
        let config = config.normalized();
        let fft_size = config.fft_size;
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let window = WindowTable::get(config.window, fft_size);
        debug!(
            "[spectrogram] fft_size={} hop_size={} bins={}",
            fft_size,
            config.hop_size,
            config.bins()
        );

        Self {
            fifo: SampleFifo::new(config.channels, fft_size * FIFO_WINDOWS),
            analysis_window: vec![0.0; fft_size],
            accumulated: 0,
            hop_planar: vec![0.0; config.channels * config.hop_size],
            hop_mono: vec![0.0; config.hop_size],
            windowed: vec![0.0; fft_size],
            real_input: vec![0.0; fft_size],
            spectrum: fft.make_output_vec(),
            scratch: fft.make_scratch_vec(),
            snapshot: SpectralSnapshot::sized(config.bins()),
            window,
            fft,
            config,
        }
    }

    pub fn config(&self) -> SpectrogramConfig {
        self.config
    }

    /// Latest frame and peak trace. Floor-valued until the analysis window
    /// has filled and the first transform has run.
    pub fn snapshot(&self) -> &SpectralSnapshot {
        &self.snapshot
    }

    /// Precomputed normalization sum of the active window table.
    pub fn window_normalization(&self) -> f32 {
        self.window.normalization_sum()
    }

    #[cfg(test)]
    fn analysis_window(&self) -> &[f32] {
        &self.analysis_window
    }

    fn process_ready_hops(&mut self) -> bool {
        let hop = self.config.hop_size;
        let fft_size = self.config.fft_size;
        let mut produced = false;

        while self.fifo.pull(&mut self.hop_planar, hop) == PullOutcome::Filled {
            mixdown_planar(
                &self.hop_planar,
                self.config.channels,
                hop,
                self.config.mixdown,
                &mut self.hop_mono,
            );

            if self.accumulated < fft_size {
                // Still accumulating the first full window; no frame yet.
                let start = self.accumulated;
                self.analysis_window[start..start + hop].copy_from_slice(&self.hop_mono);
                self.accumulated += hop;
                continue;
            }

            self.analysis_window.copy_within(hop.., 0);
            self.analysis_window[fft_size - hop..].copy_from_slice(&self.hop_mono);
            self.analyze_window();
            produced = true;
        }

        produced
    }

    fn analyze_window(&mut self) {
        let fft_size = self.config.fft_size;
        self.windowed.copy_from_slice(&self.analysis_window);
        remove_dc(&mut self.windowed);
        self.window.apply(&mut self.windowed);

        // Zero-phase reordering: the second half of the windowed frame is
        // rotated to the front so the time origin maps to sample zero.
        let half_hi = fft_size.div_ceil(2);
        let half_lo = fft_size / 2;
        self.real_input[..half_hi].copy_from_slice(&self.windowed[half_lo..]);
        self.real_input[fft_size - half_lo..].copy_from_slice(&self.windowed[..half_lo]);

        self.fft
            .process_with_scratch(&mut self.real_input, &mut self.spectrum, &mut self.scratch)
            .expect("real FFT forward transform");

        let bins = self.config.bins();
        for (target, complex) in self.snapshot.magnitudes_db[..bins]
            .iter_mut()
            .zip(&self.spectrum)
        {
            let magnitude = complex.norm().max(MAGNITUDE_EPSILON);
            *target = magnitude.ln() * MAG_LOG_FACTOR;
        }

        let decay = self.config.peak_decay_db_per_frame;
        for (peak, &magnitude) in self
            .snapshot
            .peaks_db
            .iter_mut()
            .zip(&self.snapshot.magnitudes_db)
        {
            let decayed = (*peak - decay).max(PEAK_FLOOR_DB);
            *peak = decayed.max(magnitude);
        }
    }
}

impl fmt::Debug for SpectrogramProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrogramProcessor")
            .field("config", &self.config)
            .field("accumulated", &self.accumulated)
            .finish()
    }
}

impl AudioProcessor for SpectrogramProcessor {
    type Output = SpectralSnapshot;

    fn process_block(&mut self, block: &AudioBlock<'_>) -> ProcessorUpdate<&SpectralSnapshot> {
        if block.frame_count() == 0 || block.channels == 0 {
            return ProcessorUpdate::None;
        }

        self.fifo.push_interleaved(block.samples, block.channels);

        if self.process_ready_hops() {
            ProcessorUpdate::Snapshot(&self.snapshot)
        } else {
            ProcessorUpdate::None
        }
    }

    fn reset(&mut self) {
        self.fifo.clear();
        self.analysis_window.fill(0.0);
        self.accumulated = 0;
        self.snapshot.magnitudes_db.fill(DB_FLOOR);
        self.snapshot.peaks_db.fill(PEAK_FLOOR_DB);
    }
}

impl Reconfigurable<SpectrogramConfig> for SpectrogramProcessor {
    fn update_config(&mut self, config: SpectrogramConfig) {
        *self = Self::new(config);
    }
}
