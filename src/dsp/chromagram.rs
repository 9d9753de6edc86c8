//! Multi-resolution band-magnitude analysis ("chromagram").
//!
//! Two interchangeable strategies satisfy the same contract: a constant-Q
//! analyzer with a precomputed per-band kernel table, and a fixed 12-bin
//! pitch-class reduction. One is selected at construction; the engine feeds
//! whichever is active one full block of mixed samples at a time and exposes
//! a stable-ordered band table.

mod constant_q;
mod pitch_class;

use constant_q::ConstantQAnalyzer;
use pitch_class::PitchClassAnalyzer;

use super::fifo::{PullOutcome, SampleFifo};
use super::{AudioBlock, AudioProcessor, ProcessorUpdate};
use crate::util::musical::MusicalNote;
use crate::util::{ChannelMixdown, DEFAULT_SAMPLE_RATE, mixdown_planar};
use rustfft::num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Fifo capacity, in analysis blocks, absorbing producer jitter.
const FIFO_BLOCKS: usize = 4;

/// Strategy used to reduce audio to per-band magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum BandStrategy {
    /// Log-spaced bands with constant frequency-to-bandwidth ratio; lower
    /// bands integrate over proportionally longer supports.
    ConstantQ {
        bands_per_octave: usize,
        min_frequency: f32,
        max_frequency: f32,
        /// Display gain applied after square-root gamma shaping.
        gain: f32,
    },
    /// Octave-folded reduction to the twelve pitch classes.
    PitchClass,
}

impl Default for BandStrategy {
    fn default() -> Self {
        BandStrategy::ConstantQ {
            bands_per_octave: 12,
            min_frequency: 32.7,
            max_frequency: 8_000.0,
            gain: 15.0,
        }
    }
}

/// Configuration for the chromagram engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChromagramConfig {
    pub sample_rate: f32,
    /// Samples per channel consumed by each analysis pass.
    pub block_size: usize,
    pub strategy: BandStrategy,
    pub mixdown: ChannelMixdown,
    /// Channel count of the blocks this engine will be fed.
    pub channels: usize,
}

impl Default for ChromagramConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: 1024,
            strategy: BandStrategy::default(),
            mixdown: ChannelMixdown::Sum,
            channels: 2,
        }
    }
}

impl ChromagramConfig {
    pub fn normalize(&mut self) {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            self.sample_rate = DEFAULT_SAMPLE_RATE;
        }
        self.channels = self.channels.max(1);
        if let BandStrategy::ConstantQ { gain, .. } = &mut self.strategy
            && (!gain.is_finite() || *gain <= 0.0)
        {
            *gain = 15.0;
        }
    }

    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }

    /// Rejects parameter combinations no band layout can be built from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if let BandStrategy::ConstantQ {
            bands_per_octave,
            min_frequency,
            max_frequency,
            ..
        } = self.strategy
        {
            if bands_per_octave == 0 {
                return Err(ConfigError::ZeroBandCount);
            }
            let nyquist = self.sample_rate * 0.5;
            if !min_frequency.is_finite()
                || !max_frequency.is_finite()
                || min_frequency <= 0.0
                || max_frequency <= min_frequency
                || min_frequency >= nyquist
            {
                return Err(ConfigError::InvalidFrequencyRange {
                    min: min_frequency,
                    max: max_frequency,
                    nyquist,
                });
            }
        }
        Ok(())
    }
}

/// Construction-time configuration rejection.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("block size must be greater than zero")]
    ZeroBlockSize,
    #[error("band layout needs at least one band per octave")]
    ZeroBandCount,
    #[error("frequency range {min}..{max} Hz is empty or exceeds Nyquist {nyquist} Hz")]
    InvalidFrequencyRange { min: f32, max: f32, nyquist: f32 },
}

/// One analyzed band: centre frequency and its current magnitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandEntry {
    /// 0-based global band index; stable between calls.
    pub band: usize,
    pub frequency_hz: f32,
    pub magnitude: f32,
}

impl BandEntry {
    /// 12-TET note closest to this band's centre frequency.
    pub fn note(&self) -> Option<MusicalNote> {
        MusicalNote::from_frequency(self.frequency_hz)
    }
}

/// Ordered band rows, regenerated on every completed analysis pass.
pub type BandTable = Vec<BandEntry>;

enum BandAnalyzer {
    ConstantQ(ConstantQAnalyzer),
    PitchClass(PitchClassAnalyzer),
}

pub struct ChromagramProcessor {
    config: ChromagramConfig,
    fifo: SampleFifo,
    block_planar: Vec<f32>,
    block_mono: Vec<f32>,
    analyzer: BandAnalyzer,
    table: BandTable,
}

impl ChromagramProcessor {
    pub fn new(config: ChromagramConfig) -> Result<Self, ConfigError> {
        let config = config.normalized();
        config.validate()?;

        let analyzer = match config.strategy {
            BandStrategy::ConstantQ {
                bands_per_octave,
                min_frequency,
                max_frequency,
                gain,
            } => BandAnalyzer::ConstantQ(ConstantQAnalyzer::new(
                config.sample_rate,
                config.block_size,
                bands_per_octave,
                min_frequency,
                max_frequency,
                gain,
            )),
            BandStrategy::PitchClass => {
                BandAnalyzer::PitchClass(PitchClassAnalyzer::new(config.sample_rate))
            }
        };
        debug!(
            "[chromagram] block_size={} bands={}",
            config.block_size,
            match &analyzer {
                BandAnalyzer::ConstantQ(a) => a.band_count(),
                BandAnalyzer::PitchClass(_) => pitch_class::PITCH_CLASSES,
            }
        );

        Ok(Self {
            fifo: SampleFifo::new(config.channels, config.block_size * FIFO_BLOCKS),
            block_planar: vec![0.0; config.channels * config.block_size],
            block_mono: vec![0.0; config.block_size],
            analyzer,
            table: BandTable::new(),
            config,
        })
    }

    pub fn config(&self) -> ChromagramConfig {
        self.config
    }

    /// Rows from the most recent completed analysis pass; empty before the
    /// first one.
    pub fn band_table(&self) -> &BandTable {
        &self.table
    }

    /// Total number of bands the active strategy can report.
    pub fn band_count(&self) -> usize {
        match &self.analyzer {
            BandAnalyzer::ConstantQ(analyzer) => analyzer.band_count(),
            BandAnalyzer::PitchClass(_) => pitch_class::PITCH_CLASSES,
        }
    }

    /// Centre frequency of a global band index.
    pub fn band_frequency(&self, band: usize) -> Option<f32> {
        match &self.analyzer {
            BandAnalyzer::ConstantQ(analyzer) => analyzer.band_frequency(band),
            BandAnalyzer::PitchClass(analyzer) => analyzer.band_frequency(band),
        }
    }

    /// (octave, sub-band) position of a global band index, fixed at
    /// construction.
    pub fn band_position(&self, band: usize) -> Option<(usize, usize)> {
        match &self.analyzer {
            BandAnalyzer::ConstantQ(analyzer) => (band < analyzer.band_count()).then(|| {
                (
                    band / analyzer.bands_per_octave(),
                    band % analyzer.bands_per_octave(),
                )
            }),
            BandAnalyzer::PitchClass(_) => {
                (band < pitch_class::PITCH_CLASSES).then_some((0, band))
            }
        }
    }

    /// Complex coefficient of the current time slice (constant-Q only).
    pub fn band_coefficient(&self, band: usize) -> Option<Complex32> {
        match &self.analyzer {
            BandAnalyzer::ConstantQ(analyzer) => analyzer.coefficient(band),
            BandAnalyzer::PitchClass(_) => None,
        }
    }

    /// Whether the engine has produced at least one complete band table.
    pub fn is_ready(&self) -> bool {
        match &self.analyzer {
            BandAnalyzer::ConstantQ(_) => !self.table.is_empty(),
            BandAnalyzer::PitchClass(analyzer) => analyzer.is_ready(),
        }
    }
}

impl fmt::Debug for ChromagramProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChromagramProcessor")
            .field("config", &self.config)
            .field("bands", &self.band_count())
            .finish()
    }
}

impl AudioProcessor for ChromagramProcessor {
    type Output = BandTable;

    fn process_block(&mut self, block: &AudioBlock<'_>) -> ProcessorUpdate<&BandTable> {
        if block.frame_count() == 0 || block.channels == 0 {
            return ProcessorUpdate::None;
        }

        self.fifo.push_interleaved(block.samples, block.channels);

        let block_size = self.config.block_size;
        let mut produced = false;
        while self.fifo.pull(&mut self.block_planar, block_size) == PullOutcome::Filled {
            mixdown_planar(
                &self.block_planar,
                self.config.channels,
                block_size,
                self.config.mixdown,
                &mut self.block_mono,
            );
            let refreshed = match &mut self.analyzer {
                BandAnalyzer::ConstantQ(analyzer) => {
                    analyzer.analyze(&self.block_mono, &mut self.table)
                }
                BandAnalyzer::PitchClass(analyzer) => {
                    analyzer.analyze(&self.block_mono, &mut self.table)
                }
            };
            produced |= refreshed;
        }

        if produced {
            ProcessorUpdate::Snapshot(&self.table)
        } else {
            ProcessorUpdate::None
        }
    }

    fn reset(&mut self) {
        self.fifo.clear();
        self.table.clear();
        match &mut self.analyzer {
            BandAnalyzer::ConstantQ(analyzer) => analyzer.reset(),
            BandAnalyzer::PitchClass(analyzer) => analyzer.reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 48_000.0;

    fn constant_q_config(min_frequency: f32, max_frequency: f32) -> ChromagramConfig {
        ChromagramConfig {
            sample_rate: SAMPLE_RATE,
            block_size: 1024,
            strategy: BandStrategy::ConstantQ {
                bands_per_octave: 12,
                min_frequency,
                max_frequency,
                gain: 15.0,
            },
            mixdown: ChannelMixdown::Sum,
            channels: 1,
        }
    }

    fn sine(frequency: f32, sample_rate: f32, count: usize) -> Vec<f32> {
        (0..count)
            .map(|n| (core::f32::consts::TAU * frequency * n as f32 / sample_rate).sin())
            .collect()
    }

    fn feed(processor: &mut ChromagramProcessor, samples: &[f32]) -> bool {
        let mut produced = false;
        for chunk in samples.chunks(512) {
            let block = AudioBlock::new(chunk, 1);
            if let ProcessorUpdate::Snapshot(_) = processor.process_block(&block) {
                produced = true;
            }
        }
        produced
    }

    #[test]
    fn rejects_invalid_configurations() {
        let zero_block = ChromagramConfig {
            block_size: 0,
            ..ChromagramConfig::default()
        };
        assert!(matches!(
            ChromagramProcessor::new(zero_block),
            Err(ConfigError::ZeroBlockSize)
        ));

        let inverted = constant_q_config(880.0, 440.0);
        assert!(matches!(
            ChromagramProcessor::new(inverted),
            Err(ConfigError::InvalidFrequencyRange { .. })
        ));

        let no_bands = ChromagramConfig {
            strategy: BandStrategy::ConstantQ {
                bands_per_octave: 0,
                min_frequency: 110.0,
                max_frequency: 880.0,
                gain: 15.0,
            },
            ..ChromagramConfig::default()
        };
        assert!(matches!(
            ChromagramProcessor::new(no_bands),
            Err(ConfigError::ZeroBandCount)
        ));
    }

    #[test]
    fn constant_q_sine_peaks_at_the_nearest_band() {
        let mut processor =
            ChromagramProcessor::new(constant_q_config(110.0, 1_760.0)).expect("valid config");

        assert!(feed(&mut processor, &sine(440.0, SAMPLE_RATE, 16 * 1024)));

        let table = processor.band_table();
        assert_eq!(table.len(), processor.band_count());
        let strongest = table
            .iter()
            .max_by(|a, b| a.magnitude.total_cmp(&b.magnitude))
            .expect("non-empty table");
        assert!(
            (strongest.frequency_hz / 440.0).log2().abs() < 1.0 / 24.0,
            "strongest band at {} Hz",
            strongest.frequency_hz
        );
        assert_eq!(strongest.note().expect("labelled band").format(), "A4");

        for entry in table {
            assert!(entry.magnitude.is_finite());
            assert!(entry.magnitude >= 0.0);
        }
    }

    #[test]
    fn constant_q_shaping_matches_the_raw_coefficient() {
        let mut processor =
            ChromagramProcessor::new(constant_q_config(220.0, 880.0)).expect("valid config");
        feed(&mut processor, &sine(440.0, SAMPLE_RATE, 8 * 1024));

        for entry in processor.band_table().clone() {
            let raw = processor
                .band_coefficient(entry.band)
                .expect("constant-q coefficient")
                .norm();
            let expected = if raw < 1.0 / 65536.0 {
                0.0
            } else {
                15.0 * raw.sqrt()
            };
            assert!((entry.magnitude - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn constant_q_omits_bands_without_full_support() {
        let mut processor =
            ChromagramProcessor::new(constant_q_config(110.0, 1_760.0)).expect("valid config");

        // A single block only covers the shortest (highest-frequency) bands.
        feed(&mut processor, &sine(440.0, SAMPLE_RATE, 1024));
        let early = processor.band_table().clone();
        assert!(!early.is_empty());
        assert!(early.len() < processor.band_count());
        for entry in &early {
            assert!(entry.frequency_hz > 700.0, "band {} too low", entry.frequency_hz);
        }

        // Once enough history has streamed in, every band reports.
        feed(&mut processor, &sine(440.0, SAMPLE_RATE, 8 * 1024));
        assert_eq!(processor.band_table().len(), processor.band_count());
    }

    #[test]
    fn band_ordering_is_stable_between_passes() {
        let mut processor =
            ChromagramProcessor::new(constant_q_config(220.0, 1_760.0)).expect("valid config");

        feed(&mut processor, &sine(330.0, SAMPLE_RATE, 8 * 1024));
        let first: Vec<usize> = processor.band_table().iter().map(|e| e.band).collect();
        feed(&mut processor, &sine(550.0, SAMPLE_RATE, 2 * 1024));
        let second: Vec<usize> = processor.band_table().iter().map(|e| e.band).collect();

        assert_eq!(first, second);
        assert!(first.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn band_positions_follow_the_octave_grid() {
        let processor =
            ChromagramProcessor::new(constant_q_config(110.0, 880.0)).expect("valid config");

        assert_eq!(processor.band_position(0), Some((0, 0)));
        assert_eq!(processor.band_position(13), Some((1, 1)));
        assert_eq!(processor.band_position(processor.band_count()), None);

        let low = processor.band_frequency(0).expect("first band");
        let octave_up = processor.band_frequency(12).expect("band one octave up");
        assert!((octave_up / low - 2.0).abs() < 1e-3);
    }

    #[test]
    fn pitch_class_gates_output_until_ready() {
        let config = ChromagramConfig {
            sample_rate: SAMPLE_RATE,
            strategy: BandStrategy::PitchClass,
            channels: 1,
            ..ChromagramConfig::default()
        };
        let mut processor = ChromagramProcessor::new(config).expect("valid config");

        // Well below the analysis interval: no table yet.
        assert!(!feed(&mut processor, &sine(261.63, SAMPLE_RATE, 4 * 1024)));
        assert!(!processor.is_ready());
        assert!(processor.band_table().is_empty());

        assert!(feed(&mut processor, &sine(261.63, SAMPLE_RATE, 32 * 1024)));
        assert!(processor.is_ready());

        let table = processor.band_table();
        assert_eq!(table.len(), 12);
        let strongest = table
            .iter()
            .max_by(|a, b| a.magnitude.total_cmp(&b.magnitude))
            .expect("twelve pitch classes");
        assert_eq!(strongest.band, 0, "expected pitch class C to dominate");
    }

    #[test]
    fn reset_clears_history_and_readiness() {
        let mut processor =
            ChromagramProcessor::new(constant_q_config(220.0, 880.0)).expect("valid config");
        feed(&mut processor, &sine(440.0, SAMPLE_RATE, 8 * 1024));
        assert!(processor.is_ready());

        processor.reset();
        assert!(!processor.is_ready());
        assert!(processor.band_table().is_empty());

        // A single block after reset reports only short-support bands again.
        feed(&mut processor, &sine(440.0, SAMPLE_RATE, 1024));
        assert!(processor.band_table().len() < processor.band_count());
    }
}
