//! Integration of the analysis engines behind the push/pull boundary.
//!
//! The pipeline is the only object shared across the two execution contexts.
//! The producer calls [`AnalysisPipeline::push_audio`] from the audio
//! callback; consumers pull the latest snapshots at their own cadence. Engine
//! state is locked only from the producer side; the snapshot cells are the
//! sole crossing point, and each is held just long enough to copy.

use crate::dsp::chromagram::{BandTable, ChromagramConfig, ChromagramProcessor, ConfigError};
use crate::dsp::spectrogram::{SpectralSnapshot, SpectrogramConfig, SpectrogramProcessor};
use crate::dsp::{AudioBlock, AudioProcessor, ProcessorUpdate};
use crate::snapshot::SnapshotCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Handler invoked from the producer context after fresh output is published.
pub type DataReadyCallback = Arc<dyn Fn() + Send + Sync>;

/// Construction-time configuration for the whole pipeline.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub spectrogram: SpectrogramConfig,
    pub chromagram: ChromagramConfig,
}

pub struct AnalysisPipeline {
    spectrogram: Mutex<SpectrogramProcessor>,
    chromagram: Mutex<ChromagramProcessor>,
    spectral_cell: SnapshotCell<SpectralSnapshot>,
    band_cell: SnapshotCell<BandTable>,
    on_data_ready: Mutex<Option<DataReadyCallback>>,
    bins: usize,
}

impl AnalysisPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        let spectrogram = SpectrogramProcessor::new(config.spectrogram);
        let chromagram = ChromagramProcessor::new(config.chromagram)?;
        let bins = spectrogram.config().bins();
        debug!(
            "[pipeline] bins={bins} bands={}",
            chromagram.band_count()
        );

        Ok(Self {
            spectral_cell: SnapshotCell::new(spectrogram.snapshot().clone()),
            band_cell: SnapshotCell::new(BandTable::new()),
            spectrogram: Mutex::new(spectrogram),
            chromagram: Mutex::new(chromagram),
            on_data_ready: Mutex::new(None),
            bins,
        })
    }

    /// Register the notification handler. It runs inline on the producer
    /// context after each publish and must defer long-running work to the
    /// consumer side; it is a hint that fresh data exists, and consumers may
    /// coalesce.
    pub fn set_on_data_ready(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.on_data_ready.lock() = Some(Arc::new(callback));
    }

    /// Producer entry point: feed a block of interleaved samples. Block
    /// sizes may vary freely between calls.
    pub fn push_audio(&self, samples: &[f32], channels: usize) {
        let block = AudioBlock::new(samples, channels);
        let mut fresh = false;

        {
            let mut engine = self.spectrogram.lock();
            if let ProcessorUpdate::Snapshot(snapshot) = engine.process_block(&block) {
                self.spectral_cell.publish(snapshot);
                fresh = true;
            }
        }
        {
            let mut engine = self.chromagram.lock();
            if let ProcessorUpdate::Snapshot(table) = engine.process_block(&block) {
                self.band_cell.publish(table);
                fresh = true;
            }
        }

        if fresh {
            let callback = self.on_data_ready.lock().clone();
            if let Some(callback) = callback {
                callback();
            }
        }
    }

    /// Number of frequency bins in the published spectral frame
    /// (`fft_size / 2`).
    pub fn spectral_bins(&self) -> usize {
        self.bins
    }

    /// Copy the latest magnitude frame into `dest`, which must be pre-sized
    /// to [`AnalysisPipeline::spectral_bins`].
    pub fn latest_spectral_frame(&self, dest: &mut [f32]) {
        self.spectral_cell.read(|snapshot| {
            debug_assert_eq!(dest.len(), snapshot.magnitudes_db.len());
            let len = dest.len().min(snapshot.magnitudes_db.len());
            dest[..len].copy_from_slice(&snapshot.magnitudes_db[..len]);
        });
    }

    /// Copy the latest peak-hold trace into `dest`, sized like the frame.
    pub fn latest_peak_hold(&self, dest: &mut [f32]) {
        self.spectral_cell.read(|snapshot| {
            debug_assert_eq!(dest.len(), snapshot.peaks_db.len());
            let len = dest.len().min(snapshot.peaks_db.len());
            dest[..len].copy_from_slice(&snapshot.peaks_db[..len]);
        });
    }

    /// Clone the latest band table out.
    pub fn latest_band_table(&self) -> BandTable {
        self.band_cell.snapshot()
    }

    /// Copy the latest band table into caller storage, reusing its capacity.
    pub fn read_band_table_into(&self, dest: &mut BandTable) {
        self.band_cell.read_into(dest);
    }

    /// Drop all accumulated history; published snapshots return to their
    /// initial floor state.
    pub fn reset(&self) {
        let mut spectrogram = self.spectrogram.lock();
        spectrogram.reset();
        self.spectral_cell.publish(spectrogram.snapshot());
        drop(spectrogram);

        let mut chromagram = self.chromagram.lock();
        chromagram.reset();
        self.band_cell.publish(chromagram.band_table());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::chromagram::BandStrategy;
    use crate::dsp::spectrogram::DB_FLOOR;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SAMPLE_RATE: f32 = 48_000.0;

    fn test_config(fft_size: usize, hop_size: usize) -> PipelineConfig {
        PipelineConfig {
            spectrogram: SpectrogramConfig {
                sample_rate: SAMPLE_RATE,
                fft_size,
                hop_size,
                channels: 1,
                ..SpectrogramConfig::default()
            },
            chromagram: ChromagramConfig {
                sample_rate: SAMPLE_RATE,
                channels: 1,
                strategy: BandStrategy::ConstantQ {
                    bands_per_octave: 12,
                    min_frequency: 220.0,
                    max_frequency: 1_760.0,
                    gain: 15.0,
                },
                ..ChromagramConfig::default()
            },
        }
    }

    fn push_chunked(pipeline: &AnalysisPipeline, samples: &[f32]) {
        // Irregular block sizes, as an audio callback would deliver them.
        let sizes = [160usize, 96, 224, 192];
        let mut offset = 0;
        let mut index = 0;
        while offset < samples.len() {
            let len = sizes[index % sizes.len()].min(samples.len() - offset);
            pipeline.push_audio(&samples[offset..offset + len], 1);
            offset += len;
            index += 1;
        }
    }

    fn sine(frequency: f32, count: usize) -> Vec<f32> {
        (0..count)
            .map(|n| (core::f32::consts::TAU * frequency * n as f32 / SAMPLE_RATE).sin())
            .collect()
    }

    #[test]
    fn silent_input_reads_back_the_clamp_floor() {
        let pipeline = AnalysisPipeline::new(test_config(2048, 128)).expect("valid config");
        push_chunked(&pipeline, &vec![0.0; 2048 + 128]);

        let mut frame = vec![0.0; pipeline.spectral_bins()];
        pipeline.latest_spectral_frame(&mut frame);
        assert_eq!(frame.len(), 1024);
        for &value in &frame {
            assert!((value - DB_FLOOR).abs() < 1e-3);
        }
    }

    #[test]
    fn tone_reaches_both_consumer_surfaces() {
        let fft_size = 512;
        let bin = 12;
        let frequency = bin as f32 * SAMPLE_RATE / fft_size as f32; // 1125 Hz
        let pipeline = AnalysisPipeline::new(test_config(fft_size, 32)).expect("valid config");

        push_chunked(&pipeline, &sine(frequency, 16 * 1024));

        let mut frame = vec![0.0; pipeline.spectral_bins()];
        pipeline.latest_spectral_frame(&mut frame);
        let loudest = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, _)| idx)
            .expect("non-empty frame");
        assert_eq!(loudest, bin);

        let mut peaks = vec![0.0; pipeline.spectral_bins()];
        pipeline.latest_peak_hold(&mut peaks);
        assert!(peaks[bin] >= frame[bin] - 1e-4);

        let table = pipeline.latest_band_table();
        assert!(!table.is_empty());
        let strongest = table
            .iter()
            .max_by(|a, b| a.magnitude.total_cmp(&b.magnitude))
            .expect("non-empty table");
        assert!(
            (strongest.frequency_hz / frequency).log2().abs() < 1.0 / 12.0,
            "strongest band at {} Hz for a {frequency} Hz tone",
            strongest.frequency_hz
        );
    }

    #[test]
    fn notification_fires_once_per_push_with_fresh_data() {
        let pipeline = AnalysisPipeline::new(test_config(256, 32)).expect("valid config");
        let notified = Arc::new(AtomicUsize::new(0));
        {
            let notified = Arc::clone(&notified);
            pipeline.set_on_data_ready(move || {
                notified.fetch_add(1, Ordering::Relaxed);
            });
        }

        // Accumulation only: no notification.
        pipeline.push_audio(&vec![0.0; 256], 1);
        assert_eq!(notified.load(Ordering::Relaxed), 0);

        // One hop completes exactly one analysis pass.
        pipeline.push_audio(&vec![0.0; 32], 1);
        assert_eq!(notified.load(Ordering::Relaxed), 1);

        // Several hops in one push still notify at most once.
        pipeline.push_audio(&vec![0.0; 128], 1);
        assert_eq!(notified.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn consumers_see_the_last_snapshot_while_the_producer_stalls() {
        let pipeline = AnalysisPipeline::new(test_config(256, 32)).expect("valid config");
        push_chunked(&pipeline, &sine(3_000.0, 1024));

        let mut first = vec![0.0; pipeline.spectral_bins()];
        pipeline.latest_spectral_frame(&mut first);

        // No new audio: repeated reads observe the identical frame.
        let mut second = vec![0.0; pipeline.spectral_bins()];
        pipeline.latest_spectral_frame(&mut second);
        assert_eq!(first, second);
    }

    #[test]
    fn reset_restores_the_floor_state() {
        let pipeline = AnalysisPipeline::new(test_config(256, 32)).expect("valid config");
        push_chunked(&pipeline, &sine(1_000.0, 4096));
        pipeline.reset();

        let mut frame = vec![0.0; pipeline.spectral_bins()];
        pipeline.latest_spectral_frame(&mut frame);
        assert!(frame.iter().all(|&v| (v - DB_FLOOR).abs() < 1e-3));
        assert!(pipeline.latest_band_table().is_empty());
    }
}
