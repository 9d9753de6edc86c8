//! Streaming spectral analysis for real-time audio visualization.
//!
//! The crate ingests interleaved sample blocks of arbitrary size, as produced
//! by an audio callback, and incrementally derives two representations suited
//! for on-screen display: a hop-synchronized log-magnitude spectrum with a
//! decaying peak-hold trace, and a pitch-aligned per-band magnitude table
//! (chromagram). Rendering is a host concern; the library only exposes the
//! latest computed snapshots plus a data-ready notification.
//!
//! The producer path ([`AnalysisPipeline::push_audio`]) performs bounded work
//! and never allocates after construction. Consumers read the most recent
//! snapshot at their own cadence through copy-under-lock accessors.

pub mod dsp;
pub mod pipeline;
pub mod snapshot;
pub mod util;

pub use dsp::chromagram::{
    BandEntry, BandStrategy, BandTable, ChromagramConfig, ChromagramProcessor, ConfigError,
};
pub use dsp::spectrogram::{SpectralSnapshot, SpectrogramConfig, SpectrogramProcessor};
pub use dsp::window::WindowKind;
pub use dsp::{AudioBlock, AudioProcessor, ProcessorUpdate, Reconfigurable};
pub use pipeline::{AnalysisPipeline, PipelineConfig};
pub use util::ChannelMixdown;
