//! Shared audio helpers.

pub mod musical;

use serde::{Deserialize, Serialize};

/// Default sample rate (Hz) used throughout the analysis pipeline.
pub const DEFAULT_SAMPLE_RATE: f32 = 48_000.0;

/// Policy applied when collapsing a multi-channel hop to mono.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMixdown {
    /// Channels are added together; the straightforward streaming path.
    Sum,
    /// The channel sum is divided by the channel count.
    Average,
}

/// Collapse planar channel lanes (`src[ch * frames..(ch + 1) * frames]`)
/// into `dest[..frames]` according to `policy`.
pub fn mixdown_planar(
    src: &[f32],
    channels: usize,
    frames: usize,
    policy: ChannelMixdown,
    dest: &mut [f32],
) {
    debug_assert!(src.len() >= channels * frames);
    debug_assert!(dest.len() >= frames);
    if channels == 0 || frames == 0 {
        return;
    }

    dest[..frames].copy_from_slice(&src[..frames]);
    for ch in 1..channels {
        let lane = &src[ch * frames..(ch + 1) * frames];
        for (acc, &sample) in dest[..frames].iter_mut().zip(lane) {
            *acc += sample;
        }
    }

    if policy == ChannelMixdown::Average && channels > 1 {
        let inv = 1.0 / channels as f32;
        for value in dest[..frames].iter_mut() {
            *value *= inv;
        }
    }
}

/// Subtract the mean so the transform's DC bin reflects signal, not offset.
pub fn remove_dc(buffer: &mut [f32]) {
    if buffer.is_empty() {
        return;
    }

    let mean = buffer.iter().sum::<f32>() / buffer.len() as f32;
    if mean.abs() <= f32::EPSILON {
        return;
    }

    for sample in buffer.iter_mut() {
        *sample -= mean;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_mixdown_adds_channel_lanes() {
        let src = [1.0, 2.0, 3.0, 0.5, 0.5, 0.5];
        let mut dest = [0.0; 3];
        mixdown_planar(&src, 2, 3, ChannelMixdown::Sum, &mut dest);
        assert_eq!(dest, [1.5, 2.5, 3.5]);
    }

    #[test]
    fn average_mixdown_divides_by_channel_count() {
        let src = [1.0, 2.0, 3.0, 4.0];
        let mut dest = [0.0; 2];
        mixdown_planar(&src, 2, 2, ChannelMixdown::Average, &mut dest);
        assert_eq!(dest, [2.0, 3.0]);
    }

    #[test]
    fn remove_dc_zeroes_the_mean() {
        let mut buffer = [1.0, 2.0, 3.0, 4.0];
        remove_dc(&mut buffer);
        let mean: f32 = buffer.iter().sum::<f32>() / buffer.len() as f32;
        assert!(mean.abs() < 1e-6);
    }
}
