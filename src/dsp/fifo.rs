//! Fixed-capacity multi-channel sample queue feeding the analysis engines.

use tracing::warn;

/// Outcome of a [`SampleFifo::pull`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// The requested samples were copied into the destination.
    Filled,
    /// Fewer samples than requested are buffered; nothing was copied or
    /// consumed. Retry once more audio has arrived.
    NotReady,
}

/// Single-producer/single-consumer circular sample queue with planar
/// per-channel storage.
///
/// All storage is allocated once at construction; `push_interleaved` and
/// `pull` only copy. Writing more frames than [`SampleFifo::free_space`]
/// allows is a caller contract violation: the excess is dropped, never
/// written over unread data.
#[derive(Debug, Clone)]
pub struct SampleFifo {
    /// `channels` contiguous regions of `capacity` samples each.
    data: Box<[f32]>,
    channels: usize,
    capacity: usize,
    read_pos: usize,
    ready: usize,
}

impl SampleFifo {
    pub fn new(channels: usize, capacity: usize) -> Self {
        assert!(channels > 0, "SampleFifo needs at least one channel");
        assert!(capacity > 0, "SampleFifo capacity must be greater than zero");
        Self {
            data: vec![0.0; channels * capacity].into_boxed_slice(),
            channels,
            capacity,
            read_pos: 0,
            ready: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of frames currently buffered and ready to pull.
    #[inline]
    pub fn available(&self) -> usize {
        self.ready
    }

    #[inline]
    pub fn free_space(&self) -> usize {
        self.capacity - self.ready
    }

    /// Copy interleaved samples into the queue, deinterleaving into one
    /// planar region per channel.
    pub fn push_interleaved(&mut self, samples: &[f32], channels: usize) {
        if samples.is_empty() {
            return;
        }
        if channels != self.channels {
            debug_assert!(
                false,
                "pushed {channels} channels into a {}-channel fifo",
                self.channels
            );
            warn!(
                "[fifo] channel count mismatch ({channels} != {}); block dropped",
                self.channels
            );
            return;
        }

        let frames = samples.len() / channels;
        let free = self.free_space();
        let writable = frames.min(free);
        if writable < frames {
            debug_assert!(
                false,
                "push of {frames} frames exceeds free space of {free} frames"
            );
            warn!("[fifo] push of {frames} frames exceeds free space {free}; excess dropped");
        }

        let write_pos = (self.read_pos + self.ready) % self.capacity;
        let first = writable.min(self.capacity - write_pos);
        let second = writable - first;
        for ch in 0..self.channels {
            let region = &mut self.data[ch * self.capacity..(ch + 1) * self.capacity];
            for (i, slot) in region[write_pos..write_pos + first].iter_mut().enumerate() {
                *slot = samples[i * channels + ch];
            }
            for (i, slot) in region[..second].iter_mut().enumerate() {
                *slot = samples[(first + i) * channels + ch];
            }
        }
        self.ready += writable;
    }

    /// Copy `frames` samples per channel into `dest` (channel-major planar
    /// layout: `dest[ch * frames..(ch + 1) * frames]`) and advance the read
    /// cursor. Leaves the queue untouched when not enough data is ready.
    pub fn pull(&mut self, dest: &mut [f32], frames: usize) -> PullOutcome {
        if frames > self.ready {
            return PullOutcome::NotReady;
        }
        debug_assert!(dest.len() >= frames * self.channels);

        let first = frames.min(self.capacity - self.read_pos);
        let second = frames - first;
        for ch in 0..self.channels {
            let region = &self.data[ch * self.capacity..(ch + 1) * self.capacity];
            let lane = &mut dest[ch * frames..(ch + 1) * frames];
            lane[..first].copy_from_slice(&region[self.read_pos..self.read_pos + first]);
            lane[first..].copy_from_slice(&region[..second]);
        }
        self.read_pos = (self.read_pos + frames) % self.capacity;
        self.ready -= frames;
        PullOutcome::Filled
    }

    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.ready = 0;
    }
}
