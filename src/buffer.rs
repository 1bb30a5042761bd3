//! Stereo sample type and the lock-free mic relay

use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};

/// Stereo audio sample
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StereoSample {
    pub left: f32,
    pub right: f32,
}

impl StereoSample {
    pub fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }

    pub fn mono(value: f32) -> Self {
        Self { left: value, right: value }
    }

    pub fn silence() -> Self {
        Self::default()
    }
}

/// SPSC ring buffer carrying live microphone frames from the mic input
/// callback to the cable output callback.
///
/// Synchronization is the ring buffer's own atomic cursors: the writer
/// half lives on the mic callback thread, the reader half on the cable
/// callback thread, and neither ever takes a lock.
pub struct MicRelay;

impl MicRelay {
    /// Create a relay with the given capacity in frames, split into its
    /// writer and reader halves.
    pub fn with_capacity(frames: usize) -> (MicWriter, MicReader) {
        let rb = HeapRb::new(frames);
        let (producer, consumer) = rb.split();
        (
            MicWriter { inner: producer },
            MicReader { inner: consumer, capacity: frames },
        )
    }
}

/// Writer half - owned by the microphone input callback
pub struct MicWriter {
    inner: HeapProd<StereoSample>,
}

impl MicWriter {
    /// Write a block of frames, returning how many fit. A full ring
    /// drops the excess: the writer can never overwrite frames the
    /// reader has not consumed yet.
    pub fn write(&mut self, frames: &[StereoSample]) -> usize {
        self.inner.push_slice(frames)
    }

    /// Free space in frames
    pub fn vacant(&self) -> usize {
        self.inner.vacant_len()
    }
}

/// Reader half - owned by the cable output callback
pub struct MicReader {
    inner: HeapCons<StereoSample>,
    capacity: usize,
}

impl MicReader {
    /// Fill `out` with the freshest available frames, zero-padding any
    /// shortfall. Returns the number of real frames copied.
    ///
    /// If the backlog exceeds half the ring, the reader has fallen too
    /// far behind to sound live; the stale excess is skipped so at most
    /// one block separates the reader from the writer. Latency is
    /// costlier than a dropped frame here.
    pub fn read_fresh(&mut self, out: &mut [StereoSample]) -> usize {
        let available = self.inner.occupied_len();
        if available > self.capacity / 2 {
            // Runs on the cable callback thread: no logging here
            let keep = out.len().min(available);
            self.inner.skip(available - keep);
        }

        let n = self.inner.pop_slice(out);
        for frame in &mut out[n..] {
            *frame = StereoSample::silence();
        }
        n
    }

    /// Frames currently buffered
    pub fn occupied(&self) -> usize {
        self.inner.occupied_len()
    }

    /// Ring capacity in frames
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
