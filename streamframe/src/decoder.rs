/*!
Stream decoder: byte-at-a-time resynchronizing frame extraction.

The decoder owns the pending byte buffer. Every [`StreamDecoder::feed`] call
appends the new bytes and then, while at least one frame's worth of bytes is
buffered:

1. checks the start marker at the buffer head,
2. checks the end marker after the payload (an empty end marker always matches),
3. on any mismatch drops exactly one head byte and counts it as an error,
4. otherwise decodes the payload and consumes the whole frame.

Bytes that do not yet form a complete frame stay buffered for the next call,
so between calls fewer than `frame_size` bytes are ever pending.
*/

use crate::data_type::Value;
use crate::rate::RateTracker;
use crate::scheme::FrameScheme;
use bytes::{Buf, BytesMut};
use serde::Serialize;
use tracing::{debug, warn};

/// Frames decoded by one call, transposed into per-channel columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedBatch {
    frames: usize,
    channels: Vec<Vec<Value>>,
}

impl DecodedBatch {
    /// Transpose frame-major values into channel-major columns
    pub fn from_frames(frames: Vec<Vec<Value>>, channel_count: usize) -> Self {
        let frame_count = frames.len();
        if frame_count == 0 || channel_count == 0 {
            return Self {
                frames: frame_count,
                channels: Vec::new(),
            };
        }

        let mut channels = vec![Vec::with_capacity(frame_count); channel_count];
        for frame in frames {
            for (column, value) in channels.iter_mut().zip(frame) {
                column.push(value);
            }
        }

        Self {
            frames: frame_count,
            channels,
        }
    }

    /// Number of frames decoded in this call
    pub fn frame_count(&self) -> usize {
        self.frames
    }

    /// Check if no frame was decoded
    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Channel-major columns; empty when no frame was decoded
    pub fn channels(&self) -> &[Vec<Value>] {
        &self.channels
    }

    /// Values of a single channel in arrival order
    pub fn channel(&self, index: usize) -> Option<&[Value]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Consume the batch, returning the channel-major columns
    pub fn into_channels(self) -> Vec<Vec<Value>> {
        self.channels
    }
}

/// Cumulative decoder counters since construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecoderStats {
    /// Frames decoded
    pub frames: u64,
    /// Bytes discarded while resynchronizing
    pub error_bytes: u64,
    /// Bytes handed to `feed`
    pub bytes_fed: u64,
}

/// Reactive frame decoder. Not thread safe; feed it from a single call site.
#[derive(Debug)]
pub struct StreamDecoder {
    scheme: FrameScheme,
    buffer: BytesMut,
    rates: RateTracker,
    stats: DecoderStats,
}

impl StreamDecoder {
    /// Create a decoder with an empty buffer
    pub fn new(scheme: FrameScheme) -> Self {
        Self {
            buffer: BytesMut::with_capacity(scheme.frame_size() * 64),
            scheme,
            rates: RateTracker::new(),
            stats: DecoderStats::default(),
        }
    }

    /// Active scheme
    pub fn scheme(&self) -> &FrameScheme {
        &self.scheme
    }

    /// Install a new scheme for all subsequent extraction.
    ///
    /// Pending bytes are kept and will be parsed under the new layout, which
    /// can misalign the first frames after the switch. Call [`clear`](Self::clear)
    /// first to start from a clean buffer.
    pub fn set_scheme(&mut self, scheme: FrameScheme) {
        if !self.buffer.is_empty() && scheme != self.scheme {
            warn!(
                "⚠️ Scheme replaced with {} bytes pending; they will be parsed under the new layout",
                self.buffer.len()
            );
        }
        debug!(
            "Frame scheme installed: {} ({} bytes per frame)",
            scheme.expected_pattern(),
            scheme.frame_size()
        );
        self.scheme = scheme;
    }

    /// Discard every pending byte
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Number of buffered bytes awaiting a complete frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Consume newly arrived bytes and return every frame they complete
    pub fn feed(&mut self, data: &[u8]) -> DecodedBatch {
        self.buffer.extend_from_slice(data);

        let scheme = &self.scheme;
        let frame_size = scheme.frame_size();
        if frame_size == 0 {
            // unreachable through FrameScheme::new; an empty frame never consumes bytes
            return DecodedBatch::default();
        }
        let mut frames = Vec::new();
        let mut errors = 0u64;

        while self.buffer.len() >= frame_size {
            let candidate = &self.buffer[..frame_size];
            if !scheme.start_matches(candidate) || !scheme.end_matches(candidate) {
                self.buffer.advance(1);
                errors += 1;
                continue;
            }

            let frame = self.buffer.split_to(frame_size);
            frames.push(scheme.decode_payload(&frame));
        }

        if errors > 0 {
            debug!(
                "Resynchronized: dropped {} bytes, decoded {} frames",
                errors,
                frames.len()
            );
        }

        let packets = frames.len() as u64;
        self.stats.frames += packets;
        self.stats.error_bytes += errors;
        self.stats.bytes_fed += data.len() as u64;
        self.rates.tick(packets, errors);

        DecodedBatch::from_frames(frames, scheme.channels())
    }

    /// Smoothed frames per second
    pub fn packet_rate(&self) -> f64 {
        self.rates.packet_rate()
    }

    /// Smoothed discarded bytes per second, in frame-equivalents
    pub fn error_rate(&self) -> f64 {
        self.rates.error_rate(self.scheme.frame_size())
    }

    /// Underlying rate tracker
    pub fn rates(&self) -> &RateTracker {
        &self.rates
    }

    /// Cumulative counters
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new(FrameScheme::default())
    }
}
