/*!
# Stream Framing

Decoding of fixed-shape, multi-channel numeric samples from a raw byte stream
(typically a serial link) where each sample is bracketed by configurable
marker bytes.

## Core Types

- [`DataType`] - Fixed-width numeric type catalog
- [`FrameScheme`] - Immutable wire layout (markers, channels, type, endianness)
- [`StreamDecoder`] - Resynchronizing decoder with a persistent byte buffer
- [`RateTracker`] - Smoothed packets/s and errors/s

## Modules

- [`data_type`] - Type catalog and decoded values
- [`scheme`] - Frame layout, encoding and diagnostics
- [`decoder`] - Byte stream to channel batches
- [`rate`] - Rate smoothing
- [`error`] - Common error types
*/

pub mod data_type;
pub mod decoder;
pub mod error;
pub mod rate;
pub mod scheme;

// Re-export commonly used types
pub use data_type::{DataType, Endianness, Value};
pub use decoder::{DecodedBatch, DecoderStats, StreamDecoder};
pub use error::{Result, StreamError};
pub use rate::RateTracker;
pub use scheme::FrameScheme;

/// Version information for the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    use std::time::Duration;

    /// Start marker of the reference layout
    pub const DEFAULT_START_MARKER: [u8; 2] = [0xAA, 0xBB];

    /// Channel count of the reference layout
    pub const DEFAULT_CHANNELS: usize = 3;

    /// Minimum window before the rates are recomputed
    pub const RATE_WINDOW: Duration = Duration::from_secs(1);

    /// Weight of the latest window's measurement
    pub const RATE_GAIN: f64 = 0.7;

    /// Weight of the previous smoothed rate
    pub const RATE_RETAIN: f64 = 0.3;
}
