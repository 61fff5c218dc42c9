/*!
Synthetic frame generator for bench-testing without hardware.

Frames use the configured wire layout. Channel `c` of sample `i` carries
`-i`, `i` or a triangle wave (amplitude 32) depending on `c % 3`, and `i`
wraps every `period` samples.
*/

use crate::config::GeneratorConfig;
use anyhow::Result;
use std::io::{ErrorKind, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use streamframe::FrameScheme;
use tracing::{info, warn};

/// Byte inserted ahead of a frame when corruption is enabled
pub const GARBAGE_BYTE: u8 = 0x00;

/// Triangle wave amplitude
pub const TRIANGLE_AMPLITUDE: f64 = 32.0;

/// Upper bound on frames reserved up front by `next_chunk`
const PREALLOC_FRAMES: u64 = 4096;

/// Interval between emission ticks
pub const TICK: Duration = Duration::from_millis(10);

/// Deterministic frame source
#[derive(Debug, Clone)]
pub struct SyntheticGenerator {
    scheme: FrameScheme,
    period: u64,
    corrupt_every: u64,
    index: u64,
    frames_generated: u64,
}

impl SyntheticGenerator {
    pub fn new(scheme: FrameScheme, config: &GeneratorConfig) -> Self {
        Self {
            scheme,
            period: config.period.max(1),
            corrupt_every: config.corrupt_every,
            index: 0,
            frames_generated: 0,
        }
    }

    /// Frames produced so far
    pub fn frames_generated(&self) -> u64 {
        self.frames_generated
    }

    /// Value of `channel` for the current sample index
    pub fn sample(&self, channel: usize) -> f64 {
        let i = self.index as f64;
        match channel % 3 {
            0 => -i,
            1 => i,
            _ => {
                let phase = (self.index % self.period) as f64 / self.period as f64;
                TRIANGLE_AMPLITUDE * (1.0 - 4.0 * (phase - 0.5).abs())
            }
        }
    }

    /// Encode the next frame, prefixed with a garbage byte when corruption is due
    pub fn next_frame(&mut self) -> Result<Vec<u8>> {
        let values: Vec<f64> = (0..self.scheme.channels()).map(|c| self.sample(c)).collect();
        let frame = self.scheme.encode_lossy(&values)?;

        self.frames_generated += 1;
        self.index = (self.index + 1) % self.period;

        if self.corrupt_every > 0 && self.frames_generated % self.corrupt_every == 0 {
            let mut corrupted = Vec::with_capacity(frame.len() + 1);
            corrupted.push(GARBAGE_BYTE);
            corrupted.extend_from_slice(&frame);
            return Ok(corrupted);
        }

        Ok(frame)
    }

    /// Encode `count` consecutive frames into one buffer
    pub fn next_chunk(&mut self, count: u64) -> Result<Vec<u8>> {
        let reserved = usize::try_from(count.min(PREALLOC_FRAMES)).unwrap_or(0);
        let capacity = reserved * (self.scheme.frame_size() + 1);
        let mut chunk = Vec::with_capacity(capacity);
        for _ in 0..count {
            chunk.extend(self.next_frame()?);
        }
        Ok(chunk)
    }
}

/// Converts elapsed wall time into a number of frames owed at a fixed rate
#[derive(Debug, Clone)]
pub struct Pacer {
    rate_hz: f64,
    started: Instant,
    emitted: u64,
}

impl Pacer {
    pub fn new(rate_hz: f64, started: Instant) -> Self {
        Self {
            rate_hz: rate_hz.max(0.0),
            started,
            emitted: 0,
        }
    }

    /// Frames due at `now` that have not been emitted yet; marks them emitted
    pub fn due(&mut self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        let target = (elapsed * self.rate_hz).floor() as u64;
        let due = target.saturating_sub(self.emitted);
        self.emitted += due;
        due
    }
}

/// Stream generated frames into `writer` until `count` frames were written,
/// the reader goes away, or `running` is cleared. Returns frames written.
pub fn run_to_writer<W: Write>(
    mut generator: SyntheticGenerator,
    mut writer: W,
    rate_hz: f64,
    count: Option<u64>,
    running: Arc<AtomicBool>,
) -> Result<u64> {
    info!(
        "🧪 Generating {} frames/s ({} bytes per frame)",
        rate_hz,
        generator.scheme.frame_size()
    );

    let mut pacer = Pacer::new(rate_hz, Instant::now());
    let mut written = 0u64;

    while running.load(Ordering::SeqCst) {
        let mut due = pacer.due(Instant::now());
        if let Some(limit) = count {
            due = due.min(limit - written);
        }

        if due > 0 {
            let chunk = generator.next_chunk(due)?;
            match writer.write_all(&chunk).and_then(|_| writer.flush()) {
                Ok(()) => written += due,
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    warn!("Reader closed the stream after {} frames", written);
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if count.is_some_and(|limit| written >= limit) {
            break;
        }

        thread::sleep(TICK);
    }

    info!("🧪 Generator stopped after {} frames", written);
    Ok(written)
}
