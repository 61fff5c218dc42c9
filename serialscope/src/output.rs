/*!
Output sinks for decoded batches.

Batches are scaled and reduced to the active channels before they reach a
sink. The live sink prints one JSON object per batch; the recorder appends
one JSON line per frame to a file in a timestamped session directory.
*/

use crate::config::ScalingConfig;
use anyhow::{Context, Result};
use chrono::Local;
use serde_json::{json, Map, Value as JsonValue};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use streamframe::DecodedBatch;
use tracing::info;

/// File name of the per-session recording
pub const RECORDING_FILE: &str = "samples.jsonl";

/// A decoded batch after scaling and channel selection
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledBatch {
    frames: usize,
    channels: Vec<(usize, Vec<f64>)>,
}

impl ScaledBatch {
    pub fn new(batch: &DecodedBatch, active: &[usize], scaling: &ScalingConfig) -> Self {
        let channels = active
            .iter()
            .filter_map(|&index| {
                batch.channel(index).map(|column| {
                    let values = column.iter().map(|v| scaling.apply(v.as_f64())).collect();
                    (index, values)
                })
            })
            .collect();

        Self {
            frames: batch.frame_count(),
            channels,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames
    }

    /// (channel index, values) pairs in active-channel order
    pub fn channels(&self) -> &[(usize, Vec<f64>)] {
        &self.channels
    }

    /// Values of frame `index` across the selected channels
    pub fn frame(&self, index: usize) -> Vec<f64> {
        self.channels
            .iter()
            .filter_map(|(_, column)| column.get(index).copied())
            .collect()
    }

    /// `{"frames": n, "channels": {"0": [...], ...}}`
    pub fn to_json(&self) -> JsonValue {
        let mut channels = Map::new();
        for (index, values) in &self.channels {
            channels.insert(index.to_string(), json!(values));
        }
        json!({
            "frames": self.frames,
            "channels": channels,
        })
    }
}

/// Prints one JSON object per batch
pub struct LiveOutput<W: Write> {
    writer: W,
}

impl LiveOutput<std::io::Stdout> {
    pub fn stdout_writer() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> LiveOutput<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_batch(&mut self, batch: &ScaledBatch) -> Result<()> {
        serde_json::to_writer(&mut self.writer, &batch.to_json())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Appends decoded frames to `<dir>/<YYYYmmdd_HHMMSS>/samples.jsonl`
pub struct Recorder {
    path: PathBuf,
    writer: BufWriter<File>,
    frames_written: u64,
}

impl Recorder {
    /// Create a timestamped session directory under `record_dir`
    pub fn create<P: AsRef<Path>>(record_dir: P) -> Result<Self> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let session_dir = record_dir.as_ref().join(timestamp);
        std::fs::create_dir_all(&session_dir)
            .with_context(|| format!("Failed to create {}", session_dir.display()))?;

        let path = session_dir.join(RECORDING_FILE);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        info!("📁 Recording decoded frames to {}", path.display());

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            frames_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn write_batch(&mut self, batch: &ScaledBatch) -> Result<()> {
        let t = Local::now().timestamp_millis();
        for index in 0..batch.frame_count() {
            let line = json!({ "t": t, "values": batch.frame(index) });
            serde_json::to_writer(&mut self.writer, &line)?;
            self.writer.write_all(b"\n")?;
            self.frames_written += 1;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
