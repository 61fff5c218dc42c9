/*!
Configuration management for the serial scope application.
*/

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use streamframe::{DataType, Endianness, FrameScheme};
use tracing::{info, warn};

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub parser: ParserConfig,
    pub channels: ChannelConfig,
    pub scaling: ScalingConfig,
    pub output: OutputConfig,
    pub generator: GeneratorConfig,
}

impl AppConfig {
    /// Create a new configuration with default values.
    ///
    /// Every call builds an independent value, so this doubles as
    /// "restore defaults".
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;
        config.validate()?;

        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let config = Self::load_from_file(path)?;
            info!("📝 Loaded configuration from {}", path.display());
            Ok(config)
        } else {
            info!("📝 No config at {}, using defaults", path.display());
            Ok(Self::new())
        }
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        self.generator.validate()
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }
}

/// Where raw bytes come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Device node, pty, regular file, or `-` for stdin
    #[default]
    File,
    /// UDP datagrams from a serial-over-network bridge
    Udp,
    /// In-process synthetic generator
    Synthetic,
}

/// Byte source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,

    /// Path read by the `file` source
    pub path: String,

    /// UDP bind address
    pub udp_bind_addr: String,

    /// UDP port to listen on
    pub udp_port: u16,

    /// Maximum bytes per read
    pub read_chunk_size: usize,

    /// Chunks buffered between the source and the decoder before dropping
    pub queue_capacity: usize,

    /// Decoder poll interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::File,
            path: "/dev/ttyUSB0".to_string(),
            udp_bind_addr: "0.0.0.0".to_string(),
            udp_port: 12345,
            read_chunk_size: 4096,
            queue_capacity: 1024,
            poll_interval_ms: 16,
        }
    }
}

/// Frame layout as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Start marker as hex, e.g. "AA BB"
    pub start_marker: String,

    /// End marker as hex, empty for none
    pub end_marker: String,

    /// Values per frame
    pub channels: usize,

    pub data_type: DataType,

    pub endianness: Endianness,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            start_marker: "AA BB".to_string(),
            end_marker: String::new(),
            channels: 3,
            data_type: DataType::Int32,
            endianness: Endianness::Little,
        }
    }
}

impl ParserConfig {
    /// Parse the markers and build a validated frame scheme
    pub fn to_scheme(&self) -> Result<FrameScheme> {
        let start = parse_hex_bytes(&self.start_marker)
            .with_context(|| format!("Invalid start_marker '{}'", self.start_marker))?;
        let end = parse_hex_bytes(&self.end_marker)
            .with_context(|| format!("Invalid end_marker '{}'", self.end_marker))?;

        let scheme = FrameScheme::new(start, end, self.channels, self.data_type, self.endianness)?;
        Ok(scheme)
    }
}

/// Parse a hex byte string, ignoring whitespace ("AA BB", "aabb", "")
pub fn parse_hex_bytes(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(&compact)?;
    Ok(bytes)
}

/// Channel selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Channel indices to emit; all channels when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<Vec<usize>>,
}

impl ChannelConfig {
    /// Active channel indices that exist in a frame of `channels` values
    pub fn resolve(&self, channels: usize) -> Vec<usize> {
        match &self.active {
            None => (0..channels).collect(),
            Some(active) => {
                let mut selected = Vec::with_capacity(active.len());
                for &channel in active {
                    if channel >= channels {
                        warn!("⚠️ Ignoring active channel {} (frame has {} channels)", channel, channels);
                    } else if !selected.contains(&channel) {
                        selected.push(channel);
                    }
                }
                selected
            }
        }
    }
}

/// Linear transform applied to emitted values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    pub multiplier: f64,
    pub offset: f64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            multiplier: 1.0,
            offset: 0.0,
        }
    }
}

impl ScalingConfig {
    pub fn apply(&self, value: f64) -> f64 {
        value * self.multiplier + self.offset
    }
}

/// Output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Print decoded batches to stdout as JSON lines
    pub live: bool,

    /// Record decoded frames under a timestamped session directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_dir: Option<String>,

    /// Statistics reporting interval in seconds
    pub stats_interval_seconds: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            live: true,
            record_dir: None,
            stats_interval_seconds: 1,
        }
    }
}

/// Synthetic generator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Frames per second
    pub rate_hz: f64,

    /// Insert one garbage byte before every Nth frame; 0 disables
    pub corrupt_every: u64,

    /// Samples before the pattern repeats
    pub period: u64,
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.rate_hz.is_finite() || self.rate_hz <= 0.0 {
            bail!("generator.rate_hz must be a positive finite number, got {}", self.rate_hz);
        }
        Ok(())
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            rate_hz: 10_000.0,
            corrupt_every: 0,
            period: 2000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_roundtrip() {
        let mut original_config = AppConfig::new();
        original_config.channels.active = Some(vec![0, 2]);
        original_config.output.record_dir = Some("./captures".to_string());
        original_config.parser.end_marker = "0D 0A".to_string();

        let temp_file = NamedTempFile::new().unwrap();
        let temp_path = temp_file.path();

        // Save and load
        original_config.save_to_file(temp_path).unwrap();
        let loaded_config = AppConfig::load_from_file(temp_path).unwrap();

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn test_default_values() {
        let config = AppConfig::new();

        assert_eq!(config.source.kind, SourceKind::File);
        assert_eq!(config.source.poll_interval_ms, 16);
        assert_eq!(config.parser.start_marker, "AA BB");
        assert!(config.parser.end_marker.is_empty());
        assert_eq!(config.parser.channels, 3);
        assert_eq!(config.parser.data_type, DataType::Int32);
        assert_eq!(config.parser.endianness, Endianness::Little);
        assert!(config.channels.active.is_none());
        assert_eq!(config.scaling, ScalingConfig { multiplier: 1.0, offset: 0.0 });
        assert!(config.output.live);
        assert_eq!(config.generator.rate_hz, 10_000.0);
    }

    #[test]
    fn test_default_scheme_matches_reference_layout() {
        let scheme = AppConfig::new().parser.to_scheme().unwrap();
        assert_eq!(scheme, FrameScheme::default());
        assert_eq!(scheme.frame_size(), 14);
    }

    #[test]
    fn test_restore_defaults_is_independent() {
        let mut live = AppConfig::new();
        live.parser.channels = 8;
        live.scaling.multiplier = 2.5;

        let restored = AppConfig::new();
        assert_eq!(restored.parser.channels, 3);
        assert_eq!(restored.scaling.multiplier, 1.0);
        assert_ne!(live, restored);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let content = r#"
[parser]
start_marker = "7e"
channels = 2
data_type = "float"
endianness = "big"
"#;
        let config: AppConfig = toml::from_str(content).unwrap();

        assert_eq!(config.parser.data_type, DataType::Float32);
        assert_eq!(config.parser.endianness, Endianness::Big);
        assert_eq!(config.source, SourceConfig::default());

        let scheme = config.parser.to_scheme().unwrap();
        assert_eq!(scheme.start_marker(), &[0x7E]);
        assert_eq!(scheme.frame_size(), 9);
    }

    #[test]
    fn test_unknown_data_type_rejected() {
        let content = "[parser]\ndata_type = \"int128\"\n";
        assert!(toml::from_str::<AppConfig>(content).is_err());
    }

    #[test]
    fn test_non_finite_rate_rejected_on_load() {
        for rate in ["inf", "nan", "0.0", "-5.0"] {
            let mut file = NamedTempFile::new().unwrap();
            writeln!(file, "[generator]\nrate_hz = {}", rate).unwrap();

            let err = AppConfig::load_from_file(file.path()).unwrap_err();
            assert!(err.to_string().contains("rate_hz"), "{}", rate);
        }

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[generator]\nrate_hz = 250.0").unwrap();
        assert_eq!(AppConfig::load_from_file(file.path()).unwrap().generator.rate_hz, 250.0);
    }

    #[test]
    fn test_hex_parsing() {
        assert_eq!(parse_hex_bytes("AA BB").unwrap(), vec![0xAA, 0xBB]);
        assert_eq!(parse_hex_bytes("aabb0d0a").unwrap(), vec![0xAA, 0xBB, 0x0D, 0x0A]);
        assert!(parse_hex_bytes("").unwrap().is_empty());
        assert!(parse_hex_bytes("A").is_err());
        assert!(parse_hex_bytes("ZZ").is_err());
    }

    #[test]
    fn test_invalid_scheme_reported() {
        let mut parser = ParserConfig::default();
        parser.start_marker = "G1".to_string();
        let err = parser.to_scheme().unwrap_err();
        assert!(err.to_string().contains("start_marker"));

        let empty = ParserConfig {
            start_marker: String::new(),
            end_marker: String::new(),
            channels: 0,
            ..ParserConfig::default()
        };
        assert!(empty.to_scheme().is_err());
    }

    #[test]
    fn test_active_channel_resolution() {
        let all = ChannelConfig::default();
        assert_eq!(all.resolve(3), vec![0, 1, 2]);

        let some = ChannelConfig {
            active: Some(vec![2, 0, 2, 7]),
        };
        assert_eq!(some.resolve(3), vec![2, 0]);
    }

    #[test]
    fn test_scaling() {
        let scaling = ScalingConfig {
            multiplier: 0.5,
            offset: -1.0,
        };
        assert_eq!(scaling.apply(10.0), 4.0);
    }
}
