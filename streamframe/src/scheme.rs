/*!
Frame scheme: the wire layout shared by encoder and decoder.

```text
[ start marker ][ channels x width(data type) payload ][ end marker ]
```

A [`FrameScheme`] is validated once at construction and never mutated
afterwards; reconfiguring means building a new scheme and installing it
wholesale.
*/

use crate::data_type::{DataType, Endianness, Value};
use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};

/// Placeholder shown for payload bytes in [`FrameScheme::expected_pattern`]
pub const PAYLOAD_PLACEHOLDER: &str = "XX";

/// Immutable frame layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawFrameScheme")]
pub struct FrameScheme {
    start_marker: Vec<u8>,
    end_marker: Vec<u8>,
    channels: usize,
    data_type: DataType,
    endianness: Endianness,
}

/// Unvalidated field set; deserialized schemes pass through [`FrameScheme::new`]
#[derive(Deserialize)]
struct RawFrameScheme {
    start_marker: Vec<u8>,
    end_marker: Vec<u8>,
    channels: usize,
    data_type: DataType,
    endianness: Endianness,
}

impl TryFrom<RawFrameScheme> for FrameScheme {
    type Error = StreamError;

    fn try_from(raw: RawFrameScheme) -> Result<Self> {
        Self::new(raw.start_marker, raw.end_marker, raw.channels, raw.data_type, raw.endianness)
    }
}

impl FrameScheme {
    /// Build and validate a scheme.
    ///
    /// Fails when the derived frame size is zero (no markers and no channels).
    pub fn new(
        start_marker: Vec<u8>,
        end_marker: Vec<u8>,
        channels: usize,
        data_type: DataType,
        endianness: Endianness,
    ) -> Result<Self> {
        let scheme = Self {
            start_marker,
            end_marker,
            channels,
            data_type,
            endianness,
        };

        if scheme.frame_size() == 0 {
            return Err(StreamError::config(
                "frame size is zero: a scheme needs a marker or at least one channel",
            ));
        }

        Ok(scheme)
    }

    /// Build a scheme from catalog indices, as stored by configuration front ends
    pub fn from_indices(
        start_marker: Vec<u8>,
        end_marker: Vec<u8>,
        channels: usize,
        data_type_index: u8,
        endianness_index: u8,
    ) -> Result<Self> {
        Self::new(
            start_marker,
            end_marker,
            channels,
            DataType::try_from(data_type_index)?,
            Endianness::try_from(endianness_index)?,
        )
    }

    pub fn start_marker(&self) -> &[u8] {
        &self.start_marker
    }

    pub fn end_marker(&self) -> &[u8] {
        &self.end_marker
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Bytes between the markers
    pub fn payload_size(&self) -> usize {
        self.channels * self.data_type.width()
    }

    /// Total bytes of one frame on the wire
    pub fn frame_size(&self) -> usize {
        self.start_marker.len() + self.payload_size() + self.end_marker.len()
    }

    /// Diagnostic rendering of the layout: marker bytes in hex with `XX` for
    /// every payload byte, e.g. `AA BB XX XX XX XX`.
    pub fn expected_pattern(&self) -> String {
        let start = self.start_marker.iter().map(|b| format!("{:02X}", b));
        let payload = std::iter::repeat(PAYLOAD_PLACEHOLDER.to_string()).take(self.payload_size());
        let end = self.end_marker.iter().map(|b| format!("{:02X}", b));

        start.chain(payload).chain(end).collect::<Vec<_>>().join(" ")
    }

    /// Check the start marker at the head of `candidate`
    pub(crate) fn start_matches(&self, candidate: &[u8]) -> bool {
        candidate.starts_with(&self.start_marker)
    }

    /// Check the end marker after the payload of `candidate`.
    /// An empty end marker always matches.
    pub(crate) fn end_matches(&self, candidate: &[u8]) -> bool {
        if self.end_marker.is_empty() {
            return true;
        }
        let offset = self.start_marker.len() + self.payload_size();
        candidate
            .get(offset..offset + self.end_marker.len())
            .is_some_and(|tail| tail == self.end_marker.as_slice())
    }

    /// Decode the payload of a complete, marker-validated frame
    pub(crate) fn decode_payload(&self, frame: &[u8]) -> Vec<Value> {
        let width = self.data_type.width();
        let offset = self.start_marker.len();
        frame[offset..offset + self.payload_size()]
            .chunks_exact(width)
            .map(|chunk| self.data_type.decode(chunk, self.endianness))
            .collect()
    }

    /// Encode one frame. Every value must carry this scheme's data type.
    pub fn encode(&self, values: &[Value]) -> Result<Vec<u8>> {
        if values.len() != self.channels {
            return Err(StreamError::invalid_frame(format!(
                "expected {} channel values, got {}",
                self.channels,
                values.len()
            )));
        }

        let mut frame = Vec::with_capacity(self.frame_size());
        frame.extend_from_slice(&self.start_marker);
        for (channel, value) in values.iter().enumerate() {
            if value.data_type() != self.data_type {
                return Err(StreamError::invalid_frame(format!(
                    "channel {} holds {}, scheme expects {}",
                    channel,
                    value.data_type(),
                    self.data_type
                )));
            }
            value.write_to(self.endianness, &mut frame);
        }
        frame.extend_from_slice(&self.end_marker);

        Ok(frame)
    }

    /// Encode one frame, casting each value into the scheme's data type
    pub fn encode_lossy(&self, values: &[f64]) -> Result<Vec<u8>> {
        let values: Vec<Value> = values
            .iter()
            .map(|&x| Value::from_f64(self.data_type, x))
            .collect();
        self.encode(&values)
    }
}

impl Default for FrameScheme {
    /// `AA BB` start marker, no end marker, three little-endian INT32 channels
    fn default() -> Self {
        Self {
            start_marker: crate::protocol::DEFAULT_START_MARKER.to_vec(),
            end_marker: Vec::new(),
            channels: crate::protocol::DEFAULT_CHANNELS,
            data_type: DataType::Int32,
            endianness: Endianness::Little,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_scheme() -> FrameScheme {
        FrameScheme::new(vec![0xAA, 0xBB], vec![], 3, DataType::Int32, Endianness::Little).unwrap()
    }

    #[test]
    fn test_sizes() {
        let scheme = reference_scheme();
        assert_eq!(scheme.payload_size(), 12);
        assert_eq!(scheme.frame_size(), 14);

        let framed = FrameScheme::new(vec![0x7E], vec![0x0D, 0x0A], 2, DataType::Float64, Endianness::Big)
            .unwrap();
        assert_eq!(framed.payload_size(), 16);
        assert_eq!(framed.frame_size(), 19);
    }

    #[test]
    fn test_default_is_reference_layout() {
        assert_eq!(FrameScheme::default(), reference_scheme());
    }

    #[test]
    fn test_zero_frame_size_rejected() {
        let result = FrameScheme::new(vec![], vec![], 0, DataType::Int8, Endianness::Little);
        assert!(matches!(result, Err(StreamError::Config(_))));
    }

    #[test]
    fn test_marker_only_scheme_is_legal() {
        let scheme = FrameScheme::new(vec![0x55], vec![], 0, DataType::Int64, Endianness::Little).unwrap();
        assert_eq!(scheme.frame_size(), 1);
        assert_eq!(scheme.expected_pattern(), "55");
    }

    #[test]
    fn test_deserialize_validates() {
        let zero = r#"{"start_marker":[],"end_marker":[],"channels":0,"data_type":"int8","endianness":"little"}"#;
        let err = serde_json::from_str::<FrameScheme>(zero).unwrap_err();
        assert!(err.to_string().contains("frame size is zero"));

        let json = serde_json::to_string(&reference_scheme()).unwrap();
        let scheme: FrameScheme = serde_json::from_str(&json).unwrap();
        assert_eq!(scheme, reference_scheme());
    }

    #[test]
    fn test_from_indices() {
        let scheme = FrameScheme::from_indices(vec![0xAA, 0xBB], vec![], 3, 4, 0).unwrap();
        assert_eq!(scheme, reference_scheme());

        assert!(FrameScheme::from_indices(vec![0xAA], vec![], 1, 12, 0).is_err());
        assert!(FrameScheme::from_indices(vec![0xAA], vec![], 1, 0, 7).is_err());
    }

    #[test]
    fn test_expected_pattern() {
        let scheme = FrameScheme::new(vec![0xAA, 0xBB], vec![0x0A], 1, DataType::Int16, Endianness::Little)
            .unwrap();
        assert_eq!(scheme.expected_pattern(), "AA BB XX XX 0A");
    }

    #[test]
    fn test_encode_layout() {
        let scheme = reference_scheme();
        let frame = scheme
            .encode(&[Value::Int32(-1), Value::Int32(1), Value::Int32(100)])
            .unwrap();

        assert_eq!(
            frame,
            vec![
                0xAA, 0xBB, //
                0xFF, 0xFF, 0xFF, 0xFF, //
                0x01, 0x00, 0x00, 0x00, //
                0x64, 0x00, 0x00, 0x00,
            ]
        );
    }

    #[test]
    fn test_encode_rejects_mismatched_values() {
        let scheme = reference_scheme();

        let too_few = scheme.encode(&[Value::Int32(1)]);
        assert!(matches!(too_few, Err(StreamError::InvalidFrame(_))));

        let wrong_type = scheme.encode(&[Value::Int32(1), Value::Int16(2), Value::Int32(3)]);
        assert!(matches!(wrong_type, Err(StreamError::InvalidFrame(_))));
    }

    #[test]
    fn test_encode_lossy_casts() {
        let scheme = FrameScheme::new(vec![0xAA], vec![], 2, DataType::UInt8, Endianness::Little).unwrap();
        assert_eq!(scheme.encode_lossy(&[3.7, -5.0]).unwrap(), vec![0xAA, 3, 0]);
    }

    #[test]
    fn test_marker_checks() {
        let scheme = FrameScheme::new(vec![0xAA], vec![0x55], 1, DataType::UInt8, Endianness::Little).unwrap();
        assert!(scheme.start_matches(&[0xAA, 0x10, 0x55]));
        assert!(!scheme.start_matches(&[0xAB, 0x10, 0x55]));
        assert!(scheme.end_matches(&[0xAA, 0x10, 0x55]));
        assert!(!scheme.end_matches(&[0xAA, 0x10, 0x56]));

        let open = reference_scheme();
        assert!(open.end_matches(&[0x00; 14]));
    }
}
