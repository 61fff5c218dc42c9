/*!
Numeric type catalog.

Every channel value on the wire is one of ten fixed-width numeric types. This
module maps each [`DataType`] tag to its byte width and decode rule, and holds
the decoded [`Value`] representation handed to consumers.
*/

use crate::error::{Result, StreamError};
use num_traits::AsPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fixed-width numeric type carried by every channel of a frame.
///
/// The discriminants are the catalog indices used by configuration front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DataType {
    Int8 = 0,
    UInt8 = 1,
    Int16 = 2,
    UInt16 = 3,
    Int32 = 4,
    UInt32 = 5,
    Int64 = 6,
    UInt64 = 7,
    #[serde(alias = "float")]
    Float32 = 8,
    #[serde(alias = "double")]
    Float64 = 9,
}

impl DataType {
    /// All tags in catalog order
    pub const ALL: [DataType; 10] = [
        Self::Int8,
        Self::UInt8,
        Self::Int16,
        Self::UInt16,
        Self::Int32,
        Self::UInt32,
        Self::Int64,
        Self::UInt64,
        Self::Float32,
        Self::Float64,
    ];

    /// Size of one value on the wire, in bytes
    pub const fn width(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// Check if this is a signed integer type
    pub fn is_signed(self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    /// Check if this is an IEEE-754 floating point type
    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Lowercase tag name, as used in configuration files
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::UInt8 => "uint8",
            Self::Int16 => "int16",
            Self::UInt16 => "uint16",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    /// Decode one value of this type.
    ///
    /// Panics if `bytes` is shorter than [`DataType::width`]; callers slice
    /// payloads with `chunks_exact(width)`.
    pub fn decode(self, bytes: &[u8], endianness: Endianness) -> Value {
        macro_rules! read {
            ($ty:ty) => {
                match endianness {
                    Endianness::Little => <$ty>::from_le_bytes(fixed(bytes)),
                    Endianness::Big => <$ty>::from_be_bytes(fixed(bytes)),
                }
            };
        }

        match self {
            Self::Int8 => Value::Int8(read!(i8)),
            Self::UInt8 => Value::UInt8(read!(u8)),
            Self::Int16 => Value::Int16(read!(i16)),
            Self::UInt16 => Value::UInt16(read!(u16)),
            Self::Int32 => Value::Int32(read!(i32)),
            Self::UInt32 => Value::UInt32(read!(u32)),
            Self::Int64 => Value::Int64(read!(i64)),
            Self::UInt64 => Value::UInt64(read!(u64)),
            Self::Float32 => Value::Float32(read!(f32)),
            Self::Float64 => Value::Float64(read!(f64)),
        }
    }
}

impl TryFrom<u8> for DataType {
    type Error = StreamError;

    fn try_from(index: u8) -> Result<Self> {
        Self::ALL
            .get(index as usize)
            .copied()
            .ok_or_else(|| StreamError::config(format!("unknown data type index {}", index)))
    }
}

impl FromStr for DataType {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "float" => Ok(Self::Float32),
            "double" => Ok(Self::Float64),
            name => Self::ALL
                .into_iter()
                .find(|tag| tag.as_str() == name)
                .ok_or_else(|| StreamError::config(format!("unknown data type '{}'", s))),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}

/// Byte order applied to every channel value. Markers are always raw bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Endianness {
    #[default]
    Little = 0,
    Big = 1,
}

impl TryFrom<u8> for Endianness {
    type Error = StreamError;

    fn try_from(index: u8) -> Result<Self> {
        match index {
            0 => Ok(Self::Little),
            1 => Ok(Self::Big),
            _ => Err(StreamError::config(format!("unknown endianness index {}", index))),
        }
    }
}

impl FromStr for Endianness {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "little" | "le" => Ok(Self::Little),
            "big" | "be" => Ok(Self::Big),
            _ => Err(StreamError::config(format!("unknown endianness '{}'", s))),
        }
    }
}

/// A single decoded channel value.
///
/// Serializes as a bare number so decoded batches map directly onto JSON arrays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
}

impl Value {
    /// Catalog tag of this value
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Int8(_) => DataType::Int8,
            Self::UInt8(_) => DataType::UInt8,
            Self::Int16(_) => DataType::Int16,
            Self::UInt16(_) => DataType::UInt16,
            Self::Int32(_) => DataType::Int32,
            Self::UInt32(_) => DataType::UInt32,
            Self::Int64(_) => DataType::Int64,
            Self::UInt64(_) => DataType::UInt64,
            Self::Float32(_) => DataType::Float32,
            Self::Float64(_) => DataType::Float64,
        }
    }

    /// Widen to `f64`. 64-bit integers beyond 2^53 lose precision.
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::Int8(v) => v.as_(),
            Self::UInt8(v) => v.as_(),
            Self::Int16(v) => v.as_(),
            Self::UInt16(v) => v.as_(),
            Self::Int32(v) => v.as_(),
            Self::UInt32(v) => v.as_(),
            Self::Int64(v) => v.as_(),
            Self::UInt64(v) => v.as_(),
            Self::Float32(v) => v.as_(),
            Self::Float64(v) => v,
        }
    }

    /// Cast `x` into `data_type`, saturating at the type bounds (NaN becomes 0
    /// for integer types).
    pub fn from_f64(data_type: DataType, x: f64) -> Self {
        match data_type {
            DataType::Int8 => Self::Int8(x.as_()),
            DataType::UInt8 => Self::UInt8(x.as_()),
            DataType::Int16 => Self::Int16(x.as_()),
            DataType::UInt16 => Self::UInt16(x.as_()),
            DataType::Int32 => Self::Int32(x.as_()),
            DataType::UInt32 => Self::UInt32(x.as_()),
            DataType::Int64 => Self::Int64(x.as_()),
            DataType::UInt64 => Self::UInt64(x.as_()),
            DataType::Float32 => Self::Float32(x.as_()),
            DataType::Float64 => Self::Float64(x),
        }
    }

    /// Append the wire representation of this value to `out`
    pub fn write_to(&self, endianness: Endianness, out: &mut Vec<u8>) {
        macro_rules! put {
            ($v:expr) => {
                match endianness {
                    Endianness::Little => out.extend_from_slice(&$v.to_le_bytes()),
                    Endianness::Big => out.extend_from_slice(&$v.to_be_bytes()),
                }
            };
        }

        match *self {
            Self::Int8(v) => put!(v),
            Self::UInt8(v) => put!(v),
            Self::Int16(v) => put!(v),
            Self::UInt16(v) => put!(v),
            Self::Int32(v) => put!(v),
            Self::UInt32(v) => put!(v),
            Self::Int64(v) => put!(v),
            Self::UInt64(v) => put!(v),
            Self::Float32(v) => put!(v),
            Self::Float64(v) => put!(v),
        }
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
