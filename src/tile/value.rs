use std::fmt;

use serde::Serialize;

use super::pbf::{
    PbfReader, PbfWriter, WIRE_FIXED32, WIRE_FIXED64, WIRE_LEN, WIRE_VARINT, zigzag_decode64,
    zigzag_encode64,
};
use crate::error::{Result, TileError};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Float(f32),
    Double(f64),
    Int(i64),
    UInt(u64),
    SInt(i64),
    Bool(bool),
}

/// Hashable identity of a value, used to deduplicate the layer value table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ValueKey {
    String(String),
    Float(u32),
    Double(u64),
    Int(i64),
    UInt(u64),
    SInt(i64),
    Bool(bool),
}

impl Value {
    pub(crate) fn read(data: &[u8]) -> Result<Value> {
        let mut reader = PbfReader::new(data);
        let mut value = None;
        while reader.has_remaining() {
            match reader.read_key()? {
                (1, WIRE_LEN) => value = Some(Value::String(reader.read_string()?)),
                (2, WIRE_FIXED32) => value = Some(Value::Float(f32::from_bits(reader.read_fixed32()?))),
                (3, WIRE_FIXED64) => value = Some(Value::Double(f64::from_bits(reader.read_fixed64()?))),
                (4, WIRE_VARINT) => value = Some(Value::Int(reader.read_varint()? as i64)),
                (5, WIRE_VARINT) => value = Some(Value::UInt(reader.read_varint()?)),
                (6, WIRE_VARINT) => value = Some(Value::SInt(zigzag_decode64(reader.read_varint()?))),
                (7, WIRE_VARINT) => value = Some(Value::Bool(reader.read_varint()? != 0)),
                (_, wire_type) => reader.skip(wire_type)?,
            }
        }
        value.ok_or_else(|| TileError::malformed("value message carries no value"))
    }

    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = PbfWriter::new();
        match self {
            Value::String(text) => writer.write_string_field(1, text)?,
            Value::Float(val) => writer.write_fixed32_field(2, val.to_bits())?,
            Value::Double(val) => writer.write_fixed64_field(3, val.to_bits())?,
            Value::Int(val) => writer.write_varint_field(4, *val as u64)?,
            Value::UInt(val) => writer.write_varint_field(5, *val)?,
            Value::SInt(val) => writer.write_varint_field(6, zigzag_encode64(*val))?,
            Value::Bool(val) => writer.write_varint_field(7, u64::from(*val))?,
        }
        Ok(writer.into_bytes())
    }

    pub(crate) fn key(&self) -> ValueKey {
        match self {
            Value::String(text) => ValueKey::String(text.clone()),
            Value::Float(val) => ValueKey::Float(val.to_bits()),
            Value::Double(val) => ValueKey::Double(val.to_bits()),
            Value::Int(val) => ValueKey::Int(*val),
            Value::UInt(val) => ValueKey::UInt(*val),
            Value::SInt(val) => ValueKey::SInt(*val),
            Value::Bool(val) => ValueKey::Bool(*val),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(val) => Some(f64::from(*val)),
            Value::Double(val) => Some(*val),
            Value::Int(val) | Value::SInt(val) => Some(*val as f64),
            Value::UInt(val) => Some(*val as f64),
            Value::String(_) | Value::Bool(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    /// Converts a JSON scalar; arrays, objects and null have no tile representation.
    pub fn from_json(value: &serde_json::Value) -> Option<Value> {
        match value {
            serde_json::Value::String(text) => Some(Value::String(text.clone())),
            serde_json::Value::Bool(val) => Some(Value::Bool(*val)),
            serde_json::Value::Number(number) => {
                if let Some(val) = number.as_i64() {
                    Some(Value::Int(val))
                } else if let Some(val) = number.as_u64() {
                    Some(Value::UInt(val))
                } else {
                    number.as_f64().map(Value::Double)
                }
            }
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(text) => write!(f, "{text}"),
            Value::Float(val) => write!(f, "{val}"),
            Value::Double(val) => write!(f, "{val}"),
            Value::Int(val) | Value::SInt(val) => write!(f, "{val}"),
            Value::UInt(val) => write!(f, "{val}"),
            Value::Bool(val) => write!(f, "{val}"),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}
