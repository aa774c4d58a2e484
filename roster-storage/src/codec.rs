//! Value codecs: raw backend bytes to typed [`Value`]s and back.

use roster_core::{Instance, Service, Value};
use std::fmt;
use thiserror::Error;

/// Failure to decode or encode a single value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("{codec}: malformed payload: {reason}")]
    Malformed { codec: &'static str, reason: String },

    #[error("{codec}: cannot encode {found} value")]
    WrongKind { codec: &'static str, found: &'static str },
}

/// Decodes the raw payload of one data type.
///
/// Decoding is per entry: one bad payload never fails a whole query.
pub trait ValueCodec: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn decode(&self, raw: &[u8]) -> Result<Value, CodecError>;

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Bytes(_) => "bytes",
        Value::Text(_) => "text",
        Value::Map(_) => "map",
        Value::Service(_) => "service",
        Value::Instance(_) => "instance",
    }
}

/// Pass-through codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl ValueCodec for BytesCodec {
    fn name(&self) -> &'static str {
        "bytes"
    }

    fn decode(&self, raw: &[u8]) -> Result<Value, CodecError> {
        Ok(Value::Bytes(raw.to_vec()))
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            Value::Text(s) => Ok(s.as_bytes().to_vec()),
            other => Err(CodecError::WrongKind {
                codec: self.name(),
                found: kind_of(other),
            }),
        }
    }
}

/// UTF-8 text codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl ValueCodec for StringCodec {
    fn name(&self) -> &'static str {
        "string"
    }

    fn decode(&self, raw: &[u8]) -> Result<Value, CodecError> {
        std::str::from_utf8(raw)
            .map(|s| Value::Text(s.to_string()))
            .map_err(|e| CodecError::Malformed {
                codec: self.name(),
                reason: e.to_string(),
            })
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        match value {
            Value::Text(s) => Ok(s.as_bytes().to_vec()),
            other => Err(CodecError::WrongKind {
                codec: self.name(),
                found: kind_of(other),
            }),
        }
    }
}

/// JSON object codec. Anything that is not a JSON object is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct MapCodec;

impl ValueCodec for MapCodec {
    fn name(&self) -> &'static str {
        "map"
    }

    fn decode(&self, raw: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(raw)
            .map(Value::Map)
            .map_err(|e| CodecError::Malformed {
                codec: self.name(),
                reason: e.to_string(),
            })
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        match value {
            Value::Map(m) => serde_json::to_vec(m).map_err(|e| CodecError::Malformed {
                codec: self.name(),
                reason: e.to_string(),
            }),
            other => Err(CodecError::WrongKind {
                codec: self.name(),
                found: kind_of(other),
            }),
        }
    }
}

/// JSON codec for [`Service`] records.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceCodec;

impl ValueCodec for ServiceCodec {
    fn name(&self) -> &'static str {
        "service"
    }

    fn decode(&self, raw: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice::<Service>(raw)
            .map(Value::Service)
            .map_err(|e| CodecError::Malformed {
                codec: self.name(),
                reason: e.to_string(),
            })
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        match value {
            Value::Service(s) => serde_json::to_vec(s).map_err(|e| CodecError::Malformed {
                codec: self.name(),
                reason: e.to_string(),
            }),
            other => Err(CodecError::WrongKind {
                codec: self.name(),
                found: kind_of(other),
            }),
        }
    }
}

/// JSON codec for [`Instance`] records.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstanceCodec;

impl ValueCodec for InstanceCodec {
    fn name(&self) -> &'static str {
        "instance"
    }

    fn decode(&self, raw: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice::<Instance>(raw)
            .map(Value::Instance)
            .map_err(|e| CodecError::Malformed {
                codec: self.name(),
                reason: e.to_string(),
            })
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        match value {
            Value::Instance(i) => serde_json::to_vec(i).map_err(|e| CodecError::Malformed {
                codec: self.name(),
                reason: e.to_string(),
            }),
            other => Err(CodecError::WrongKind {
                codec: self.name(),
                found: kind_of(other),
            }),
        }
    }
}
