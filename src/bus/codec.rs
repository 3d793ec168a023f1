//! # JSON codec with a type-tagged frame.
//!
//! Every encoded value travels as `{"type": <type name>, "body": <json>}`.
//! The bus registers each routed message type once; decoding looks the tag up
//! and rebuilds the concrete value behind a `dyn Any`.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CodecError;

use super::message::Message;

/// Encoded value plus its type tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    pub body: Value,
}

/// A decoded frame whose concrete type is known only by tag.
pub struct Decoded {
    pub(crate) tag: TypeId,
    pub(crate) name: &'static str,
    pub(crate) value: Box<dyn Any + Send + Sync>,
}

impl Decoded {
    pub fn tag(&self) -> TypeId {
        self.tag
    }

    /// Registered type name of the value.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Recovers the concrete value.
    pub fn downcast<T: Message>(self) -> Result<T, CodecError> {
        self.value
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| CodecError::WrongType {
                expected: type_name::<T>(),
            })
    }
}

impl fmt::Debug for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoded").field("name", &self.name).finish()
    }
}

type DecodeFn = fn(Value) -> Result<Box<dyn Any + Send + Sync>, CodecError>;

struct Entry {
    tag: TypeId,
    name: &'static str,
    decode: DecodeFn,
}

/// Registry of decodable message types.
#[derive(Default)]
pub struct Codec {
    types: RwLock<HashMap<&'static str, Entry>>,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `T` decodable. Registering twice is a no-op.
    pub fn register<T: Message>(&self) {
        let name = type_name::<T>();
        self.types
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name)
            .or_insert(Entry {
                tag: TypeId::of::<T>(),
                name,
                decode: decode_value::<T>,
            });
    }

    pub fn is_registered<T: 'static>(&self) -> bool {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(type_name::<T>())
    }

    pub fn encode_frame<T: Message>(&self, value: &T) -> Result<Frame, CodecError> {
        Ok(Frame {
            kind: type_name::<T>().to_string(),
            body: serde_json::to_value(value)?,
        })
    }

    pub fn encode<T: Message>(&self, value: &T) -> Result<Bytes, CodecError> {
        let frame = self.encode_frame(value)?;
        Ok(Bytes::from(serde_json::to_vec(&frame)?))
    }

    pub fn decode_frame(&self, frame: Frame) -> Result<Decoded, CodecError> {
        let types = self.types.read().unwrap_or_else(PoisonError::into_inner);
        let entry = types
            .get(frame.kind.as_str())
            .ok_or_else(|| CodecError::UnknownType(frame.kind.clone()))?;
        Ok(Decoded {
            tag: entry.tag,
            name: entry.name,
            value: (entry.decode)(frame.body)?,
        })
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Decoded, CodecError> {
        let frame: Frame = serde_json::from_slice(bytes)?;
        self.decode_frame(frame)
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types = self.types.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Codec").field("types", &types.len()).finish()
    }
}

fn decode_value<T: Message>(body: Value) -> Result<Box<dyn Any + Send + Sync>, CodecError> {
    Ok(Box::new(serde_json::from_value::<T>(body)?))
}

/// Serializes a type-erased value known to be a `T`.
pub(crate) fn encode_any<T: Message>(value: &(dyn Any + Send)) -> Result<Value, CodecError> {
    let value = value.downcast_ref::<T>().ok_or(CodecError::WrongType {
        expected: type_name::<T>(),
    })?;
    Ok(serde_json::to_value(value)?)
}
