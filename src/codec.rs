//! Codec registry for per-feed value encodings, and the binary-preserving
//! JSON variant used to persist [`crate::descriptor`] metadata.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use base64::Engine;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// A value read from or written to a feed, in the shape its `valueEncoding`
/// produces. Codecs convert between this and the raw bytes a feed actually
/// stores.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedValue {
    Bytes(Vec<u8>),
    Text(String),
    Json(serde_json::Value),
}

impl FeedValue {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FeedValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FeedValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

pub trait Codec: Send + Sync {
    fn encode(&self, value: &FeedValue) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<FeedValue>;
}

struct BinaryCodec;
impl Codec for BinaryCodec {
    fn encode(&self, value: &FeedValue) -> Result<Vec<u8>> {
        match value {
            FeedValue::Bytes(b) => Ok(b.clone()),
            FeedValue::Text(s) => Ok(s.as_bytes().to_vec()),
            FeedValue::Json(v) => Ok(serde_json::to_vec(v)?),
        }
    }
    fn decode(&self, bytes: &[u8]) -> Result<FeedValue> {
        Ok(FeedValue::Bytes(bytes.to_vec()))
    }
}

struct Utf8Codec;
impl Codec for Utf8Codec {
    fn encode(&self, value: &FeedValue) -> Result<Vec<u8>> {
        match value {
            FeedValue::Text(s) => Ok(s.as_bytes().to_vec()),
            FeedValue::Bytes(b) => Ok(b.clone()),
            FeedValue::Json(v) => Ok(v.to_string().into_bytes()),
        }
    }
    fn decode(&self, bytes: &[u8]) -> Result<FeedValue> {
        Ok(FeedValue::Text(String::from_utf8_lossy(bytes).into_owned()))
    }
}

struct JsonCodec;
impl Codec for JsonCodec {
    fn encode(&self, value: &FeedValue) -> Result<Vec<u8>> {
        let json = match value {
            FeedValue::Json(v) => v.clone(),
            FeedValue::Text(s) => serde_json::from_str(s).unwrap_or(serde_json::Value::String(s.clone())),
            FeedValue::Bytes(b) => serde_json::from_slice(b)?,
        };
        Ok(serde_json::to_vec(&json)?)
    }
    fn decode(&self, bytes: &[u8]) -> Result<FeedValue> {
        Ok(FeedValue::Json(serde_json::from_slice(bytes)?))
    }
}

/// Map `name -> {encode, decode}`, extending the built-in `"binary"`,
/// `"utf-8"`, `"json"` codecs with caller-registered ones.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn Codec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        let mut codecs: HashMap<String, Arc<dyn Codec>> = HashMap::new();
        codecs.insert("binary".to_string(), Arc::new(BinaryCodec));
        codecs.insert("utf-8".to_string(), Arc::new(Utf8Codec));
        codecs.insert("json".to_string(), Arc::new(JsonCodec));
        Self { codecs }
    }

    pub fn register(&mut self, name: impl Into<String>, codec: Arc<dyn Codec>) {
        self.codecs.insert(name.into(), codec);
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Codec>> {
        self.codecs
            .get(name)
            .cloned()
            .ok_or_else(|| Error::BadEncoding(name.to_string()))
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque, serializable per-feed metadata. Mirrors `serde_json::Value` but
/// keeps byte strings as a first-class variant so they survive a round trip
/// through the binary-preserving JSON codec below instead of being forced
/// through lossy UTF-8.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Metadata {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Metadata>),
    Object(BTreeMap<String, Metadata>),
}

const BIN_TAG: &str = "$bin";

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Metadata::Null => serializer.serialize_unit(),
            Metadata::Bool(b) => serializer.serialize_bool(*b),
            Metadata::Number(n) => n.serialize(serializer),
            Metadata::String(s) => serializer.serialize_str(s),
            Metadata::Bytes(b) => {
                let mut map = BTreeMap::new();
                map.insert(
                    BIN_TAG.to_string(),
                    base64::engine::general_purpose::STANDARD.encode(b),
                );
                map.serialize(serializer)
            }
            Metadata::Array(items) => items.serialize(serializer),
            Metadata::Object(fields) => fields.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Metadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        json_to_metadata(value).map_err(D::Error::custom)
    }
}

fn json_to_metadata(value: serde_json::Value) -> std::result::Result<Metadata, String> {
    use serde_json::Value;
    Ok(match value {
        Value::Null => Metadata::Null,
        Value::Bool(b) => Metadata::Bool(b),
        Value::Number(n) => Metadata::Number(n),
        Value::String(s) => Metadata::String(s),
        Value::Array(items) => Metadata::Array(
            items
                .into_iter()
                .map(json_to_metadata)
                .collect::<std::result::Result<_, _>>()?,
        ),
        Value::Object(fields) => {
            if fields.len() == 1 {
                if let Some(Value::String(encoded)) = fields.get(BIN_TAG) {
                    let bytes = base64::engine::general_purpose::STANDARD
                        .decode(encoded)
                        .map_err(|e| e.to_string())?;
                    return Ok(Metadata::Bytes(bytes));
                }
            }
            let mut out = BTreeMap::new();
            for (k, v) in fields.into_iter() {
                out.insert(k, json_to_metadata(v)?);
            }
            Metadata::Object(out)
        }
    })
}

/// Serializes a [`Metadata`] value with byte strings preserved under the
/// `$bin` extension tag.
pub fn encode_metadata(value: &Metadata) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Deserializes a value previously produced by [`encode_metadata`].
pub fn decode_metadata(bytes: &[u8]) -> Result<Metadata> {
    Ok(serde_json::from_slice(bytes)?)
}
