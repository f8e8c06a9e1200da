//! Object metadata records and their structured-value encoding

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Settable metadata attached to an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferMetadata {
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub content_type: Option<String>,
    pub custom_metadata: BTreeMap<String, String>,
}

/// Metadata of a stored object as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub name: Option<String>,
    pub bucket: Option<String>,
    pub generation: Option<String>,
    pub metageneration: Option<String>,
    pub full_path: String,
    pub size: u64,
    pub creation_time_millis: i64,
    pub updated_time_millis: i64,
    pub md5_hash: Option<String>,
    pub settable: TransferMetadata,
}

/// Encode metadata into a structured value. `None` stays `None`.
pub fn encode(metadata: Option<&TransferMetadata>) -> Option<Value> {
    metadata.map(TransferMetadata::to_value)
}

/// Decode metadata from a structured value.
///
/// Only keys present in the input are copied; unknown keys, nulls and values
/// of the wrong type are ignored. `None` and JSON `null` decode to `None`.
pub fn decode(value: Option<&Value>) -> Option<TransferMetadata> {
    let map = value?.as_object()?;
    let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);

    let custom_metadata = map
        .get("customMetadata")
        .and_then(Value::as_object)
        .map(|custom| {
            custom
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Some(TransferMetadata {
        cache_control: text("cacheControl"),
        content_disposition: text("contentDisposition"),
        content_encoding: text("contentEncoding"),
        content_language: text("contentLanguage"),
        content_type: text("contentType"),
        custom_metadata,
    })
}

impl TransferMetadata {
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        insert_opt(&mut out, "cacheControl", &self.cache_control);
        insert_opt(&mut out, "contentDisposition", &self.content_disposition);
        insert_opt(&mut out, "contentEncoding", &self.content_encoding);
        insert_opt(&mut out, "contentLanguage", &self.content_language);
        insert_opt(&mut out, "contentType", &self.content_type);
        out.insert("customMetadata".to_string(), custom_to_value(&self.custom_metadata));
        Value::Object(out)
    }
}

impl ObjectMetadata {
    pub fn to_value(&self) -> Value {
        let mut out = match self.settable.to_value() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        insert_opt(&mut out, "name", &self.name);
        insert_opt(&mut out, "bucket", &self.bucket);
        insert_opt(&mut out, "generation", &self.generation);
        insert_opt(&mut out, "metageneration", &self.metageneration);
        out.insert("fullPath".to_string(), Value::from(self.full_path.clone()));
        out.insert("size".to_string(), Value::from(self.size));
        out.insert(
            "creationTimeMillis".to_string(),
            Value::from(self.creation_time_millis),
        );
        out.insert(
            "updatedTimeMillis".to_string(),
            Value::from(self.updated_time_millis),
        );
        insert_opt(&mut out, "md5Hash", &self.md5_hash);
        Value::Object(out)
    }
}

fn insert_opt(out: &mut Map<String, Value>, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        out.insert(key.to_string(), Value::from(v.clone()));
    }
}

fn custom_to_value(custom: &BTreeMap<String, String>) -> Value {
    Value::Object(
        custom
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.clone())))
            .collect(),
    )
}
