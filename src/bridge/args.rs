//! Argument unpacking for named calls

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::{TransferError, TransferResult};
use crate::storage::{ListOptions, StorageRef};
use crate::task::Handle;

lazy_static::lazy_static! {
    static ref NO_ARGUMENTS: Map<String, Value> = Map::new();
}

const MAX_LIST_RESULTS: u64 = 1000;

/// Arguments of one call. `null` is treated as an empty map.
pub(crate) struct Args<'a> {
    method: &'a str,
    map: &'a Map<String, Value>,
}

impl<'a> Args<'a> {
    pub fn new(method: &'a str, value: &'a Value) -> TransferResult<Self> {
        let map = match value {
            Value::Object(map) => map,
            Value::Null => &*NO_ARGUMENTS,
            _ => {
                return Err(TransferError::InvalidArgument(format!(
                    "{}: arguments must be a map",
                    method
                )))
            }
        };
        Ok(Self { method, map })
    }

    fn invalid(&self, key: &str, expected: &str) -> TransferError {
        TransferError::InvalidArgument(format!("{}: '{}' must be {}", self.method, key, expected))
    }

    /// Present and not `null`.
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    pub fn str(&self, key: &str) -> TransferResult<&'a str> {
        self.opt_str(key)?
            .ok_or_else(|| self.invalid(key, "a string"))
    }

    pub fn opt_str(&self, key: &str) -> TransferResult<Option<&'a str>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| self.invalid(key, "a string")),
        }
    }

    pub fn handle(&self) -> TransferResult<Handle> {
        self.get("handle")
            .and_then(Value::as_i64)
            .ok_or_else(|| self.invalid("handle", "an integer"))
    }

    /// Non-negative millisecond count.
    pub fn millis(&self, key: &str) -> TransferResult<Duration> {
        self.get(key)
            .and_then(Value::as_u64)
            .map(Duration::from_millis)
            .ok_or_else(|| self.invalid(key, "a non-negative integer"))
    }

    pub fn bytes(&self, key: &str) -> TransferResult<Vec<u8>> {
        let items = self
            .get(key)
            .and_then(Value::as_array)
            .ok_or_else(|| self.invalid(key, "a byte array"))?;
        items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| self.invalid(key, "a byte array"))
            })
            .collect()
    }

    pub fn object(&self, key: &str) -> TransferResult<&'a Value> {
        self.get(key)
            .filter(|v| v.is_object())
            .ok_or_else(|| self.invalid(key, "a map"))
    }

    /// `appName`, `bucket` (falls back to `default_bucket`) and `path`.
    pub fn reference(&self, default_bucket: &str) -> TransferResult<StorageRef> {
        let app_name = self.str("appName")?;
        let bucket = self.opt_str("bucket")?.unwrap_or(default_bucket);
        let path = self.str("path")?;
        Ok(StorageRef::new(app_name, bucket, path))
    }

    pub fn list_options(&self) -> TransferResult<ListOptions> {
        let options = self.object("options")?;
        let max_results = options
            .get("maxResults")
            .and_then(Value::as_u64)
            .filter(|n| (1..=MAX_LIST_RESULTS).contains(n))
            .ok_or_else(|| self.invalid("options.maxResults", "between 1 and 1000"))?;
        let page_token = match options.get("pageToken") {
            None | Some(Value::Null) => None,
            Some(Value::String(token)) => Some(token.clone()),
            Some(_) => return Err(self.invalid("options.pageToken", "a string")),
        };
        Ok(ListOptions {
            max_results: max_results as u32,
            page_token,
        })
    }
}

/// Decode the payload of a string upload.
pub(crate) fn decode_put_string(data: &str, format: &str) -> TransferResult<Vec<u8>> {
    let decoded = match format {
        "PutStringFormat.base64" => STANDARD.decode(data),
        "PutStringFormat.base64Url" => URL_SAFE.decode(data),
        other => {
            return Err(TransferError::InvalidArgument(format!(
                "unsupported string format: {}",
                other
            )))
        }
    };
    decoded.map_err(|e| TransferError::InvalidArgument(format!("invalid {} data: {}", format, e)))
}
