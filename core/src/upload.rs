//! Record payloads and the file-upload transformer.
//!
//! # Design
//! A `Payload` is an ordered map that, unlike plain JSON, can hold dates and
//! file blobs. Files are attached under one of two reserved keys. Which key
//! is present selects an `UploadMode`:
//!
//! - `Base64`: each blob is read and inlined as a `data:` URL, then merged
//!   back into the payload under its field name.
//! - `FormData`: blobs are loaded into memory and merged back, and the whole
//!   payload becomes a multipart form.
//!
//! Without a reserved key the payload passes through untouched.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::future::{try_join_all, BoxFuture};
use futures_util::FutureExt;
use serde_json::{Map, Value};

use crate::config::ProviderConfig;
use crate::error::{ApiError, Result};
use crate::http::RequestBody;
use crate::multipart::MultipartForm;
use crate::types::Record;

#[derive(Debug, Clone, PartialEq)]
enum BlobSource {
    Memory(Bytes),
    Path(PathBuf),
}

/// A file to upload, either already in memory or read lazily from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct FileBlob {
    pub filename: String,
    pub content_type: String,
    source: BlobSource,
}

impl FileBlob {
    pub fn from_bytes(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            source: BlobSource::Memory(data.into()),
        }
    }

    /// The file is read when the payload is transformed.
    pub fn from_path(path: impl AsRef<Path>, content_type: impl Into<String>) -> Self {
        let path = path.as_ref();
        Self {
            filename: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            content_type: content_type.into(),
            source: BlobSource::Path(path.to_path_buf()),
        }
    }

    /// Bytes, if the blob is already in memory.
    pub fn resident_bytes(&self) -> Option<&Bytes> {
        match &self.source {
            BlobSource::Memory(data) => Some(data),
            BlobSource::Path(_) => None,
        }
    }

    pub async fn read(&self) -> Result<Bytes> {
        match &self.source {
            BlobSource::Memory(data) => Ok(data.clone()),
            BlobSource::Path(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
        }
    }

    /// Read the blob and keep it in memory.
    pub async fn load(self) -> Result<FileBlob> {
        let data = self.read().await?;
        Ok(FileBlob {
            source: BlobSource::Memory(data),
            ..self
        })
    }

    /// `data:<mime>;base64,<payload>`
    pub async fn to_data_url(&self) -> Result<String> {
        let data = self.read().await?;
        Ok(format!("data:{};base64,{}", self.content_type, STANDARD.encode(&data)))
    }
}

/// A payload value.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadValue {
    Json(Value),
    Date(DateTime<Utc>),
    File(FileBlob),
    List(Vec<PayloadValue>),
    Object(Payload),
}

impl From<Value> for PayloadValue {
    fn from(value: Value) -> Self {
        PayloadValue::Json(value)
    }
}

impl From<FileBlob> for PayloadValue {
    fn from(blob: FileBlob) -> Self {
        PayloadValue::File(blob)
    }
}

impl From<DateTime<Utc>> for PayloadValue {
    fn from(date: DateTime<Utc>) -> Self {
        PayloadValue::Date(date)
    }
}

impl From<Payload> for PayloadValue {
    fn from(payload: Payload) -> Self {
        PayloadValue::Object(payload)
    }
}

impl PayloadValue {
    fn to_json(&self) -> Result<Value> {
        match self {
            PayloadValue::Json(value) => Ok(value.clone()),
            PayloadValue::Date(date) => Ok(Value::String(iso_timestamp(date))),
            PayloadValue::File(blob) => Err(ApiError::SerializationError(format!(
                "file `{}` is outside an upload key",
                blob.filename
            ))),
            PayloadValue::List(items) => items.iter().map(PayloadValue::to_json).collect::<Result<Vec<_>>>().map(Value::Array),
            PayloadValue::Object(payload) => payload.to_json().map(Value::Object),
        }
    }

    /// Compare against a previously fetched JSON value. Dates compare by
    /// their ISO rendering; blobs never match.
    fn same_as(&self, previous: &Value) -> bool {
        match self {
            PayloadValue::Json(value) => value == previous,
            PayloadValue::File(_) => false,
            other => other.to_json().map(|json| &json == previous).unwrap_or(false),
        }
    }
}

/// Ordered field map sent as a record body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    fields: Vec<(String, PayloadValue)>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// A payload of plain JSON values. Non-object values give an empty payload.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::from(map),
            _ => Self::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<PayloadValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a field, keeping the original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PayloadValue>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<PayloadValue> {
        let at = self.fields.iter().position(|(k, _)| k == key)?;
        Some(self.fields.remove(at).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PayloadValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// JSON object form. Fails if a file blob is present.
    pub fn to_json(&self) -> Result<Record> {
        let mut map = Map::new();
        for (key, value) in &self.fields {
            map.insert(key.clone(), value.to_json()?);
        }
        Ok(map)
    }

    /// Keep only the fields whose value differs from `previous`. A field
    /// missing from `previous` counts as changed.
    pub fn diff(&self, previous: &Record) -> Payload {
        let fields = self
            .fields
            .iter()
            .filter(|(key, value)| match previous.get(key) {
                Some(old) => !value.same_as(old),
                None => true,
            })
            .cloned()
            .collect();
        Payload { fields }
    }
}

impl From<Record> for Payload {
    fn from(map: Record) -> Self {
        Self {
            fields: map.into_iter().map(|(k, v)| (k, PayloadValue::Json(v))).collect(),
        }
    }
}

/// Which reserved key a payload carried, with the files found under it.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadMode {
    Base64(Payload),
    FormData(Payload),
}

impl UploadMode {
    /// Strip both reserved keys from `payload` and pick the mode. The base64
    /// key wins when both are present.
    pub fn take(payload: &mut Payload, config: &ProviderConfig) -> Option<UploadMode> {
        let base64 = payload.remove(&config.base64_key).map(upload_fields);
        let form_data = payload.remove(&config.form_data_key).map(upload_fields);
        match (base64, form_data) {
            (Some(files), ignored) => {
                if ignored.is_some() {
                    tracing::warn!(
                        key = %config.form_data_key,
                        "both upload keys present, ignoring the form-data one"
                    );
                }
                Some(UploadMode::Base64(files))
            }
            (None, Some(files)) => Some(UploadMode::FormData(files)),
            (None, None) => None,
        }
    }
}

fn upload_fields(value: PayloadValue) -> Payload {
    match value {
        PayloadValue::Object(payload) => payload,
        PayloadValue::Json(json) => Payload::from_json(json),
        _ => Payload::new(),
    }
}

/// Outcome of [`transform`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransformedPayload {
    Json(Payload),
    Multipart(MultipartForm),
}

impl TransformedPayload {
    pub fn into_body(self) -> Result<RequestBody> {
        match self {
            TransformedPayload::Json(payload) => {
                let text = serde_json::to_string(&payload.to_json()?)
                    .map_err(|e| ApiError::SerializationError(e.to_string()))?;
                Ok(RequestBody::Json(text))
            }
            TransformedPayload::Multipart(form) => Ok(RequestBody::Multipart(form)),
        }
    }
}

/// Resolve upload keys so no raw blob is ever sent as JSON.
pub async fn transform(mut payload: Payload, config: &ProviderConfig) -> Result<TransformedPayload> {
    match UploadMode::take(&mut payload, config) {
        None => Ok(TransformedPayload::Json(payload)),
        Some(UploadMode::Base64(files)) => {
            tracing::debug!(fields = files.len(), "inlining uploads as base64");
            let encoded = try_join_all(files.iter().map(|(key, value)| async move {
                Ok::<_, ApiError>((key.to_string(), encode_base64(value).await?))
            }))
            .await?;
            for (key, value) in encoded {
                payload.insert(key, PayloadValue::Json(value));
            }
            Ok(TransformedPayload::Json(payload))
        }
        Some(UploadMode::FormData(files)) => {
            tracing::debug!(fields = files.len(), "sending uploads as multipart");
            for (key, value) in files.fields {
                payload.insert(key, load_blobs(value).await?);
            }
            let form = MultipartForm::from_payload(&payload)?;
            Ok(TransformedPayload::Multipart(form))
        }
    }
}

fn encode_base64(value: &PayloadValue) -> BoxFuture<'_, Result<Value>> {
    async move {
        match value {
            PayloadValue::File(blob) => Ok(Value::String(blob.to_data_url().await?)),
            PayloadValue::List(items) => Ok(Value::Array(try_join_all(items.iter().map(encode_base64)).await?)),
            PayloadValue::Object(nested) => {
                let mut map = Map::new();
                for (key, child) in nested.iter() {
                    map.insert(key.to_string(), encode_base64(child).await?);
                }
                Ok(Value::Object(map))
            }
            other => other.to_json(),
        }
    }
    .boxed()
}

fn load_blobs(value: PayloadValue) -> BoxFuture<'static, Result<PayloadValue>> {
    async move {
        match value {
            PayloadValue::File(blob) => Ok(PayloadValue::File(blob.load().await?)),
            PayloadValue::List(items) => Ok(PayloadValue::List(try_join_all(items.into_iter().map(load_blobs)).await?)),
            PayloadValue::Object(nested) => {
                let mut out = Payload::new();
                for (key, child) in nested.fields {
                    out.insert(key, load_blobs(child).await?);
                }
                Ok(PayloadValue::Object(out))
            }
            other => Ok(other),
        }
    }
    .boxed()
}

/// ISO-8601 with millisecond precision and a `Z` suffix.
pub fn iso_timestamp(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}
