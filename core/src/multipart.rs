//! Multipart form bodies.
//!
//! # Design
//! A `MultipartForm` is an ordered list of named parts. The boundary is fixed
//! when the form is created so the `content-type` header can be set while the
//! request is built, before anything is encoded.

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::error::ApiError;
use crate::upload::{Payload, PayloadValue};

#[derive(Debug, Clone, PartialEq)]
pub enum PartValue {
    Text(String),
    File {
        filename: String,
        content_type: String,
        data: Bytes,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub name: String,
    pub value: PartValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultipartForm {
    boundary: String,
    parts: Vec<Part>,
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::with_boundary(format!("crud-provider-{}", Uuid::new_v4().simple()))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// First part with the given name.
    pub fn get(&self, name: &str) -> Option<&PartValue> {
        self.parts.iter().find(|part| part.name == name).map(|part| &part.value)
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push_text(name, value);
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.parts.push(Part {
            name: name.into(),
            value: PartValue::File {
                filename: filename.into(),
                content_type: content_type.into(),
                data: data.into(),
            },
        });
        self
    }

    fn push_text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.parts.push(Part {
            name: name.into(),
            value: PartValue::Text(value.into()),
        });
    }

    /// Serialize a payload with bracketed key paths: `author[name]` for
    /// nested objects, `tags[]` for list items. Dates become ISO-8601, null
    /// becomes an empty string, empty lists are skipped.
    ///
    /// Every file blob must already be resident in memory.
    pub fn from_payload(payload: &Payload) -> Result<Self, ApiError> {
        let mut form = Self::new();
        for (key, value) in payload.iter() {
            form.append_value(key.to_string(), value)?;
        }
        Ok(form)
    }

    fn append_value(&mut self, name: String, value: &PayloadValue) -> Result<(), ApiError> {
        match value {
            PayloadValue::Json(json) => self.append_json(name, json),
            PayloadValue::Date(date) => self.push_text(name, crate::upload::iso_timestamp(date)),
            PayloadValue::File(blob) => {
                let data = blob.resident_bytes().ok_or_else(|| {
                    ApiError::SerializationError(format!("file `{}` was not loaded", blob.filename))
                })?;
                self.parts.push(Part {
                    name,
                    value: PartValue::File {
                        filename: blob.filename.clone(),
                        content_type: blob.content_type.clone(),
                        data: data.clone(),
                    },
                });
            }
            PayloadValue::List(items) => {
                for item in items {
                    self.append_value(format!("{name}[]"), item)?;
                }
            }
            PayloadValue::Object(nested) => {
                for (key, child) in nested.iter() {
                    self.append_value(format!("{name}[{key}]"), child)?;
                }
            }
        }
        Ok(())
    }

    fn append_json(&mut self, name: String, value: &serde_json::Value) {
        use serde_json::Value;
        match value {
            Value::Null => self.push_text(name, ""),
            Value::String(s) => self.push_text(name, s.clone()),
            Value::Array(items) => {
                for item in items {
                    self.append_json(format!("{name}[]"), item);
                }
            }
            Value::Object(map) => {
                for (key, child) in map {
                    self.append_json(format!("{name}[{key}]"), child);
                }
            }
            other => self.push_text(name, other.to_string()),
        }
    }

    /// `content-type` header value for this form.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Encode the form as a `multipart/form-data` body.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for part in &self.parts {
            buf.put_slice(format!("--{}\r\n", self.boundary).as_bytes());
            match &part.value {
                PartValue::Text(text) => {
                    buf.put_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", escape_quotes(&part.name))
                            .as_bytes(),
                    );
                    buf.put_slice(text.as_bytes());
                }
                PartValue::File {
                    filename,
                    content_type,
                    data,
                } => {
                    buf.put_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                            escape_quotes(&part.name),
                            escape_quotes(filename),
                            content_type
                        )
                        .as_bytes(),
                    );
                    buf.put_slice(data);
                }
            }
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        buf.freeze()
    }
}

fn escape_quotes(s: &str) -> String {
    s.replace('"', "%22")
}
