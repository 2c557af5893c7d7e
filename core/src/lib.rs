//! Data provider for REST backends speaking the NestJS CRUD query dialect.
//!
//! # Overview
//! Translates list/get/create/update/delete calls with pagination, sorting
//! and filtering into `filter=field||$op||value` style URLs, and reshapes the
//! JSON responses into `{data, total}` envelopes. File uploads are inlined as
//! base64 data URLs or sent as multipart forms; updates send only the fields
//! that changed.
//!
//! # Design
//! - `CrudClient` is stateless and does no I/O: `build_*` produces an
//!   `HttpRequest`, `parse_*` consumes an `HttpResponse`.
//! - `DataProvider` drives a caller-supplied `Transport` through those
//!   builders and parsers, fanning out the `*_many` operations concurrently.
//! - Records are untyped JSON objects; only the identifier field is assumed.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod multipart;
pub mod provider;
pub mod query;
pub mod types;
pub mod upload;

pub use client::CrudClient;
pub use config::ProviderConfig;
pub use error::{ApiError, Result};
pub use http::{HttpMethod, HttpRequest, HttpResponse, RequestBody};
pub use multipart::{MultipartForm, Part, PartValue};
pub use provider::{DataProvider, Transport};
pub use query::{CondOperator, Condition, RequestQuery};
pub use types::{
    CreateParams, DataResult, GetListParams, GetListResult, GetManyReferenceParams, Identifier,
    Pagination, Record, Sort, SortOrder, UpdateManyParams, UpdateParams,
};
pub use upload::{FileBlob, Payload, PayloadValue, TransformedPayload, UploadMode};
