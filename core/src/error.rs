//! Error types for the CRUD data provider.
//!
//! # Design
//! `NotFound` gets a dedicated variant because callers frequently distinguish
//! "the record does not exist" from "the server returned an unexpected
//! status." All other non-2xx responses land in `HttpError` with the raw
//! status code and body for debugging. Nothing here is recovered locally;
//! every variant reaches the caller unchanged.

/// Errors returned by `CrudClient` and `DataProvider`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The server returned 404.
    #[error("resource not found")]
    NotFound,

    /// The server returned a non-2xx status other than 404.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The transport could not complete the round-trip.
    #[error("transport failed: {0}")]
    Transport(String),

    /// The response body could not be deserialized into the expected shape.
    #[error("deserialization failed: {0}")]
    DeserializationError(String),

    /// The request payload could not be serialized.
    #[error("serialization failed: {0}")]
    SerializationError(String),

    /// The response parsed as JSON but does not have the expected envelope.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A created record came back without its identifier field.
    #[error("response record has no `{0}` field")]
    MissingIdentifier(String),

    /// A filter key named an operator the backend does not know.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// A file blob could not be read for upload.
    #[error("failed to read upload: {0}")]
    FileRead(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ApiError>;
