//! Provider configuration, fixed at construction time.

use serde::{Deserialize, Serialize};

/// Reserved payload keys and the identifier field name.
///
/// Deserializes with per-field defaults so a partial JSON/TOML object only
/// needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Payload key whose files are inlined as base64 data URLs.
    pub base64_key: String,
    /// Payload key whose files switch the request to multipart encoding.
    pub form_data_key: String,
    /// Identifier field of every record.
    pub primary_key: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base64_key: "_base64Upload".to_string(),
            form_data_key: "_fileUpload".to_string(),
            primary_key: "id".to_string(),
        }
    }
}
