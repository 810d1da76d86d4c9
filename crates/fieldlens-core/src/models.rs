//! Core data models that flow through the capture pipeline.
//!
//! A [`MediaFile`] is whatever the capture surface hands over (file picker,
//! drag/drop, camera, microphone). Validation turns it into an immutable
//! [`MediaAsset`]; classification turns an asset into an
//! [`IdentificationResult`]; saving wraps a result in a [`CollectionEntry`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::media::PreviewHandle;
use crate::tier::{tier, ConfidenceScale, ConfidenceTier};

/// A candidate file before validation.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub name: Option<String>,
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
}

impl MediaFile {
    pub fn new(name: Option<String>, mime_type: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self {
            name,
            mime_type: mime_type.into(),
            bytes: Arc::from(bytes),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Broad media family of an asset. Drives submission timeouts and the
/// default multipart field name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Audio,
}

impl MediaKind {
    /// Classify a normalized MIME type. Anything that is not `audio/*` is
    /// treated as an image, since the validator only admits those two families.
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("audio/") {
            MediaKind::Audio
        } else {
            MediaKind::Image
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
        }
    }
}

/// A validated, immutable media value.
///
/// Cloning is cheap: the bytes and the preview URL are shared. The preview
/// handle stays live in its [`PreviewRegistry`](crate::media::PreviewRegistry)
/// until the owning capture session releases it.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaAsset {
    pub(crate) id: String,
    pub(crate) name: Option<String>,
    pub(crate) mime_type: String,
    pub(crate) bytes: Arc<[u8]>,
    pub(crate) preview: PreviewHandle,
}

impl MediaAsset {
    /// Content id: hex SHA-256 of the bytes. Used as `source_media_id`.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn kind(&self) -> MediaKind {
        MediaKind::from_mime(&self.mime_type)
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn preview(&self) -> &PreviewHandle {
        &self.preview
    }

    /// File name for upload: the original name, or `capture.<subtype>`.
    pub fn upload_name(&self) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => {
                let ext = self
                    .mime_type
                    .split('/')
                    .nth(1)
                    .map(|s| s.trim_start_matches("x-"))
                    .filter(|s| !s.is_empty() && *s != "*")
                    .unwrap_or("bin");
                format!("capture.{}", ext)
            }
        }
    }
}

/// A classification returned by a vertical's endpoint.
///
/// `confidence_score` is always on the 0–100 scale; conversion from a
/// vertical's native scale happens when the response is parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentificationResult {
    pub id: String,
    pub vertical: String,
    pub source_media_id: String,
    pub confidence_score: f64,
    /// Vertical-specific payload (name, care tips, grade, form score, ...).
    #[serde(default)]
    pub fields: Map<String, Value>,
    pub identified_at: DateTime<Utc>,
}

impl IdentificationResult {
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Tier recomputed from the stored score on every call.
    pub fn tier(&self) -> ConfidenceTier {
        tier(self.confidence_score, ConfidenceScale::Percent)
    }

    /// Best display name: the first listed field holding a string.
    pub fn display_name(&self, display_fields: &[String]) -> Option<&str> {
        display_fields.iter().find_map(|f| self.field_str(f))
    }
}

/// A saved identification. `id` equals the identification id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub id: String,
    pub payload: IdentificationResult,
    pub added_at: DateTime<Utc>,
}

impl CollectionEntry {
    pub fn new(payload: IdentificationResult, added_at: DateTime<Utc>) -> Self {
        Self {
            id: payload.id.clone(),
            payload,
            added_at,
        }
    }
}
