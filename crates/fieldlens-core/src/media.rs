//! Media validation and preview lifecycle.
//!
//! [`MediaValidator::validate`] is the only way to obtain a [`MediaAsset`].
//! It enforces the vertical's [`MediaPolicy`] (size limit and accepted MIME
//! patterns) and, on success, allocates a preview in a shared
//! [`PreviewRegistry`]. Previews are `data:` URLs that a view can render
//! directly; they stay registered until released, so a leaked preview shows
//! up in [`PreviewRegistry::live_count`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::ErrorKind;
use crate::models::{MediaAsset, MediaFile};

/// 10 MiB.
pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;

pub const DEFAULT_IMAGE_ACCEPT: &[&str] = &["image/*"];

pub const DEFAULT_AUDIO_ACCEPT: &[&str] = &[
    "audio/webm",
    "audio/ogg",
    "audio/mpeg",
    "audio/mp4",
    "audio/wav",
    "audio/x-wav",
];

/// Lowercased MIME essence with parameters stripped: `"Audio/WebM; codecs=opus"` → `"audio/webm"`.
pub fn mime_essence(mime: &str) -> String {
    mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}

/// An accepted MIME pattern: `type/subtype` or `type/*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimePattern {
    kind: String,
    subtype: Option<String>,
}

impl MimePattern {
    pub fn matches(&self, mime: &str) -> bool {
        let essence = mime_essence(mime);
        let Some((kind, subtype)) = essence.split_once('/') else {
            return false;
        };
        if kind != self.kind || subtype.is_empty() {
            return false;
        }
        match &self.subtype {
            None => true,
            Some(s) => s == subtype,
        }
    }
}

impl FromStr for MimePattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let essence = mime_essence(s);
        let (kind, subtype) = essence
            .split_once('/')
            .ok_or_else(|| format!("invalid MIME pattern '{}': expected type/subtype", s))?;
        if kind.is_empty() || kind == "*" || subtype.is_empty() || subtype.contains('/') {
            return Err(format!("invalid MIME pattern '{}'", s));
        }
        Ok(Self {
            kind: kind.to_string(),
            subtype: if subtype == "*" {
                None
            } else {
                Some(subtype.to_string())
            },
        })
    }
}

impl fmt::Display for MimePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.subtype.as_deref().unwrap_or("*"))
    }
}

/// Size and type constraints for one vertical.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPolicy {
    pub max_bytes: u64,
    pub accept: Vec<MimePattern>,
}

impl Default for MediaPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            accept: parse_patterns(DEFAULT_IMAGE_ACCEPT),
        }
    }
}

impl MediaPolicy {
    /// Build a policy from pattern strings, rejecting malformed patterns.
    pub fn new<S: AsRef<str>>(max_bytes: u64, accept: &[S]) -> Result<Self, String> {
        let accept = accept
            .iter()
            .map(|p| p.as_ref().parse::<MimePattern>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { max_bytes, accept })
    }

    /// Additionally accept the default audio allowlist.
    pub fn with_audio(mut self) -> Self {
        self.accept.extend(parse_patterns(DEFAULT_AUDIO_ACCEPT));
        self
    }

    pub fn accepts(&self, mime: &str) -> bool {
        self.accept.iter().any(|p| p.matches(mime))
    }
}

fn parse_patterns(patterns: &[&str]) -> Vec<MimePattern> {
    patterns.iter().filter_map(|p| p.parse().ok()).collect()
}

/// A registered preview. Cheap to clone; equality is by registry id.
#[derive(Debug, Clone)]
pub struct PreviewHandle {
    id: u64,
    url: Arc<str>,
}

impl PreviewHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Renderable `data:` URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl PartialEq for PreviewHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PreviewHandle {}

/// Tracks live previews so repeated capture attempts cannot grow memory
/// without bound. Shared by every session on a surface.
#[derive(Debug, Default)]
pub struct PreviewRegistry {
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, Arc<str>>>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self, mime: &str, bytes: &[u8]) -> PreviewHandle {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let url: Arc<str> = Arc::from(format!("data:{};base64,{}", mime, encoded));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, url.clone());
        PreviewHandle { id, url }
    }

    /// Release a preview. Returns `false` when it was already released.
    pub fn release(&self, handle: &PreviewHandle) -> bool {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle.id)
            .is_some()
    }

    pub fn is_live(&self, handle: &PreviewHandle) -> bool {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&handle.id)
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Validates candidate files against a [`MediaPolicy`].
#[derive(Debug, Clone)]
pub struct MediaValidator {
    policy: MediaPolicy,
    previews: Arc<PreviewRegistry>,
}

impl MediaValidator {
    pub fn new(policy: MediaPolicy, previews: Arc<PreviewRegistry>) -> Self {
        Self { policy, previews }
    }

    pub fn policy(&self) -> &MediaPolicy {
        &self.policy
    }

    pub fn previews(&self) -> &Arc<PreviewRegistry> {
        &self.previews
    }

    /// Validate `file` and allocate its preview.
    ///
    /// Size is checked first, then emptiness, then type. A rejected file
    /// never allocates a preview.
    pub fn validate(&self, file: &MediaFile) -> Result<MediaAsset, ErrorKind> {
        let size = file.size();
        if size > self.policy.max_bytes {
            return Err(ErrorKind::TooLarge {
                size,
                max: self.policy.max_bytes,
            });
        }
        if size == 0 {
            return Err(ErrorKind::Empty);
        }
        let mime = mime_essence(&file.mime_type);
        if !self.policy.accepts(&mime) {
            return Err(ErrorKind::UnsupportedType(if mime.is_empty() {
                "unknown".to_string()
            } else {
                mime
            }));
        }

        let id = hex::encode(Sha256::digest(&file.bytes[..]));
        let preview = self.previews.allocate(&mime, &file.bytes);
        Ok(MediaAsset {
            id,
            name: file.name.clone(),
            mime_type: mime,
            bytes: file.bytes.clone(),
            preview,
        })
    }

    /// Release the preview held by `asset`.
    pub fn release(&self, asset: &MediaAsset) -> bool {
        self.previews.release(&asset.preview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaKind;

    const MIB: usize = 1024 * 1024;

    fn validator(policy: MediaPolicy) -> MediaValidator {
        MediaValidator::new(policy, Arc::new(PreviewRegistry::new()))
    }

    #[test]
    fn test_oversize_is_rejected_without_preview() {
        let v = validator(MediaPolicy::default());
        let file = MediaFile::new(Some("big.jpg".into()), "image/jpeg", vec![0u8; 12 * MIB]);
        let err = v.validate(&file).unwrap_err();
        assert_eq!(
            err,
            ErrorKind::TooLarge {
                size: (12 * MIB) as u64,
                max: DEFAULT_MAX_BYTES
            }
        );
        assert_eq!(v.previews().live_count(), 0);
    }

    #[test]
    fn test_exact_limit_is_accepted() {
        let v = validator(MediaPolicy::new(4, &["image/*"]).unwrap());
        let asset = v
            .validate(&MediaFile::new(None, "image/png", vec![1u8; 4]))
            .unwrap();
        assert_eq!(asset.size(), 4);
        assert_eq!(v.previews().live_count(), 1);
    }

    #[test]
    fn test_wrong_type_is_unsupported() {
        let v = validator(MediaPolicy::default());
        let err = v
            .validate(&MediaFile::new(None, "application/pdf", vec![1u8; 16]))
            .unwrap_err();
        assert_eq!(err, ErrorKind::UnsupportedType("application/pdf".into()));

        let err = v
            .validate(&MediaFile::new(None, "audio/webm", vec![1u8; 16]))
            .unwrap_err();
        assert!(matches!(err, ErrorKind::UnsupportedType(_)));
        assert_eq!(v.previews().live_count(), 0);
    }

    #[test]
    fn test_empty_file_rejected() {
        let v = validator(MediaPolicy::default());
        let err = v
            .validate(&MediaFile::new(None, "image/png", Vec::new()))
            .unwrap_err();
        assert_eq!(err, ErrorKind::Empty);
    }

    #[test]
    fn test_audio_vertical_accepts_allowlist_with_params() {
        let v = validator(MediaPolicy::default().with_audio());
        let asset = v
            .validate(&MediaFile::new(None, "Audio/WebM; codecs=opus", vec![7u8; 32]))
            .unwrap();
        assert_eq!(asset.mime_type(), "audio/webm");
        assert_eq!(asset.kind(), MediaKind::Audio);
        assert_eq!(asset.upload_name(), "capture.webm");

        let err = v
            .validate(&MediaFile::new(None, "audio/flac", vec![7u8; 32]))
            .unwrap_err();
        assert!(matches!(err, ErrorKind::UnsupportedType(_)));
    }

    #[test]
    fn test_preview_is_data_url_and_releases_once() {
        let v = validator(MediaPolicy::default());
        let asset = v
            .validate(&MediaFile::new(None, "image/png", b"abc".to_vec()))
            .unwrap();
        assert_eq!(asset.preview().url(), "data:image/png;base64,YWJj");
        assert_eq!(asset.id().len(), 64);
        assert!(v.release(&asset));
        assert!(!v.release(&asset));
        assert_eq!(v.previews().live_count(), 0);
    }

    #[test]
    fn test_pattern_parsing() {
        assert!("image/*".parse::<MimePattern>().unwrap().matches("IMAGE/HEIC"));
        assert!(!"image/png".parse::<MimePattern>().unwrap().matches("image/jpeg"));
        assert!("*/*".parse::<MimePattern>().is_err());
        assert!("image".parse::<MimePattern>().is_err());
        assert_eq!("audio/webm".parse::<MimePattern>().unwrap().to_string(), "audio/webm");
    }
}
