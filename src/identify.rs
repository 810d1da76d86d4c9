//! `lens identify`: run one file through the capture pipeline.
//!
//! The CLI plays the capture surface (the file on disk is the capture) and
//! the result presenter (a tiered summary on stdout).

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use fieldlens_core::capture::CaptureError;
use fieldlens_core::collection::SaveOutcome;
use fieldlens_core::error::ErrorKind;
use fieldlens_core::media::PreviewRegistry;
use fieldlens_core::models::MediaFile;
use fieldlens_core::tier::PresentedResult;

use crate::analysis::{Classifier, HttpClassifier};
use crate::collection::CollectionStore;
use crate::config::{Config, VerticalConfig};
use crate::pipeline::{CaptureDriver, SubmitOutcome};
use crate::sqlite_store::SqliteBackend;

/// Options for [`run_identify`].
#[derive(Debug, Clone, Default)]
pub struct IdentifyOptions {
    /// Explicit MIME type; inferred from the extension otherwise.
    pub mime: Option<String>,
    /// Save a successful result to the vertical's collection.
    pub save: bool,
    /// Extra attempts after a retryable failure.
    pub retries: u32,
    /// Print the presented result as JSON.
    pub json: bool,
}

/// Best-effort MIME type from a file extension.
pub fn guess_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "webm" => "audio/webm",
        "ogg" | "oga" | "opus" => "audio/ogg",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        _ => return None,
    };
    Some(mime)
}

pub async fn run_identify(
    config: &Config,
    vertical_name: &str,
    path: &Path,
    options: &IdentifyOptions,
) -> Result<()> {
    let vertical = config.vertical(vertical_name)?.clone();
    let classifier: Arc<dyn Classifier> = Arc::new(HttpClassifier::new(&config.analysis)?);
    let presented = identify_file(classifier, &vertical, path, options).await?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&presented)?);
    } else {
        print_result(&vertical, &presented);
    }

    if options.save {
        let backend = Arc::new(SqliteBackend::open(config).await?);
        let store = CollectionStore::for_vertical(&vertical, backend);
        match store.save(presented.result.clone()).await? {
            SaveOutcome::Saved => eprintln!("Saved to {}.", store.name()),
            SaveOutcome::AlreadySaved => eprintln!("Already in {}.", store.name()),
        }
    }
    Ok(())
}

/// Validate, submit, and retry up to `options.retries` times.
pub async fn identify_file(
    classifier: Arc<dyn Classifier>,
    vertical: &VerticalConfig,
    path: &Path,
    options: &IdentifyOptions,
) -> Result<PresentedResult> {
    let bytes = read_capped(path, vertical.max_bytes)?;
    let mime = match options.mime.as_deref() {
        Some(m) => m.to_string(),
        None => guess_mime(path)
            .map(str::to_string)
            .with_context(|| {
                format!(
                    "cannot infer the media type of {}; pass --mime",
                    path.display()
                )
            })?,
    };
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
    let file = MediaFile::new(name, mime, bytes);

    let driver = CaptureDriver::new(
        Arc::new(vertical.clone()),
        classifier,
        Arc::new(PreviewRegistry::new()),
    )?;

    if let Err(e) = driver.select(&file) {
        match e {
            CaptureError::Rejected(kind) => bail!("{}", kind.message()),
            CaptureError::Transition(t) => return Err(t.into()),
        }
    }

    let mut outcome = driver.submit().await?;
    let mut attempts_left = options.retries;
    loop {
        match outcome {
            SubmitOutcome::Identified(presented) => return Ok(presented),
            SubmitOutcome::Failed(kind) if kind.is_retryable() && attempts_left > 0 => {
                attempts_left -= 1;
                eprintln!("{} Retrying...", kind.message());
                outcome = driver.retry().await?;
            }
            SubmitOutcome::Failed(kind) => {
                tracing::debug!(code = kind.code(), detail = %kind, "identify failed");
                bail!("{}", kind.message())
            }
            SubmitOutcome::Cancelled => bail!("identification was cancelled"),
        }
    }
}

/// Read at most `max + 1` bytes, failing early when the file is already
/// known to be over the limit. One byte past `max` is enough for the
/// validator to reject a file that grew after the size check.
fn read_capped(path: &Path, max: u64) -> Result<Vec<u8>> {
    let file = File::open(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let size = file
        .metadata()
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();
    if size > max {
        tracing::debug!(path = %path.display(), size, max, "file over size limit");
        bail!("{}", ErrorKind::TooLarge { size, max }.message());
    }
    let mut bytes = Vec::with_capacity(size as usize);
    file.take(max.saturating_add(1))
        .read_to_end(&mut bytes)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(bytes)
}

fn print_result(vertical: &VerticalConfig, presented: &PresentedResult) {
    let result = &presented.result;
    let name = result
        .display_name(&vertical.display_fields)
        .unwrap_or("(unnamed)");
    println!("{}", name);
    println!(
        "    {} ({:.1}%)",
        presented.tier.label, result.confidence_score
    );
    for field in &vertical.display_fields {
        if let Some(value) = result.fields.get(field) {
            let shown = match value.as_str() {
                Some(s) => s.to_string(),
                None => value.to_string(),
            };
            println!("    {}: {}", field, shown);
        }
    }
    println!("    id: {}", result.id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime(Path::new("leaf.JPG")), Some("image/jpeg"));
        assert_eq!(guess_mime(Path::new("song.webm")), Some("audio/webm"));
        assert_eq!(guess_mime(Path::new("notes.txt")), None);
        assert_eq!(guess_mime(Path::new("noext")), None);
    }

    #[test]
    fn test_read_capped_rejects_before_reading() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("huge.jpg");
        std::fs::write(&path, vec![0u8; 8192]).unwrap();

        let err = read_capped(&path, 4096).unwrap_err().to_string();
        assert!(err.contains("too large"), "{}", err);
        assert!(err.contains("4 KB"), "{}", err);

        assert_eq!(read_capped(&path, 8192).unwrap().len(), 8192);
        assert!(read_capped(&dir.path().join("missing.jpg"), 4096).is_err());
    }

    /// Fails the test if the size check ever lets a file through.
    struct Unreachable;

    #[async_trait::async_trait]
    impl Classifier for Unreachable {
        async fn submit(
            &self,
            _vertical: &VerticalConfig,
            _asset: &fieldlens_core::models::MediaAsset,
        ) -> Result<fieldlens_core::models::IdentificationResult, ErrorKind> {
            panic!("oversize file reached the classifier");
        }
    }

    #[tokio::test]
    async fn test_identify_file_stops_oversize_file() {
        let config = crate::config::parse_config(
            "[db]\npath = 'x.sqlite'\n[verticals.plant]\nendpoint = \"http://127.0.0.1:9/\"\nmax_bytes = 1024\n",
        )
        .unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("leaf.jpg");
        std::fs::write(&path, vec![0xABu8; 2048]).unwrap();

        let err = identify_file(
            Arc::new(Unreachable),
            &config.verticals["plant"],
            &path,
            &IdentifyOptions::default(),
        )
        .await
        .unwrap_err()
        .to_string();
        assert!(err.contains("too large"), "{}", err);
    }
}
