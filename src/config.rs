//! TOML configuration parsing and validation.
//!
//! Every vertical is configuration, not code: it names its classification
//! endpoint, accepted media, size limit, confidence scale, result schema,
//! tier copy, and collection. The pipeline itself is shared.
//!
//! ```toml
//! [db]
//! path = "./data/lens.sqlite"
//!
//! [verticals.plant]
//! endpoint = "https://api.example.com/identify/plant"
//! collection = "garden"
//! required_fields = ["name"]
//! display_fields = ["name", "scientific_name"]
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fieldlens_core::media::{MediaPolicy, DEFAULT_AUDIO_ACCEPT, DEFAULT_MAX_BYTES};
use fieldlens_core::models::{IdentificationResult, MediaKind};
use fieldlens_core::tier::{ConfidenceScale, PresentedResult, TierPalette};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub verticals: BTreeMap<String, VerticalConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `text` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

/// Transport defaults shared by all verticals.
#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_image_timeout")]
    pub image_timeout_secs: u64,
    #[serde(default = "default_audio_timeout")]
    pub audio_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            image_timeout_secs: default_image_timeout(),
            audio_timeout_secs: default_audio_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_image_timeout() -> u64 {
    30
}
fn default_audio_timeout() -> u64 {
    45
}
fn default_connect_timeout() -> u64 {
    10
}

/// One identification domain.
#[derive(Debug, Deserialize, Clone)]
pub struct VerticalConfig {
    /// Filled from the table key by [`load_config`].
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    pub endpoint: String,
    /// Collection name; defaults to the vertical name.
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_accept")]
    pub accept: Vec<String>,
    /// Accept recorded audio clips in addition to `accept`.
    #[serde(default)]
    pub audio: bool,
    #[serde(default = "default_audio_accept")]
    pub audio_accept: Vec<String>,
    #[serde(default)]
    pub confidence_scale: ConfidenceScale,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default = "default_display_fields")]
    pub display_fields: Vec<String>,
    /// Multipart field carrying the media; defaults to `image` or `audio`.
    #[serde(default)]
    pub media_field: Option<String>,
    /// Extra text fields sent with every submission.
    #[serde(default)]
    pub form_fields: BTreeMap<String, String>,
    /// Environment variable holding a bearer token for the endpoint.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub image_timeout_secs: Option<u64>,
    #[serde(default)]
    pub audio_timeout_secs: Option<u64>,
    #[serde(default)]
    pub tiers: TierPalette,
}

fn default_max_bytes() -> u64 {
    DEFAULT_MAX_BYTES
}
fn default_accept() -> Vec<String> {
    vec!["image/*".to_string()]
}
fn default_audio_accept() -> Vec<String> {
    DEFAULT_AUDIO_ACCEPT.iter().map(|s| s.to_string()).collect()
}
fn default_display_fields() -> Vec<String> {
    vec!["name".to_string()]
}

impl VerticalConfig {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    pub fn collection_name(&self) -> &str {
        self.collection.as_deref().unwrap_or(&self.name)
    }

    /// Accepted MIME patterns, including the audio allowlist when enabled.
    pub fn accepted_types(&self) -> Vec<String> {
        let mut types = self.accept.clone();
        if self.audio {
            types.extend(self.audio_accept.iter().cloned());
        }
        types
    }

    pub fn media_policy(&self) -> Result<MediaPolicy> {
        MediaPolicy::new(self.max_bytes, &self.accepted_types())
            .map_err(|e| anyhow::anyhow!("vertical '{}': {}", self.name, e))
    }

    pub fn timeout_for(&self, kind: MediaKind, defaults: &AnalysisConfig) -> Duration {
        let secs = match kind {
            MediaKind::Image => self.image_timeout_secs.unwrap_or(defaults.image_timeout_secs),
            MediaKind::Audio => self.audio_timeout_secs.unwrap_or(defaults.audio_timeout_secs),
        };
        Duration::from_secs(secs)
    }

    pub fn media_field_for(&self, kind: MediaKind) -> &str {
        self.media_field.as_deref().unwrap_or(kind.as_str())
    }

    /// Bearer token from the configured environment variable, if set.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|v| !v.trim().is_empty())
    }

    pub fn present(&self, result: IdentificationResult) -> PresentedResult {
        self.tiers.present(result)
    }
}

impl Config {
    pub fn vertical(&self, name: &str) -> Result<&VerticalConfig> {
        match self.verticals.get(name) {
            Some(v) => Ok(v),
            None => {
                let known: Vec<&str> = self.verticals.keys().map(String::as_str).collect();
                if known.is_empty() {
                    bail!("unknown vertical '{}': no verticals are configured", name)
                }
                bail!(
                    "unknown vertical '{}': expected one of {}",
                    name,
                    known.join(", ")
                )
            }
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    for (name, vertical) in config.verticals.iter_mut() {
        vertical.name = name.clone();
    }

    // Validate logging
    match config.logging.format.as_str() {
        "text" | "json" => {}
        other => bail!("logging.format must be text or json, got '{}'", other),
    }

    // Validate analysis
    if config.analysis.image_timeout_secs == 0 || config.analysis.audio_timeout_secs == 0 {
        bail!("analysis timeouts must be > 0");
    }

    // Validate verticals
    let mut collections = HashSet::new();
    for vertical in config.verticals.values() {
        let name = &vertical.name;
        if !(vertical.endpoint.starts_with("http://") || vertical.endpoint.starts_with("https://")) {
            bail!("verticals.{}.endpoint must be an http(s) URL", name);
        }
        if vertical.max_bytes == 0 {
            bail!("verticals.{}.max_bytes must be > 0", name);
        }
        if vertical.accepted_types().is_empty() {
            bail!("verticals.{} accepts no media types", name);
        }
        vertical.media_policy()?;
        if vertical.image_timeout_secs == Some(0) || vertical.audio_timeout_secs == Some(0) {
            bail!("verticals.{} timeouts must be > 0", name);
        }
        if !collections.insert(vertical.collection_name().to_string()) {
            bail!(
                "verticals.{}: collection '{}' is already used by another vertical",
                name,
                vertical.collection_name()
            );
        }
    }

    Ok(config)
}
