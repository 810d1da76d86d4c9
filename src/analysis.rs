//! Remote classification client.
//!
//! A submission is one multipart `POST` to the vertical's endpoint carrying
//! the media part, a `vertical` text field, and any configured form fields.
//! The endpoint answers with a JSON object holding a numeric `confidence`
//! (on the vertical's declared scale), an optional `id`, and the
//! vertical-specific fields.
//!
//! Every failure maps onto one [`ErrorKind`]; nothing here is fatal and
//! nothing is retried automatically.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};

use fieldlens_core::error::ErrorKind;
use fieldlens_core::models::{IdentificationResult, MediaAsset};
use fieldlens_core::tier::ConfidenceScale;

use crate::config::{AnalysisConfig, VerticalConfig};

/// Longest server body kept on a [`ErrorKind::ServerError`].
const MAX_ERROR_BODY: usize = 512;

/// Submits a validated asset for one vertical.
///
/// The host drives this from the capture pipeline; tests substitute
/// their own implementation or point [`HttpClassifier`] at a mock server.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn submit(
        &self,
        vertical: &VerticalConfig,
        asset: &MediaAsset,
    ) -> Result<IdentificationResult, ErrorKind>;
}

pub struct HttpClassifier {
    client: reqwest::Client,
    defaults: AnalysisConfig,
}

impl HttpClassifier {
    pub fn new(defaults: &AnalysisConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(defaults.connect_timeout_secs))
            .user_agent(concat!("fieldlens/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            defaults: defaults.clone(),
        })
    }

    fn form(
        &self,
        vertical: &VerticalConfig,
        asset: &MediaAsset,
    ) -> Result<reqwest::multipart::Form, ErrorKind> {
        let part = media_part(asset.bytes().to_vec(), asset.upload_name(), asset.mime_type())?;

        let mut form = reqwest::multipart::Form::new()
            .text("vertical", vertical.name.clone())
            .part(vertical.media_field_for(asset.kind()).to_string(), part);
        for (key, value) in &vertical.form_fields {
            form = form.text(key.clone(), value.clone());
        }
        Ok(form)
    }
}

/// The upload part for one asset. A MIME type the multipart encoder cannot
/// carry is a media-type fault, not a transport one.
fn media_part(
    bytes: Vec<u8>,
    file_name: String,
    mime: &str,
) -> Result<reqwest::multipart::Part, ErrorKind> {
    reqwest::multipart::Part::bytes(bytes)
        .file_name(file_name)
        .mime_str(mime)
        .map_err(|_| ErrorKind::UnsupportedType(mime.to_string()))
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn submit(
        &self,
        vertical: &VerticalConfig,
        asset: &MediaAsset,
    ) -> Result<IdentificationResult, ErrorKind> {
        let limit = vertical.timeout_for(asset.kind(), &self.defaults);
        let form = self.form(vertical, asset)?;

        let mut request = self.client.post(&vertical.endpoint).multipart(form);
        if let Some(token) = vertical.api_key() {
            request = request.bearer_auth(token);
        }

        let started = Instant::now();
        tracing::debug!(
            vertical = %vertical.name,
            media_id = %asset.id(),
            bytes = asset.size(),
            timeout_secs = limit.as_secs(),
            "submitting to classifier"
        );

        // One deadline covers connect, upload, and reading the body.
        let exchange = async {
            let response = request.send().await.map_err(transport_error)?;
            let status = response.status();
            let body = response.text().await.map_err(transport_error)?;
            Ok::<_, ErrorKind>((status, body))
        };
        let (status, body) = match tokio::time::timeout(limit, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(vertical = %vertical.name, secs = limit.as_secs(), "classifier timed out");
                return Err(ErrorKind::Timeout {
                    secs: limit.as_secs(),
                });
            }
        };

        tracing::info!(
            vertical = %vertical.name,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "classifier responded"
        );

        if !status.is_success() {
            return Err(ErrorKind::ServerError {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        parse_response(vertical, asset.id(), &body)
    }
}

fn transport_error(e: reqwest::Error) -> ErrorKind {
    if e.is_timeout() {
        // reqwest only times out on connect here; report it as unreachable.
        ErrorKind::NetworkError(format!("connection timed out: {e}"))
    } else {
        ErrorKind::NetworkError(e.to_string())
    }
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

/// Turn a 2xx body into a result on the canonical 0–100 scale.
pub fn parse_response(
    vertical: &VerticalConfig,
    source_media_id: &str,
    body: &str,
) -> Result<IdentificationResult, ErrorKind> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ErrorKind::MalformedResponse(format!("body is not JSON: {e}")))?;
    let Value::Object(mut object) = value else {
        return Err(ErrorKind::MalformedResponse(
            "body is not a JSON object".to_string(),
        ));
    };

    let raw = match object.remove("confidence") {
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| {
            ErrorKind::MalformedResponse("confidence is not representable".to_string())
        })?,
        Some(other) => {
            return Err(ErrorKind::MalformedResponse(format!(
                "confidence is not a number: {}",
                other
            )))
        }
        None => {
            return Err(ErrorKind::MalformedResponse(
                "missing confidence".to_string(),
            ))
        }
    };
    let confidence_score = to_canonical(raw, vertical.confidence_scale)?;

    let id = match object.remove("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => uuid::Uuid::new_v4().to_string(),
    };

    check_required(&object, &vertical.required_fields)?;

    Ok(IdentificationResult {
        id,
        vertical: vertical.name.clone(),
        source_media_id: source_media_id.to_string(),
        confidence_score,
        fields: object,
        identified_at: Utc::now(),
    })
}

fn to_canonical(raw: f64, scale: ConfidenceScale) -> Result<f64, ErrorKind> {
    if !scale.contains(raw) {
        return Err(ErrorKind::MalformedResponse(format!(
            "confidence {} is outside the {} scale (0 to {})",
            raw,
            scale,
            scale.max()
        )));
    }
    Ok(scale.to_percent(raw))
}

fn check_required(fields: &Map<String, Value>, required: &[String]) -> Result<(), ErrorKind> {
    for name in required {
        match fields.get(name) {
            None | Some(Value::Null) => {
                return Err(ErrorKind::MalformedResponse(format!(
                    "missing required field '{}'",
                    name
                )))
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn vertical(extra: &str) -> VerticalConfig {
        let config = parse_config(&format!(
            "[db]\npath = 'x.sqlite'\n[verticals.plant]\nendpoint = \"http://127.0.0.1:1/\"\nrequired_fields = [\"name\"]\n{}",
            extra
        ))
        .unwrap();
        config.verticals["plant"].clone()
    }

    #[test]
    fn test_percent_response() {
        let v = vertical("");
        let r = parse_response(
            &v,
            "media",
            r#"{"id":"abc","confidence":94.5,"name":"Monstera deliciosa","care":{"water":"weekly"}}"#,
        )
        .unwrap();
        assert_eq!(r.id, "abc");
        assert_eq!(r.vertical, "plant");
        assert_eq!(r.source_media_id, "media");
        assert_eq!(r.confidence_score, 94.5);
        assert_eq!(r.field_str("name"), Some("Monstera deliciosa"));
        assert!(r.fields.get("confidence").is_none());
        assert!(r.fields.contains_key("care"));
    }

    #[test]
    fn test_unit_scale_is_converted() {
        let v = vertical("confidence_scale = \"unit\"");
        let r = parse_response(&v, "m", r#"{"confidence":0.82,"name":"Robin"}"#).unwrap();
        assert!((r.confidence_score - 82.0).abs() < 1e-9);
        assert!(!r.id.is_empty(), "generated id");
    }

    #[test]
    fn test_out_of_scale_is_malformed() {
        let unit = vertical("confidence_scale = \"unit\"");
        let err = parse_response(&unit, "m", r#"{"confidence":82,"name":"Robin"}"#).unwrap_err();
        assert!(matches!(err, ErrorKind::MalformedResponse(ref m) if m.contains("unit")));

        let percent = vertical("");
        assert!(parse_response(&percent, "m", r#"{"confidence":-1,"name":"x"}"#).is_err());
        assert!(parse_response(&percent, "m", r#"{"confidence":100.5,"name":"x"}"#).is_err());
    }

    #[test]
    fn test_malformed_bodies() {
        let v = vertical("");
        for body in [
            "not json",
            "[1,2,3]",
            r#"{"name":"Fern"}"#,
            r#"{"confidence":"high","name":"Fern"}"#,
            r#"{"confidence":80}"#,
            r#"{"confidence":80,"name":null}"#,
        ] {
            let err = parse_response(&v, "m", body).unwrap_err();
            assert!(
                matches!(err, ErrorKind::MalformedResponse(_)),
                "{} -> {:?}",
                body,
                err
            );
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        let long = "é".repeat(10);
        let cut = truncate(&long, 5);
        assert!(cut.ends_with('…'));
        assert!(cut.len() <= 5 + '…'.len_utf8());
    }

    #[test]
    fn test_unencodable_mime_is_a_media_fault() {
        let err = media_part(vec![1, 2, 3], "leaf.jpg".into(), "no slash here").unwrap_err();
        assert_eq!(err, ErrorKind::UnsupportedType("no slash here".into()));
        assert!(!err.is_retryable());
        assert!(media_part(vec![1, 2, 3], "leaf.jpg".into(), "image/jpeg").is_ok());
    }
}
