//! End-to-end pipeline tests against an in-process mock classifier.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::json;

use fieldlens::analysis::{Classifier, HttpClassifier};
use fieldlens::collection::CollectionStore;
use fieldlens::config::{parse_config, Config};
use fieldlens::pipeline::{CaptureDriver, SubmitOutcome};
use fieldlens_core::collection::SaveOutcome;
use fieldlens_core::error::ErrorKind;
use fieldlens_core::media::PreviewRegistry;
use fieldlens_core::models::MediaFile;
use fieldlens_core::store::memory::InMemoryBackend;
use fieldlens_core::ConfidenceTier;

#[derive(Debug, Clone, Default)]
struct Upload {
    media_field: String,
    file_name: Option<String>,
    content_type: Option<String>,
    bytes: Vec<u8>,
    text: Vec<(String, String)>,
    authorization: Option<String>,
}

#[derive(Default)]
struct Mock {
    calls: AtomicUsize,
    uploads: Mutex<Vec<Upload>>,
}

async fn classify(
    State(mock): State<Arc<Mock>>,
    Path(behavior): Path<String>,
    headers: axum::http::HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let mut upload = Upload {
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        ..Default::default()
    };
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        if field.file_name().is_some() {
            upload.media_field = name;
            upload.file_name = field.file_name().map(str::to_string);
            upload.content_type = field.content_type().map(str::to_string);
            upload.bytes = field.bytes().await.unwrap().to_vec();
        } else {
            upload.text.push((name, field.text().await.unwrap()));
        }
    }
    let call = mock.calls.fetch_add(1, Ordering::SeqCst) + 1;
    mock.uploads.lock().push(upload);

    match behavior.as_str() {
        "plant" => Json(json!({
            "id": "monstera-1",
            "confidence": 94.5,
            "name": "Monstera deliciosa",
            "scientific_name": "Monstera deliciosa",
            "care": { "light": "bright indirect" }
        }))
        .into_response(),
        "unit" => Json(json!({ "confidence": 0.82, "species": "Turdus migratorius" })).into_response(),
        "slow-once" => {
            if call == 1 {
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
            Json(json!({ "confidence": 80, "name": "Pothos" })).into_response()
        }
        "slow" => {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Json(json!({ "confidence": 99, "name": "Late" })).into_response()
        }
        "broken" => (StatusCode::INTERNAL_SERVER_ERROR, "model crashed").into_response(),
        "no-confidence" => Json(json!({ "name": "Fern" })).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn spawn_mock() -> (String, Arc<Mock>) {
    let mock = Arc::new(Mock::default());
    let app = Router::new()
        .route("/classify/{behavior}", post(classify))
        .layer(DefaultBodyLimit::max(32 * 1024 * 1024))
        .with_state(mock.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), mock)
}

fn config(base: &str) -> Config {
    parse_config(&format!(
        r#"
[db]
path = "unused.sqlite"

[verticals.plant]
endpoint = "{base}/classify/plant"
collection = "garden"
required_fields = ["name"]
display_fields = ["name", "scientific_name"]
api_key_env = "FIELDLENS_TEST_PLANT_KEY"

[verticals.plant.form_fields]
locale = "en-GB"

[verticals.bird]
endpoint = "{base}/classify/unit"
collection = "life-list"
audio = true
confidence_scale = "unit"
required_fields = ["species"]

[verticals.flaky]
endpoint = "{base}/classify/slow-once"
image_timeout_secs = 1

[verticals.slow]
endpoint = "{base}/classify/slow"

[verticals.broken]
endpoint = "{base}/classify/broken"

[verticals.sloppy]
endpoint = "{base}/classify/no-confidence"
"#
    ))
    .unwrap()
}

fn driver(config: &Config, vertical: &str) -> (CaptureDriver, Arc<PreviewRegistry>) {
    let classifier: Arc<dyn Classifier> = Arc::new(HttpClassifier::new(&config.analysis).unwrap());
    let previews = Arc::new(PreviewRegistry::new());
    let driver = CaptureDriver::new(
        Arc::new(config.vertical(vertical).unwrap().clone()),
        classifier,
        previews.clone(),
    )
    .unwrap();
    (driver, previews)
}

fn jpeg(len: usize) -> MediaFile {
    let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
    bytes.resize(len, 0x42);
    MediaFile::new(Some("monstera.jpg".into()), "image/jpeg", bytes)
}

#[tokio::test]
async fn test_identify_and_save_plant() {
    std::env::set_var("FIELDLENS_TEST_PLANT_KEY", "secret-token");
    let (base, mock) = spawn_mock().await;
    let config = config(&base);
    let (driver, previews) = driver(&config, "plant");

    let file = jpeg(2 * 1024 * 1024);
    let asset = driver.select(&file).unwrap();
    assert_eq!(previews.live_count(), 1);

    let outcome = driver.submit().await.unwrap();
    let SubmitOutcome::Identified(presented) = outcome else {
        panic!("expected a result, got {:?}", outcome);
    };
    assert_eq!(presented.result.id, "monstera-1");
    assert_eq!(presented.result.vertical, "plant");
    assert_eq!(presented.result.source_media_id, asset.id());
    assert_eq!(presented.result.confidence_score, 94.5);
    assert_eq!(presented.result.field_str("name"), Some("Monstera deliciosa"));
    assert_eq!(presented.tier.tier, ConfidenceTier::High);
    assert_eq!(presented.tier.color, "#16a34a");
    assert!(driver.state().is_idle());
    assert_eq!(previews.live_count(), 0);

    let uploads = mock.uploads.lock().clone();
    assert_eq!(uploads.len(), 1);
    let upload = &uploads[0];
    assert_eq!(upload.media_field, "image");
    assert_eq!(upload.file_name.as_deref(), Some("monstera.jpg"));
    assert_eq!(upload.content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(upload.bytes.len(), 2 * 1024 * 1024);
    assert!(upload.text.contains(&("vertical".to_string(), "plant".to_string())));
    assert!(upload.text.contains(&("locale".to_string(), "en-GB".to_string())));
    assert_eq!(upload.authorization.as_deref(), Some("Bearer secret-token"));

    let store = CollectionStore::for_vertical(
        config.vertical("plant").unwrap(),
        Arc::new(InMemoryBackend::new()),
    );
    assert_eq!(store.name(), "garden");
    assert_eq!(
        store.save(presented.result.clone()).await.unwrap(),
        SaveOutcome::Saved
    );
    assert_eq!(
        store.save(presented.result.clone()).await.unwrap(),
        SaveOutcome::AlreadySaved
    );
    assert_eq!(store.len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_oversize_never_reaches_classifier() {
    let (base, mock) = spawn_mock().await;
    let config = config(&base);
    let (driver, previews) = driver(&config, "plant");

    let err = driver.select(&jpeg(12 * 1024 * 1024)).unwrap_err();
    assert!(err.to_string().contains("larger than"), "{}", err);
    assert!(driver.state().is_idle());
    assert_eq!(previews.live_count(), 0);
    assert!(driver.submit().await.is_err());
    assert_eq!(mock.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unit_scale_audio_vertical() {
    let (base, mock) = spawn_mock().await;
    let config = config(&base);
    let (driver, _) = driver(&config, "bird");

    driver
        .select(&MediaFile::new(None, "audio/webm;codecs=opus", vec![1u8; 4096]))
        .unwrap();
    let SubmitOutcome::Identified(presented) = driver.submit().await.unwrap() else {
        panic!("expected a result");
    };
    assert!((presented.result.confidence_score - 82.0).abs() < 1e-9);
    assert_eq!(presented.tier.tier, ConfidenceTier::Good);

    let uploads = mock.uploads.lock().clone();
    assert_eq!(uploads[0].media_field, "audio");
    assert_eq!(uploads[0].file_name.as_deref(), Some("capture.webm"));
}

#[tokio::test]
async fn test_timeout_then_retry_resubmits_same_asset() {
    let (base, mock) = spawn_mock().await;
    let config = config(&base);
    let (driver, previews) = driver(&config, "flaky");

    let asset = driver.select(&jpeg(8 * 1024)).unwrap();
    let first = driver.submit().await.unwrap();
    assert_eq!(first, SubmitOutcome::Failed(ErrorKind::Timeout { secs: 1 }));
    let state = driver.state();
    assert_eq!(state.name(), "failed");
    assert_eq!(state.asset(), Some(&asset));
    assert_eq!(previews.live_count(), 1, "failed state keeps the preview");

    let second = driver.retry().await.unwrap();
    let SubmitOutcome::Identified(presented) = second else {
        panic!("expected retry to succeed, got {:?}", second);
    };
    assert_eq!(presented.result.source_media_id, asset.id());
    assert_eq!(presented.tier.tier, ConfidenceTier::Good);
    assert_eq!(mock.calls.load(Ordering::SeqCst), 2);

    let uploads = mock.uploads.lock().clone();
    assert_eq!(uploads[0].bytes, uploads[1].bytes);
    assert_eq!(previews.live_count(), 0);
}

#[tokio::test]
async fn test_server_error_and_malformed_response() {
    let (base, _) = spawn_mock().await;
    let config = config(&base);

    let (broken, _) = driver(&config, "broken");
    broken.select(&jpeg(1024)).unwrap();
    match broken.submit().await.unwrap() {
        SubmitOutcome::Failed(ErrorKind::ServerError { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "model crashed");
        }
        other => panic!("expected ServerError, got {:?}", other),
    }

    let (sloppy, _) = driver(&config, "sloppy");
    sloppy.select(&jpeg(1024)).unwrap();
    let outcome = sloppy.submit().await.unwrap();
    assert!(
        matches!(outcome, SubmitOutcome::Failed(ErrorKind::MalformedResponse(_))),
        "{:?}",
        outcome
    );
    assert_eq!(sloppy.state().name(), "failed");
}

#[tokio::test]
async fn test_unreachable_endpoint_is_network_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = config(&format!("http://127.0.0.1:{}", port));
    let (driver, _) = driver(&config, "plant");
    driver.select(&jpeg(1024)).unwrap();
    let outcome = driver.submit().await.unwrap();
    assert!(
        matches!(outcome, SubmitOutcome::Failed(ErrorKind::NetworkError(_))),
        "{:?}",
        outcome
    );
}

#[tokio::test]
async fn test_cancel_discards_late_response() {
    let (base, mock) = spawn_mock().await;
    let config = config(&base);
    let (driver, previews) = driver(&config, "slow");
    let driver = Arc::new(driver);
    let store = CollectionStore::for_vertical(
        config.vertical("slow").unwrap(),
        Arc::new(InMemoryBackend::new()),
    );

    driver.select(&jpeg(1024)).unwrap();
    let pending = {
        let driver = driver.clone();
        tokio::spawn(async move { driver.submit().await })
    };

    // Wait until the request has reached the classifier.
    for _ in 0..100 {
        if mock.calls.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(driver.state().name(), "submitting");
    assert!(driver.cancel());
    assert!(driver.state().is_idle());
    assert_eq!(previews.live_count(), 0);

    let outcome = pending.await.unwrap().unwrap();
    assert_eq!(outcome, SubmitOutcome::Cancelled);
    assert!(driver.state().is_idle());
    assert_eq!(store.len().await.unwrap(), 0);
}
