//! # fieldlens core
//!
//! Runtime-free logic shared by every identification vertical: the data
//! model, media validation, confidence tiering, the capture state machine,
//! collection semantics, and the collection backend trait.
//!
//! This crate contains no tokio, sqlx, network, or filesystem I/O. The
//! native host (`fieldlens`) drives the state machine asynchronously and
//! supplies the HTTP classifier and the SQLite collection backend.
//!
//! ```text
//! MediaFile ──▶ MediaValidator ──▶ CaptureSession ──▶ (classifier) ──▶ tier() ──▶ Collection
//! ```

pub mod capture;
pub mod collection;
pub mod error;
pub mod media;
pub mod models;
pub mod store;
pub mod tier;

pub use capture::{CaptureSession, CaptureState, StateChange};
pub use collection::{Collection, ListQuery, SaveOutcome, SortOrder};
pub use error::ErrorKind;
pub use media::{MediaPolicy, MediaValidator, PreviewRegistry};
pub use models::{CollectionEntry, IdentificationResult, MediaAsset, MediaFile, MediaKind};
pub use tier::{tier, ConfidenceScale, ConfidenceTier, PresentedResult, TierDisplay, TierPalette};
