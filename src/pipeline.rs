//! Async driver for a [`CaptureSession`].
//!
//! The session itself is a synchronous state machine; this module runs the
//! classifier call for it. The session lock is never held across an await:
//! `submit` takes a ticket, releases the lock, awaits the classifier (racing
//! a cancellation token), then re-locks to resolve the ticket. A ticket that
//! was superseded or cancelled in the meantime is discarded without touching
//! the session.
//!
//! Observers never run under the session lock. The session reports each
//! transition into an outbox and the driver delivers the batch once the
//! guard is dropped, so an observer may call back into the driver.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use fieldlens_core::capture::{
    CaptureError, CaptureSession, CaptureState, Resolution, StateChange, SubmissionTicket,
    TransitionError,
};
use fieldlens_core::error::ErrorKind;
use fieldlens_core::media::{MediaValidator, PreviewRegistry};
use fieldlens_core::models::{MediaAsset, MediaFile};
use fieldlens_core::tier::PresentedResult;

use crate::analysis::Classifier;
use crate::config::VerticalConfig;

/// How a submission ended, from the caller's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Tiered result; the session is back to idle.
    Identified(PresentedResult),
    /// The session is parked in `Failed` and may be retried.
    Failed(ErrorKind),
    /// Cancelled or superseded; any late response was dropped.
    Cancelled,
}

struct Inner {
    session: CaptureSession,
    cancel: CancellationToken,
}

type Observer = Arc<dyn Fn(&StateChange) + Send + Sync>;

pub struct CaptureDriver {
    vertical: Arc<VerticalConfig>,
    classifier: Arc<dyn Classifier>,
    inner: Mutex<Inner>,
    outbox: Arc<Mutex<Vec<StateChange>>>,
    observers: RwLock<Vec<Observer>>,
}

impl CaptureDriver {
    pub fn new(
        vertical: Arc<VerticalConfig>,
        classifier: Arc<dyn Classifier>,
        previews: Arc<PreviewRegistry>,
    ) -> anyhow::Result<Self> {
        let validator = MediaValidator::new(vertical.media_policy()?, previews);
        let mut session = CaptureSession::new(validator);
        let outbox = Arc::new(Mutex::new(Vec::new()));
        let sink = outbox.clone();
        session.subscribe(move |change| sink.lock().push(change.clone()));
        Ok(Self {
            vertical,
            classifier,
            inner: Mutex::new(Inner {
                session,
                cancel: CancellationToken::new(),
            }),
            outbox,
            observers: RwLock::new(Vec::new()),
        })
    }

    pub fn vertical(&self) -> &VerticalConfig {
        &self.vertical
    }

    pub fn state(&self) -> CaptureState {
        self.inner.lock().session.state().clone()
    }

    /// Register an observer. It is called after the transition has been
    /// applied and the session lock released.
    pub fn subscribe(&self, observer: impl Fn(&StateChange) + Send + Sync + 'static) {
        self.observers.write().push(Arc::new(observer));
    }

    pub fn select(&self, file: &MediaFile) -> Result<MediaAsset, CaptureError> {
        let result = self.inner.lock().session.select(file);
        self.deliver();
        match &result {
            Ok(asset) => tracing::debug!(
                vertical = %self.vertical.name,
                media_id = %asset.id(),
                mime = %asset.mime_type(),
                bytes = asset.size(),
                "capture accepted"
            ),
            Err(e) => tracing::info!(vertical = %self.vertical.name, error = %e, "capture rejected"),
        }
        result
    }

    pub fn clear(&self) -> Result<(), TransitionError> {
        let result = self.inner.lock().session.clear();
        self.deliver();
        result
    }

    /// Abandon whatever is in progress. Preview resources are released
    /// before this returns; an in-flight response will be discarded.
    pub fn cancel(&self) -> bool {
        let cancelled = {
            let mut inner = self.inner.lock();
            inner.cancel.cancel();
            inner.session.cancel()
        };
        self.deliver();
        if cancelled {
            tracing::info!(vertical = %self.vertical.name, "capture cancelled");
        }
        cancelled
    }

    pub async fn submit(&self) -> Result<SubmitOutcome, TransitionError> {
        let (ticket, asset, token) = self.begin(|s| s.submit())?;
        Ok(self.run(ticket, asset, token).await)
    }

    /// Re-send the asset of a failed submission without re-validating it.
    pub async fn retry(&self) -> Result<SubmitOutcome, TransitionError> {
        let (ticket, asset, token) = self.begin(|s| s.retry())?;
        tracing::info!(vertical = %self.vertical.name, media_id = %asset.id(), "retrying submission");
        Ok(self.run(ticket, asset, token).await)
    }

    fn begin(
        &self,
        transition: impl FnOnce(
            &mut CaptureSession,
        ) -> Result<(SubmissionTicket, MediaAsset), TransitionError>,
    ) -> Result<(SubmissionTicket, MediaAsset, CancellationToken), TransitionError> {
        let begun = {
            let mut inner = self.inner.lock();
            transition(&mut inner.session).map(|(ticket, asset)| {
                inner.cancel = CancellationToken::new();
                (ticket, asset, inner.cancel.clone())
            })
        };
        self.deliver();
        begun
    }

    /// Hand queued notifications to observers. Must not be called with the
    /// session lock held.
    fn deliver(&self) {
        let changes = std::mem::take(&mut *self.outbox.lock());
        if changes.is_empty() {
            return;
        }
        let observers = self.observers.read().clone();
        for change in &changes {
            for observer in &observers {
                observer(change);
            }
        }
    }

    async fn run(
        &self,
        ticket: SubmissionTicket,
        asset: MediaAsset,
        token: CancellationToken,
    ) -> SubmitOutcome {
        let started = Instant::now();
        let outcome = tokio::select! {
            _ = token.cancelled() => None,
            outcome = self.classifier.submit(&self.vertical, &asset) => Some(outcome),
        };
        let Some(outcome) = outcome else {
            tracing::debug!(vertical = %self.vertical.name, "submission abandoned");
            return SubmitOutcome::Cancelled;
        };

        let resolution = self.inner.lock().session.resolve(ticket, outcome);
        self.deliver();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match resolution {
            Resolution::Completed(result) => {
                let presented = self.vertical.present(result);
                tracing::info!(
                    vertical = %self.vertical.name,
                    id = %presented.result.id,
                    confidence = presented.result.confidence_score,
                    tier = %presented.tier.tier,
                    elapsed_ms,
                    "identified"
                );
                SubmitOutcome::Identified(presented)
            }
            Resolution::Failed(kind) => {
                tracing::warn!(
                    vertical = %self.vertical.name,
                    code = kind.code(),
                    error = %kind,
                    elapsed_ms,
                    "submission failed"
                );
                SubmitOutcome::Failed(kind)
            }
            Resolution::Discarded => {
                tracing::debug!(vertical = %self.vertical.name, "discarded stale response");
                SubmitOutcome::Cancelled
            }
        }
    }
}
