//! Capture session state machine.
//!
//! One [`CaptureSession`] is bound to one capture surface (file picker,
//! drop zone, camera, microphone). It owns at most one asset at a time and
//! moves through these states:
//!
//! ```text
//!            select(ok)             submit
//!   Idle ─────────────▶ Previewing ────────▶ Submitting ──resolve(ok)──▶ Idle (+ result)
//!    ▲  ◀──── clear ────────┘                  │   ▲
//!    │                                  resolve(err) retry
//!    │                                         ▼   │
//!    └──────────────── cancel ─────────────── Failed
//! ```
//!
//! The session is synchronous. Asynchronous work (the classifier call) is
//! represented by a [`SubmissionTicket`] issued on entry to `Submitting`;
//! the host feeds the outcome back through [`CaptureSession::resolve`]. A
//! ticket invalidated by `cancel` is discarded on arrival, so a late
//! response can never mutate a session the user already abandoned.

use std::fmt;

use thiserror::Error;

use crate::error::ErrorKind;
use crate::media::MediaValidator;
use crate::models::{IdentificationResult, MediaAsset, MediaFile};

/// Current state of a capture surface.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureState {
    Idle,
    Previewing(MediaAsset),
    Submitting(MediaAsset),
    Failed(MediaAsset, ErrorKind),
}

impl CaptureState {
    pub fn name(&self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::Previewing(_) => "previewing",
            CaptureState::Submitting(_) => "submitting",
            CaptureState::Failed(..) => "failed",
        }
    }

    pub fn asset(&self) -> Option<&MediaAsset> {
        match self {
            CaptureState::Idle => None,
            CaptureState::Previewing(a) | CaptureState::Submitting(a) | CaptureState::Failed(a, _) => {
                Some(a)
            }
        }
    }

    pub fn error(&self) -> Option<&ErrorKind> {
        match self {
            CaptureState::Failed(_, e) => Some(e),
            _ => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, CaptureState::Idle)
    }
}

/// User or host action applied to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureAction {
    Submit,
    Clear,
    Retry,
}

impl fmt::Display for CaptureAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CaptureAction::Submit => "submit",
            CaptureAction::Clear => "clear",
            CaptureAction::Retry => "retry",
        })
    }
}

/// An action that is not a transition out of the current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("a capture is already in progress (session is {state})")]
    Busy { state: &'static str },

    #[error("cannot {action} while {state}")]
    Invalid {
        action: CaptureAction,
        state: &'static str,
    },
}

/// Why `select` did not reach `Previewing`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Rejected(#[from] ErrorKind),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Identifies one entry into `Submitting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubmissionTicket(u64);

/// What happened to a submission outcome fed back into the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Terminal success; the session is idle again.
    Completed(IdentificationResult),
    /// The session moved to `Failed` and may be retried.
    Failed(ErrorKind),
    /// The ticket was stale; nothing changed.
    Discarded,
}

/// Notification sent to observers after every transition and after a
/// rejected selection.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub state: &'static str,
    pub asset_id: Option<String>,
    pub error: Option<ErrorKind>,
}

type Observer = Box<dyn Fn(&StateChange) + Send + Sync>;

/// The capture state machine for one surface.
pub struct CaptureSession {
    validator: MediaValidator,
    state: CaptureState,
    generation: u64,
    in_flight: Option<SubmissionTicket>,
    observers: Vec<Observer>,
}

impl fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSession")
            .field("state", &self.state.name())
            .field("in_flight", &self.in_flight)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl CaptureSession {
    pub fn new(validator: MediaValidator) -> Self {
        Self {
            validator,
            state: CaptureState::Idle,
            generation: 0,
            in_flight: None,
            observers: Vec::new(),
        }
    }

    /// Register an observer for state-change notifications.
    ///
    /// Observers run synchronously inside the transition, while the caller
    /// still holds `&mut self`. Code that shares a session behind a lock
    /// should queue changes here and deliver them after unlocking.
    pub fn subscribe(&mut self, observer: impl Fn(&StateChange) + Send + Sync + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn validator(&self) -> &MediaValidator {
        &self.validator
    }

    /// Ticket of the outstanding submission, if any.
    pub fn pending_ticket(&self) -> Option<SubmissionTicket> {
        self.in_flight
    }

    /// `Idle` → `Previewing` when `file` validates.
    ///
    /// A rejected file leaves the session idle and notifies observers with
    /// the error; the user may select again immediately.
    pub fn select(&mut self, file: &MediaFile) -> Result<MediaAsset, CaptureError> {
        if !self.state.is_idle() {
            return Err(TransitionError::Busy {
                state: self.state.name(),
            }
            .into());
        }
        match self.validator.validate(file) {
            Ok(asset) => {
                self.set_state(CaptureState::Previewing(asset.clone()));
                Ok(asset)
            }
            Err(kind) => {
                self.notify(StateChange {
                    state: self.state.name(),
                    asset_id: None,
                    error: Some(kind.clone()),
                });
                Err(kind.into())
            }
        }
    }

    /// `Previewing` → `Idle`, releasing the preview.
    pub fn clear(&mut self) -> Result<(), TransitionError> {
        match &self.state {
            CaptureState::Previewing(asset) => {
                self.validator.release(asset);
                self.set_state(CaptureState::Idle);
                Ok(())
            }
            other => Err(TransitionError::Invalid {
                action: CaptureAction::Clear,
                state: other.name(),
            }),
        }
    }

    /// `Previewing` → `Submitting`.
    pub fn submit(&mut self) -> Result<(SubmissionTicket, MediaAsset), TransitionError> {
        match &self.state {
            CaptureState::Previewing(asset) => {
                let asset = asset.clone();
                Ok(self.enter_submitting(asset))
            }
            other => Err(TransitionError::Invalid {
                action: CaptureAction::Submit,
                state: other.name(),
            }),
        }
    }

    /// `Failed` → `Submitting` with the same, already validated asset.
    pub fn retry(&mut self) -> Result<(SubmissionTicket, MediaAsset), TransitionError> {
        match &self.state {
            CaptureState::Failed(asset, _) => {
                let asset = asset.clone();
                Ok(self.enter_submitting(asset))
            }
            other => Err(TransitionError::Invalid {
                action: CaptureAction::Retry,
                state: other.name(),
            }),
        }
    }

    /// Feed a submission outcome back into the session.
    pub fn resolve(
        &mut self,
        ticket: SubmissionTicket,
        outcome: Result<IdentificationResult, ErrorKind>,
    ) -> Resolution {
        if self.in_flight != Some(ticket) {
            return Resolution::Discarded;
        }
        let asset = match &self.state {
            CaptureState::Submitting(asset) => asset.clone(),
            _ => return Resolution::Discarded,
        };
        self.in_flight = None;
        match outcome {
            Ok(result) => {
                self.validator.release(&asset);
                self.set_state(CaptureState::Idle);
                Resolution::Completed(result)
            }
            Err(kind) => {
                self.set_state(CaptureState::Failed(asset, kind.clone()));
                Resolution::Failed(kind)
            }
        }
    }

    /// Return to `Idle` from any state, releasing held media and abandoning
    /// any in-flight submission. Returns `false` when already idle.
    pub fn cancel(&mut self) -> bool {
        self.in_flight = None;
        let Some(asset) = self.state.asset().cloned() else {
            return false;
        };
        self.validator.release(&asset);
        self.set_state(CaptureState::Idle);
        true
    }

    fn enter_submitting(&mut self, asset: MediaAsset) -> (SubmissionTicket, MediaAsset) {
        self.generation += 1;
        let ticket = SubmissionTicket(self.generation);
        self.in_flight = Some(ticket);
        self.set_state(CaptureState::Submitting(asset.clone()));
        (ticket, asset)
    }

    fn set_state(&mut self, state: CaptureState) {
        self.state = state;
        let change = StateChange {
            state: self.state.name(),
            asset_id: self.state.asset().map(|a| a.id().to_string()),
            error: self.state.error().cloned(),
        };
        self.notify(change);
    }

    fn notify(&self, change: StateChange) {
        for observer in &self.observers {
            observer(&change);
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Some(asset) = self.state.asset() {
            self.validator.release(asset);
        }
    }
}
