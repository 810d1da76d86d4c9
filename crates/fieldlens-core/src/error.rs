//! Failure taxonomy of the capture pipeline.
//!
//! Every failure a user can hit while capturing or submitting is one of
//! these kinds. None of them is fatal: validation failures leave the session
//! idle, submission failures park it in `Failed` where the same asset can be
//! retried.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    #[error("file is {size} bytes, larger than the {max} byte limit")]
    TooLarge { size: u64, max: u64 },

    #[error("unsupported media type: {0}")]
    UnsupportedType(String),

    #[error("file is empty")]
    Empty,

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("no response from classifier within {secs}s")]
    Timeout { secs: u64 },

    #[error("classifier returned HTTP {status}")]
    ServerError { status: u16, body: String },

    #[error("malformed classifier response: {0}")]
    MalformedResponse(String),
}

impl ErrorKind {
    /// Machine-readable code, stable across versions.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::TooLarge { .. } => "too_large",
            ErrorKind::UnsupportedType(_) => "unsupported_type",
            ErrorKind::Empty => "empty",
            ErrorKind::NetworkError(_) => "network_error",
            ErrorKind::Timeout { .. } => "timeout",
            ErrorKind::ServerError { .. } => "server_error",
            ErrorKind::MalformedResponse(_) => "malformed_response",
        }
    }

    /// Raised by the validator; the user must pick a different file.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ErrorKind::TooLarge { .. } | ErrorKind::UnsupportedType(_) | ErrorKind::Empty
        )
    }

    /// Raised by submission; the same asset may be sent again.
    pub fn is_retryable(&self) -> bool {
        !self.is_validation()
    }

    /// Sentence shown to the user.
    pub fn message(&self) -> String {
        match self {
            ErrorKind::TooLarge { max, .. } => format!(
                "That file is too large. Please choose one under {}.",
                human_bytes(*max)
            ),
            ErrorKind::UnsupportedType(mime) => format!(
                "Files of type '{}' are not supported here. Please choose a photo{}.",
                mime,
                if mime.starts_with("audio/") { " or a supported recording" } else { "" }
            ),
            ErrorKind::Empty => "That file is empty. Please choose another one.".to_string(),
            ErrorKind::NetworkError(_) => {
                "We couldn't reach the identification service. Check your connection and try again.".to_string()
            }
            ErrorKind::Timeout { .. } => {
                "The identification is taking too long. Please try again.".to_string()
            }
            ErrorKind::ServerError { status, .. } => format!(
                "The identification service had a problem (HTTP {}). Please try again.",
                status
            ),
            ErrorKind::MalformedResponse(_) => {
                "We got an unexpected answer from the identification service. Please try again.".to_string()
            }
        }
    }
}

fn human_bytes(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    const KIB: u64 = 1024;
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{} MB", bytes / MIB)
    } else if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{} KB", bytes / KIB)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_and_retry_classes_are_disjoint() {
        let all = [
            ErrorKind::TooLarge { size: 2, max: 1 },
            ErrorKind::UnsupportedType("text/plain".into()),
            ErrorKind::Empty,
            ErrorKind::NetworkError("refused".into()),
            ErrorKind::Timeout { secs: 30 },
            ErrorKind::ServerError { status: 500, body: String::new() },
            ErrorKind::MalformedResponse("missing confidence".into()),
        ];
        for kind in &all {
            assert_ne!(kind.is_validation(), kind.is_retryable(), "{:?}", kind);
        }
        assert_eq!(all.iter().filter(|k| k.is_retryable()).count(), 4);
    }

    #[test]
    fn test_too_large_message_uses_megabytes() {
        let kind = ErrorKind::TooLarge {
            size: 12 * 1024 * 1024,
            max: 10 * 1024 * 1024,
        };
        assert!(kind.message().contains("10 MB"));
        assert_eq!(kind.code(), "too_large");
    }
}
