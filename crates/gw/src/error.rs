//! Error taxonomy for gateway operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the gateway client.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request never completed: connection failure, timeout, or other
    /// transport-level problem. Retryable.
    #[error("gateway {context} failed: {source}")]
    Transport {
        /// Operation that failed, e.g. `upload <key>`.
        context: String,
        /// Underlying transport error.
        source: Box<ureq::Transport>,
    },
    /// The gateway answered with an unexpected HTTP status.
    #[error("gateway {context} failed with status {status}")]
    Status {
        /// Operation that failed.
        context: String,
        /// HTTP status code returned by the gateway.
        status: u16,
    },
    /// The gateway answered 2xx but the body did not parse.
    #[error("gateway {context} returned a malformed response: {source}")]
    MalformedResponse {
        /// Operation that failed.
        context: String,
        /// Underlying parse error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A local source file could not be read for upload.
    #[error("failed to read '{}' for upload: {source}", path.display())]
    Source {
        /// Path of the unreadable source file.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// An attempt to modify or re-commit a committed publish.
    #[error("publish {id} is already committed")]
    Committed {
        /// Id of the committed publish.
        id: String,
    },
    /// The operation was cancelled before completion.
    #[error("operation cancelled")]
    Cancelled,
}

impl GatewayError {
    pub(crate) fn from_ureq(context: &str, error: ureq::Error) -> Self {
        match error {
            ureq::Error::Status(status, _) => Self::Status {
                context: context.to_string(),
                status,
            },
            ureq::Error::Transport(transport) => Self::Transport {
                context: context.to_string(),
                source: Box::new(transport),
            },
        }
    }

    pub(crate) fn malformed(
        context: &str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::MalformedResponse {
            context: context.to_string(),
            source: Box::new(source),
        }
    }

    pub(crate) fn source_file(path: PathBuf, source: io::Error) -> Self {
        Self::Source { path, source }
    }

    /// Reports whether the failure is transient and worth retrying.
    ///
    /// Transport errors always are; HTTP statuses only for 5xx, 408, and
    /// 429. Everything else is fatal.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => {
                matches!(status, 408 | 429) || (500..=599).contains(status)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::GatewayError;

    fn status(code: u16) -> GatewayError {
        GatewayError::Status {
            context: "test".to_string(),
            status: code,
        }
    }

    #[test]
    fn retryable_statuses() {
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(status(408).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(403).is_retryable());
        assert!(!status(404).is_retryable());
    }

    #[test]
    fn non_status_kinds() {
        assert!(!GatewayError::Cancelled.is_retryable());
        assert!(!GatewayError::Committed {
            id: "x".to_string()
        }
        .is_retryable());
    }
}
