//! Error taxonomy for the ingestion, retrieval, and chat pipeline.
//!
//! Library modules return [`Result`]; the binary wraps these in `anyhow`
//! and inspects [`RagError::is_endpoint`] / [`RagError::is_fatal`] to
//! decide whether a failure ends one turn or the whole session.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// A document or folder could not be ingested. Non-fatal per file.
    #[error("cannot ingest {}: {reason}", path.display())]
    Ingestion { path: PathBuf, reason: String },

    /// The persisted index failed a structural check. Requires a rebuild.
    #[error("vector store is corrupt: {0}")]
    StoreCorruption(String),

    #[error("embedding has {actual} dimensions, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("{endpoint} did not respond within {}s", timeout.as_secs())]
    EndpointTimeout { endpoint: String, timeout: Duration },

    #[error("{endpoint} is unavailable: {reason}")]
    EndpointUnavailable { endpoint: String, reason: String },

    #[error("{endpoint} rejected the request ({status}): {body}")]
    EndpointRejected {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    /// A second exchange was started before the first one finished.
    #[error("a response is already pending for this conversation")]
    ConversationBusy,

    #[error("no exchange is pending for this conversation")]
    NoPendingExchange,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    pub fn ingestion(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        RagError::Ingestion {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Failures of the serving endpoint. These abort only the current turn;
    /// retrying the same input may succeed.
    pub fn is_endpoint(&self) -> bool {
        matches!(
            self,
            RagError::EndpointTimeout { .. }
                | RagError::EndpointUnavailable { .. }
                | RagError::EndpointRejected { .. }
                | RagError::InvalidResponse { .. }
        )
    }

    /// Failures that must end the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RagError::StoreCorruption(_))
    }

    /// Classify a transport error from `reqwest` for the given endpoint.
    pub(crate) fn from_transport(endpoint: &str, timeout: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RagError::EndpointTimeout {
                endpoint: endpoint.to_string(),
                timeout,
            }
        } else if err.is_decode() {
            RagError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: err.to_string(),
            }
        } else {
            RagError::EndpointUnavailable {
                endpoint: endpoint.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
