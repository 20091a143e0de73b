use thiserror::Error;

/// Failures surfaced by batch execution.
///
/// Cancellation has no variant here: a dispatch is cancelled by dropping
/// the `execute_batch` future, which leaves the batch un-executed (see
/// `BatchClient::execute_batch`).
#[derive(Debug, Error)]
pub enum ConvoyError {
    #[error("Transport failure: server returned HTTP {status}: {body}")]
    TransportFailure { status: u16, body: String },

    #[error("Sub-request failed: {url} returned {status}: {body}")]
    SubRequestFailed {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Malformed batch response: {0}")]
    MalformedResponse(String),

    #[error("Precondition violated: {0}")]
    Precondition(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid request: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

impl ConvoyError {
    /// Create a sub-request failure naming the originating request
    pub fn sub_request(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::SubRequestFailed {
            url: url.into(),
            status,
            body: body.into(),
        }
    }

    /// Check if the error is retryable at the transport layer
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::TransportFailure { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// The HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::TransportFailure { status, .. } | Self::SubRequestFailed { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvoyError>;
