use reqwest::StatusCode;
use thiserror::Error;

/// Broad failure classes reported by [`LongPollError::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network failure, non-success status, timeout or cancellation.
    Transport,
    /// A required JSON field is missing or malformed.
    Decode,
    /// The server rejected the requested Long Poll version.
    Protocol,
    /// The client or the call options are not usable as configured.
    Configuration,
}

#[derive(Debug, Error)]
pub enum LongPollError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("request to {target} was cancelled")]
    Cancelled { target: String },

    #[error("deadline exceeded while waiting for {target}")]
    DeadlineExceeded { target: String },

    #[error("malformed field '{field}': {message}")]
    Decode { field: String, message: String },

    #[error("invalid server URL '{url}': {source}")]
    InvalidServerUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("long poll version {version} rejected by {url}")]
    VersionRejected { version: u32, url: String },

    #[error("no credential provider configured and no session to resume")]
    MissingCredentialProvider,

    #[error("invalid poll options: {0}")]
    InvalidOptions(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

impl LongPollError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Request { .. }
            | Self::Status { .. }
            | Self::Cancelled { .. }
            | Self::DeadlineExceeded { .. } => ErrorKind::Transport,
            Self::Decode { .. } | Self::InvalidServerUrl { .. } => ErrorKind::Decode,
            Self::VersionRejected { .. } => ErrorKind::Protocol,
            Self::MissingCredentialProvider | Self::InvalidOptions(_) | Self::HttpClient(_) => {
                ErrorKind::Configuration
            }
        }
    }

    /// True for caller-initiated aborts (cancellation or deadline expiry).
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::DeadlineExceeded { .. })
    }

    #[must_use]
    pub fn decode(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Wraps a transport failure. The URL embedded in `reqwest` errors is
    /// stripped because it carries the session key; `url` is expected to be
    /// redacted already.
    #[must_use]
    pub fn request(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Request {
            url: url.into(),
            source: source.without_url(),
        }
    }
}
