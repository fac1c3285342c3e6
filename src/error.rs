//! Error taxonomy
//!
//! Gateway failures, client-side validation failures, and the write-path
//! wrapper that carries them to the viewer. Read paths never return these;
//! they degrade to empty slices instead.

use thiserror::Error;

/// Failure reported by the Remote Data Gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport-level failure (DNS, TLS, timeout)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-success HTTP status with the server's message
    #[error("gateway returned {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body or message
        message: String,
    },

    /// Unique constraint violated (duplicate edge row)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Requested row or object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Missing or rejected credentials
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Response body did not match the expected shape
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Object storage rejected the operation
    #[error("storage error: {0}")]
    Storage(String),
}

impl GatewayError {
    /// Map an HTTP status and body onto the taxonomy
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Unauthorized(message),
            404 => Self::NotFound(message),
            409 => Self::Conflict(message),
            _ => Self::Status { status, message },
        }
    }

    /// Whether repeating the same call may succeed
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Storage(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Input rejected before any gateway call is issued
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Post with neither text nor media
    #[error("a post needs text or media")]
    EmptyPost,
    /// Blank comment
    #[error("comment cannot be empty")]
    EmptyComment,
    /// Podcast without a title
    #[error("podcast needs a title")]
    MissingTitle,
    /// A required media file was not provided
    #[error("missing {0}")]
    MissingMedia(&'static str),
    /// Required auth field left blank
    #[error("please fill in all fields")]
    MissingField,
    /// Email does not look like an address
    #[error("invalid email address")]
    InvalidEmail,
    /// Password shorter than the backend minimum
    #[error("password must be at least {0} characters")]
    WeakPassword(usize),
    /// Bio longer than the allowed maximum
    #[error("bio must be at most {0} characters")]
    BioTooLong(usize),
    /// Following your own profile
    #[error("you cannot follow yourself")]
    SelfFollow,
}

/// Errors surfaced to the viewer on write paths
#[derive(Debug, Error)]
pub enum Error {
    /// Rejected client-side
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The action requires an authenticated viewer
    #[error("you must be signed in")]
    NotSignedIn,

    /// Media upload failed; the owning record was not written
    #[error("upload to {bucket} failed: {source}")]
    Upload {
        /// Target bucket name
        bucket: &'static str,
        /// Underlying gateway failure
        #[source]
        source: GatewayError,
    },

    /// Local file could not be read
    #[error("failed to read local file: {0}")]
    Io(#[from] std::io::Error),

    /// Gateway rejected the mutation
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl Error {
    /// Whether the viewer should be offered a retry
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Upload { .. } | Self::Io(_) => true,
            Self::Gateway(e) => e.is_transient(),
            Self::Validation(_) | Self::NotSignedIn => false,
        }
    }
}

/// Result alias for write paths
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(GatewayError::from_status(409, "dup"), GatewayError::Conflict(_)));
        assert!(matches!(GatewayError::from_status(401, "jwt"), GatewayError::Unauthorized(_)));
        assert!(matches!(GatewayError::from_status(404, "x"), GatewayError::NotFound(_)));
        assert!(matches!(
            GatewayError::from_status(500, "boom"),
            GatewayError::Status { status: 500, .. }
        ));
    }

    #[test]
    fn test_retryable() {
        let upload = Error::Upload {
            bucket: "avatars",
            source: GatewayError::Storage("quota".into()),
        };
        assert!(upload.is_retryable());
        assert!(!Error::from(ValidationError::EmptyPost).is_retryable());
        assert!(Error::from(GatewayError::from_status(503, "busy")).is_retryable());
        assert!(!Error::from(GatewayError::from_status(400, "bad")).is_retryable());
    }
}
