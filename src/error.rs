use std::sync::Arc;

/// Represents a result type for operations in the Split SDK.
///
/// This `Result` type is a standard Rust `Result` type where the error variant is defined by the
/// split-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the Split SDK.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Invalid sdk_url configuration.
    #[error("invalid sdk_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The request was unauthorized, possibly due to an invalid API key.
    #[error("unauthorized, api_key is likely invalid")]
    Unauthorized,

    /// The server responded with a payload we could not decode.
    #[error("unexpected response from server: {0}")]
    UnexpectedResponse(String),

    /// An on-demand synchronization gave up before reaching the requested change number.
    #[error("synchronization did not reach change number {till}")]
    SynchronizationFailed {
        /// Change number that was requested.
        till: i64,
    },

    /// Storage lock is poisoned (a writer panicked while holding it).
    #[error("storage is unavailable")]
    StorageUnavailable,

    /// Indicates that the poller thread panicked. This should normally never happen.
    #[error("poller thread panicked")]
    PollerThreadPanicked,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl Error {
    /// Return `true` if retrying the operation later cannot succeed.
    pub(crate) fn is_unrecoverable(&self) -> bool {
        matches!(self, Error::Unauthorized | Error::InvalidBaseUrl(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

/// Structural failure while evaluating a flag. Surfaces to callers as treatment `"control"` with
/// label `"exception"`.
///
/// Matcher-level problems (missing attributes, wrong types, bad regex) never end up here: they
/// are simply a non-match for that matcher.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum EvaluationError {
    /// Storage could not be read.
    #[error("storage is unavailable")]
    StorageUnavailable,
    /// Evaluation panicked.
    #[error("evaluation panicked")]
    Panicked,
}

/// Error decoding a matcher or condition from the wire format.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// Matcher type requires data that is absent from the payload.
    #[error("matcher is missing {field}")]
    MissingMatcherData {
        /// Name of the missing wire field.
        field: &'static str,
    },
    /// Regex for `MATCHES_STRING` failed to compile.
    #[error("invalid regex: {0}")]
    InvalidRegex(String),
    /// A semver literal failed to parse.
    #[error("invalid semver: {0}")]
    InvalidSemver(String),
}
