//! Error types for framecast

use thiserror::Error;

use crate::types::PixelFormat;

/// Result type alias using CaptureError
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Main error type for capture operations
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No screen-share grant was published before the session started
    #[error("No capture grant available")]
    NoGrant,

    /// The companion service never reported readiness
    #[error("Capture service not ready after {0} ms")]
    ServiceNotReady(u64),

    /// The host window context could not be resolved
    #[error("Host window context unavailable")]
    NoWindowContext,

    /// The projection handle could not be obtained from the grant
    #[error("Projection unavailable: {0}")]
    NoProjection(String),

    /// The platform failed to allocate an image source or display sink
    #[error("Allocation failed: {0}")]
    Allocation(String),

    /// The producer wrote a format the pool did not ask for
    #[error("Pixel format mismatch: pool expects {expected}")]
    FormatMismatch {
        /// Format the pool was created with
        expected: PixelFormat,
    },

    /// A format mismatch happened on a format with no fallback
    #[error("No fallback pixel format after {0}")]
    FormatFallbackExhausted(PixelFormat),

    /// An acquired image carried a format that cannot be delivered
    #[error("Unsupported frame format: {0}")]
    UnsupportedFormat(PixelFormat),

    /// The session was already torn down
    #[error("Capture session destroyed")]
    SessionDestroyed,

    /// The session was already started
    #[error("Capture session already started")]
    SessionAlreadyStarted,

    /// Dispatch queue failure (worker gone or re-entrant sync)
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<CaptureError>,
    },
}

impl CaptureError {
    /// Create a projection error
    pub fn projection(msg: impl Into<String>) -> Self {
        Self::NoProjection(msg.into())
    }

    /// Create an allocation error
    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::Allocation(msg.into())
    }

    /// Create a dispatch error
    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::Dispatch(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error ends the capture session when raised on the
    /// dispatch queue
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::FormatFallbackExhausted(_)
            | Self::UnsupportedFormat(_)
            | Self::Allocation(_) => true,
            Self::WithContext { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// Short remediation hint for the user, if one applies
    pub fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::NoGrant => Some("Publish a screen-share grant before starting the session"),
            Self::ServiceNotReady(_) => {
                Some("The capture service must be running; raise service_ready_timeout_ms or start it first")
            }
            Self::NoWindowContext => Some("The host window must be attached before capture starts"),
            Self::NoProjection(_) => Some("The grant was rejected or has already been used"),
            Self::FormatFallbackExhausted(_) | Self::UnsupportedFormat(_) => {
                Some("The capture producer does not support any format this pool can read")
            }
            Self::Config(_) => Some("Check ~/.config/framecast/config.toml for invalid values"),
            Self::WithContext { source, .. } => source.user_hint(),
            _ => None,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}
