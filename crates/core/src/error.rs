/// Result alias that carries the custom [`TimelineError`] type.
pub type Result<T> = std::result::Result<T, TimelineError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum TimelineError {
    /// A clip could not occupy the requested interval on any candidate track.
    /// Callers may retry on another track or abandon the gesture.
    #[error("placement rejected: {0}")]
    PlacementRejected(String),
    /// Decoding or fetching an asset failed. Playback and rendering skip the
    /// clip; alignment reports it.
    #[error("asset `{url}` unavailable: {reason}")]
    AssetUnavailable { url: String, reason: String },
    /// Not enough transients or motion events to align a clip.
    #[error("not enough data to align: {0}")]
    AlignmentInsufficientData(String),
    /// A mutation precondition was violated; the composition is unchanged.
    #[error("invalid mutation: {0}")]
    InvalidMutation(String),
    /// Another offline render is still running.
    #[error("an offline render is already in progress")]
    RenderInProgress,
    /// The lossy encoder rejected the request or failed.
    #[error("encoding failed: {0}")]
    Encoding(String),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("wav: {0}")]
    Wav(#[from] hound::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl TimelineError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        Self::InvalidMutation(msg.into())
    }

    pub fn rejected<T: Into<String>>(msg: T) -> Self {
        Self::PlacementRejected(msg.into())
    }
}

impl From<&str> for TimelineError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for TimelineError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

/// Cloneable asset failure, shared between every waiter of a coalesced decode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("asset `{url}` unavailable: {reason}")]
pub struct AssetError {
    pub url: String,
    pub reason: String,
}

impl AssetError {
    pub fn new(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

impl From<AssetError> for TimelineError {
    fn from(value: AssetError) -> Self {
        Self::AssetUnavailable {
            url: value.url,
            reason: value.reason,
        }
    }
}
