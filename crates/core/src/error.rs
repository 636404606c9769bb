use crate::fixtures::FixtureKind;

/// Result alias that carries the custom [`LightshowError`] type.
pub type Result<T> = std::result::Result<T, LightshowError>;

/// Common error type for the core crate.
///
/// Input validation errors abort a generation run before any scheduling
/// happens. Serialization errors only affect the file being written; the
/// in-memory [`Timeline`](crate::Timeline) stays valid.
#[derive(Debug, thiserror::Error)]
pub enum LightshowError {
    /// A required sequence is empty, non-monotonic, or sections overlap.
    #[error("invalid analysis record: {0}")]
    InvalidAnalysisRecord(String),
    /// The fixture catalog itself is malformed (duplicate ids, bad limits).
    #[error("invalid fixture catalog: {0}")]
    InvalidFixtureCatalog(String),
    /// A selection rule targets a fixture kind the catalog does not contain.
    #[error("rule `{rule}` targets fixture kind `{kind}` which is absent from the catalog")]
    FixtureConfigMismatch {
        rule: &'static str,
        kind: FixtureKind,
    },
    /// A scene path has no table entry or a duration rounds to zero.
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl LightshowError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) fn invalid_record<T: Into<String>>(msg: T) -> Self {
        Self::InvalidAnalysisRecord(msg.into())
    }

    pub(crate) fn serialization<T: Into<String>>(msg: T) -> Self {
        Self::Serialization(msg.into())
    }
}

impl From<&str> for LightshowError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for LightshowError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
