use thiserror::Error;

/// Failure of an outbound transport call
#[derive(Debug, Error)]
pub enum SendError {
    #[error("transport request failed: {0}")]
    Transport(String),
    #[error("message not found")]
    NotFound,
}

/// Failure of the completion service
#[derive(Debug, Error)]
pub enum CompletionError {
    /// The request was cancelled through its token; not reported as a failure
    #[error("completion cancelled")]
    Cancelled,
    #[error("completion backend unavailable: {0}")]
    Unavailable(String),
    #[error("completion request failed: {0}")]
    Request(String),
    #[error("malformed completion response: {0}")]
    Malformed(String),
}

/// Error returned by a conversation handler.
///
/// The executor decides what the user sees: `Validation` reprompts and keeps
/// the conversation in place, every other variant ends it with an apology.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Bad user input; the message is sent back as the reprompt
    #[error("{0}")]
    Validation(String),
    /// An expected session key is missing
    #[error("session key `{key}` is missing")]
    StateCorruption { key: String },
    #[error("external service failed: {0}")]
    ExternalService(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn missing(key: impl Into<String>) -> Self {
        Self::StateCorruption { key: key.into() }
    }

    /// Programmer errors get logged at error level, the rest at warn
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl From<SendError> for HandlerError {
    fn from(e: SendError) -> Self {
        Self::ExternalService(e.to_string())
    }
}

impl From<CompletionError> for HandlerError {
    fn from(e: CompletionError) -> Self {
        Self::ExternalService(e.to_string())
    }
}

/// Failure while loading or saving settings
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON in settings file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no Telegram bot token configured (use --token or TELEGRAM_BOT_TOKEN)")]
    MissingToken,
}
