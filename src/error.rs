//! Error types for the protocol engine.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised while driving a conversation turn.
#[derive(Debug, Error)]
pub enum EngineError {
    /// HTTP request failed before a response arrived.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("server returned {status}")]
    Status { status: u16 },

    /// Streaming endpoint answered with something other than an event stream.
    #[error("server did not respond with content type of {expected}, instead responded with {actual}")]
    ContentType {
        expected: &'static str,
        actual: String,
    },

    /// Streaming endpoint answered with no body at all.
    #[error("server did not respond with body")]
    EmptyBody,

    /// Payload did not match the wire shape.
    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// A derived request URL could not be built.
    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),

    /// Token acquisition failed or produced an unusable token.
    #[error("token acquisition failed: {0}")]
    Token(String),

    /// A user turn was executed before the conversation existed.
    #[error("start_conversation() must be called before execute_turn()")]
    ConversationNotStarted,
}

impl EngineError {
    /// Whether another attempt at the same request could succeed.
    ///
    /// Network-level failures and 5xx responses are transient. Anything the
    /// server answered below 500 (client errors, wrong content type, shape
    /// mismatches) will not get better by asking again.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Http(_) => true,
            EngineError::Status { status } => *status >= 500,
            _ => false,
        }
    }
}
