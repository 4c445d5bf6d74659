use thiserror::Error;

/// Errors crossing the capability boundary. Timeouts are failures, never
/// indefinite suspensions.
#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("malformed provider reply: {0}")]
    MalformedReply(String),
}
