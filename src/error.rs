use thiserror::Error;

pub type Result<T> = std::result::Result<T, EventSearchError>;

#[derive(Debug, Error)]
pub enum EventSearchError {
    #[error("credentials missing: {0}")]
    CredentialsMissing(String),

    #[error("authentication failed: HTTP {status}: {body}")]
    AuthFailed { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rate limit exceeded on {call}; wait and try again")]
    RateLimited { call: &'static str },

    #[error("search request failed: {0}")]
    SearchRequestFailed(String),

    #[error("status check failed: {0}")]
    StatusCheckFailed(String),

    #[error("search task failed: {errors:?}")]
    TaskFailed { errors: Vec<serde_json::Value> },

    #[error("unknown task state: {0}")]
    UnknownTaskState(String),

    #[error("search task timed out after {attempts} polls")]
    Timeout { attempts: u32 },

    #[error("log retrieval failed: {0}")]
    RetrievalFailed(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
