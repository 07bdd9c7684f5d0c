use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("external tool {tool} failed: {message}")]
    ExternalTool { tool: String, message: String },

    #[error("external tool {tool} timed out after {secs}s")]
    ExternalToolTimeout { tool: String, secs: u64 },

    #[error("invalid media: {0}")]
    InvalidMedia(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
