use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("invalid rating {0}, must be 0..=5")]
    InvalidRating(u8),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;
