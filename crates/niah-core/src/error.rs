use thiserror::Error;

#[derive(Debug, Error)]
pub enum NiahError {
    #[error("config error: {0}")]
    Config(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("scoring error: {0}")]
    Scoring(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type NiahResult<T> = Result<T, NiahError>;
