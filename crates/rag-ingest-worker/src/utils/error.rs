use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("document not found: {0}")]
    DocumentNotFound(Uuid),

    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("file too large: {0} MB (max: {1} MB)")]
    FileTooLarge(u64, u64),

    #[error("parsing error: {0}")]
    ParsingError(String),

    #[error("chunking error: {0}")]
    ChunkingError(String),

    #[error("embedding error: {0}")]
    EmbeddingError(String),

    #[error("database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("http error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl From<anyhow::Error> for WorkerError {
    fn from(err: anyhow::Error) -> Self {
        WorkerError::Unknown(err.to_string())
    }
}
