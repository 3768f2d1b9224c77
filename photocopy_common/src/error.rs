use thiserror::Error;

#[derive(Error, Debug)]
pub enum PhotoCopyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unsafe path: {0}")]
    UnsafePath(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Checkpoint corrupt: {0}")]
    CheckpointCorrupt(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, PhotoCopyError>;
