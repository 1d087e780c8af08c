use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Startup errors
    #[error("configuration error: {0}")]
    Config(String),

    // Connectivity
    #[error("connection to {target} failed: {reason}")]
    Connect { target: String, reason: String },

    // Per-record errors
    #[error("record decode failed: {0}")]
    Decode(String),

    #[error("invalid record: {0}")]
    Validate(String),

    // External collaborators
    #[error("cache write failed: {0}")]
    CacheWrite(String),

    #[error("cache read failed: {0}")]
    CacheRead(String),

    #[error("storage error: {0}")]
    Storage(String),

    // Query surface
    #[error("not found")]
    NotFound,

    #[error("invalid period: {0}")]
    InvalidPeriod(String),

    #[error("invalid mode: {0}")]
    InvalidMode(String),

    // IO Errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
