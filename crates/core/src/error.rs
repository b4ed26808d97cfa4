use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The remote authority was unreachable or answered with a non-success status.
    #[error("Network error: {0}")]
    Network(String),

    /// The remote authority answered, but the body did not have the expected shape.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Local persistence failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The destination could not be parsed as a URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
