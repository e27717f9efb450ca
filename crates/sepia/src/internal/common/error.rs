use thiserror::Error;

#[derive(Debug, Error)]
pub enum SepiaError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid resource request: {0}")]
    InvalidRequest(String),
    #[error("No launch method available: {0}")]
    LaunchMethodUnavailable(String),
    #[error("Process spawn failed: {0}")]
    SpawnFailed(String),
    #[error("Process lost: {0}")]
    ProcessLost(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<serde_json::error::Error> for SepiaError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::GenericError(e.to_string())
    }
}

impl From<String> for SepiaError {
    fn from(e: String) -> Self {
        Self::GenericError(e)
    }
}

impl From<&str> for SepiaError {
    fn from(e: &str) -> Self {
        Self::GenericError(e.to_string())
    }
}
