use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrialyxError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}: {body}")]
    Api {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Invalid payload from {url}: {detail}")]
    InvalidPayload { url: String, detail: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TrialyxError>;
