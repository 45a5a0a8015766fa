use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: {status} {reason} from {url}")]
    Http {
        status: u16,
        reason: String,
        url: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Sensor error on {metric}: {reason}")]
    Sensor { metric: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
