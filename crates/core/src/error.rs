use thiserror::Error;

#[derive(Error, Debug)]
pub enum BunsekiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("{0}")]
    Validation(String),

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("operation {name} failed: {message}")]
    Operation { name: String, message: String },

    #[error("no agent selected")]
    NoAgentSelected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("template error: {0}")]
    Template(String),
}

impl From<serde_json::Error> for BunsekiError {
    fn from(e: serde_json::Error) -> Self {
        BunsekiError::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BunsekiError>;
