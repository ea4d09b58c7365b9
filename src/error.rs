use thiserror::Error;

#[derive(Error, Debug)]
/// Flat file to XML error
pub enum FlatXmlError {
    /// Invalid configuration, detected before any output is produced.
    #[error("Configuration: {0}")]
    Configuration(String),

    /// Unknown or unsupported character encoding label.
    #[error("Unsupported encoding: {0}")]
    Encoding(String),

    /// A line cannot be cut according to the configured layout.
    #[error("Layout: {0}")]
    Layout(String),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML: {0}")]
    Xml(String),

    #[error("JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, FlatXmlError>;

impl From<FlatXmlError> for std::io::Error {
    fn from(error: FlatXmlError) -> Self {
        match error {
            FlatXmlError::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}
