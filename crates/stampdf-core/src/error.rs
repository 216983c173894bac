use thiserror::Error;

#[derive(Error, Debug)]
pub enum StampError {
    #[error("Failed to parse PDF: {0}")]
    ParseError(String),

    #[error("No source document is loaded")]
    NoDocument,

    #[error("No fallback font could be loaded for non-Latin text (tried: {})", .attempts.join(", "))]
    FontUnavailable { attempts: Vec<String> },

    #[error("Invalid font data: {0}")]
    FontError(String),

    #[error("Failed to decode image: {0}")]
    ImageDecode(String),

    #[error("Unsupported image format {0}: only PNG and JPEG images can be placed")]
    UnsupportedImage(String),

    #[error("Failed to draw {label}: {source}")]
    DrawError {
        label: String,
        #[source]
        source: Box<StampError>,
    },

    #[error("PDF operation failed: {0}")]
    OperationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Failure of a single fallback font download attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FontFetchError {
    #[error("timed out after {timeout_ms} ms fetching {url}")]
    Timeout { url: String, timeout_ms: u32 },

    #[error("HTTP {status} fetching {url}")]
    Status { url: String, status: u16 },

    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },
}
