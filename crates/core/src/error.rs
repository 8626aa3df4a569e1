/// Top-level error type wrapping every failure the crate reports.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("Metadata lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {url}")]
    Timeout { url: String },

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Empty response body from {url}")]
    EmptyResponse { url: String },

    #[error("Failed to parse page {url}: {message}")]
    Parse { url: String, message: String },

    #[error("Field {field} could not be extracted: {message}")]
    Field { field: &'static str, message: String },

    #[error("No results found for query")]
    NoMatch,

    #[error("Insufficient metadata to construct query")]
    InsufficientQuery,
}

impl LookupError {
    pub(crate) fn field(field: &'static str, message: impl Into<String>) -> Self {
        LookupError::Field {
            field,
            message: message.into(),
        }
    }

    /// Classify a transport failure for `url`.
    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LookupError::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = err.status() {
            LookupError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            LookupError::Network(err.to_string())
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LookupError::HttpStatus { status: 404, .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Unknown key: {0}")]
    UnknownKey(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Malformed cache file: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
