use thiserror::Error;

/// Errors surfaced by the capture, distribution and recording pipeline.
///
/// At startup every error is fatal. Once serving, errors stay local to one
/// frame, one subscriber or one chunk and are handled where they happen.
#[derive(Debug, Error)]
pub enum CctvError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Capture error: {0}")]
    CaptureError(String),
    #[error("Stream error: {0}")]
    StreamError(String),
    #[error("Encoding error: {0}")]
    EncodingError(String),
    #[error("Muxing error: {0}")]
    MuxingError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("Server error: {0}")]
    ServerError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display_prefixes() {
        let error = CctvError::StorageError("disk full".to_string());
        assert_eq!(error.to_string(), "Storage error: disk full");

        let error = CctvError::ConfigError("chunk duration must be positive".to_string());
        assert_eq!(
            error.to_string(),
            "Configuration error: chunk duration must be positive"
        );
    }

    #[test]
    fn test_implements_error_trait() {
        let error = CctvError::MuxingError("bad pts".to_string());
        let _error_trait: &dyn Error = &error;
        assert!(error.source().is_none());
    }
}
