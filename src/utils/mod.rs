//! The `utils` module holds the pieces shared by every other module: the
//! error taxonomy and logging setup.

pub mod error;
pub mod logging;

#[cfg(test)]
mod tests {
    use super::error::{DecodeError, ProcessingError, PublishError};
    use super::logging;

    #[test]
    fn logging_init_accepts_levels() {
        // Should not panic
        logging::init("info");
        logging::init("debug");
        logging::init("warn");
    }

    #[test]
    fn parse_level_is_case_insensitive_and_defaults_to_info() {
        assert_eq!(logging::parse_level("WARNING"), tracing::Level::WARN);
        assert_eq!(logging::parse_level("Trace"), tracing::Level::TRACE);
        assert_eq!(logging::parse_level("verbose"), tracing::Level::INFO);
    }

    #[test]
    fn decode_error_from_json() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let decode: DecodeError = err.into();
        assert!(decode.to_string().starts_with("malformed payload: "));
    }

    #[test]
    fn processing_error_keeps_reason() {
        let err = ProcessingError::new("downstream timed out");
        assert_eq!(err.reason(), "downstream timed out");
        assert_eq!(err.to_string(), "downstream timed out");
    }

    #[test]
    fn publish_error_display() {
        let err = PublishError::Rejected("no exchange 'x'".to_string());
        assert_eq!(err.to_string(), "publish rejected: no exchange 'x'");
    }
}
