//! DSP Error Types

use thiserror::Error;

/// Errors that can occur during DSP operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    #[error("Unsupported parameter: {0}")]
    UnsupportedParameter(String),

    #[error("Invalid value for parameter {name}: {reason}")]
    InvalidParameterValue { name: String, reason: String },

    #[error("Frame mismatch: main frame has {main} samples per channel, aux frame has {aux}")]
    FrameMismatch { main: usize, aux: usize },

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Sample rate must be positive, got {0}")]
    InvalidSampleRate(u32),

    #[error("Failed to initialize backend: {0}")]
    BackendInit(String),

    #[error("Buffer size mismatch: expected a multiple of {expected} bytes, got {got}")]
    BufferSizeMismatch { expected: usize, got: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DspError::UnsupportedParameter("reverb_amount".into());
        assert!(err.to_string().contains("reverb_amount"));

        let err = DspError::FrameMismatch { main: 480, aux: 441 };
        let message = err.to_string();
        assert!(message.contains("480"));
        assert!(message.contains("441"));
    }

    #[test]
    fn test_invalid_value_display() {
        let err = DspError::InvalidParameterValue {
            name: "gain_control_level".into(),
            reason: "expected a number".into(),
        };
        assert!(err.to_string().contains("gain_control_level"));
    }
}
