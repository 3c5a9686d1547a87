use thiserror::Error;

/// Coarse classification of a [`CaptureError`], as seen by the consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    PermissionDenied,
    DeviceInitFailure,
    ReadFailure,
    DeviceLost,
    ConfigurationError,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum CaptureError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("failed to initialize capture device: {0}")]
    DeviceInit(String),

    #[error("failed to read audio frame: {0}")]
    Read(String),

    #[error("capture device lost after {failures} consecutive read failures")]
    DeviceLost { failures: u32 },

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl CaptureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptureError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            CaptureError::DeviceInit(_) => ErrorKind::DeviceInitFailure,
            CaptureError::Read(_) => ErrorKind::ReadFailure,
            CaptureError::DeviceLost { .. } => ErrorKind::DeviceLost,
            CaptureError::Configuration(_) => ErrorKind::ConfigurationError,
        }
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_variants() {
        assert_eq!(
            CaptureError::PermissionDenied("no".into()).kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(
            CaptureError::DeviceInit("busy".into()).kind(),
            ErrorKind::DeviceInitFailure
        );
        assert_eq!(CaptureError::DeviceLost { failures: 3 }.kind(), ErrorKind::DeviceLost);
    }

    #[test]
    fn read_failures_have_their_own_kind() {
        assert_eq!(CaptureError::Read("xrun".into()).kind(), ErrorKind::ReadFailure);
        assert_eq!(
            CaptureError::Configuration("bad".into()).kind(),
            ErrorKind::ConfigurationError
        );
    }

    #[test]
    fn message_includes_detail() {
        let err = CaptureError::DeviceInit("no default input device".into());
        assert_eq!(
            err.to_string(),
            "failed to initialize capture device: no default input device"
        );
    }
}
