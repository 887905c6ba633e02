use thiserror::Error;
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("usage: {0}")]
    Usage(String),
    #[error("device error: {0}")]
    Device(String),
    #[error("unrecognized device model code {0}")]
    UnknownModel(u16),
    #[error("timed out after {seconds:.1}s waiting for {what}")]
    Timeout { what: &'static str, seconds: f64 },
    #[error("scan cancelled")]
    Cancelled,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("failed to encode report: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to render plot: {0}")]
    Plot(String),
}
impl ScanError {
    pub fn usage(msg: impl Into<String>) -> Self {
        ScanError::Usage(msg.into())
    }
    pub fn device(msg: impl Into<String>) -> Self {
        ScanError::Device(msg.into())
    }
    /// Process exit status reported by `main` for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ScanError::Usage(_) => 2,
            ScanError::Device(_)
            | ScanError::UnknownModel(_)
            | ScanError::Timeout { .. }
            | ScanError::Serial(_) => 3,
            ScanError::Io(_) | ScanError::Json(_) | ScanError::Plot(_) => 4,
            ScanError::Cancelled => 130,
        }
    }
    /// Errors worth a second attempt at the same tile.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScanError::Device(_) | ScanError::Timeout { .. } | ScanError::Serial(_) | ScanError::Io(_)
        )
    }
}
impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for ScanError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        ScanError::Plot(format!("{value:?}"))
    }
}
impl From<image::ImageError> for ScanError {
    fn from(value: image::ImageError) -> Self {
        ScanError::Plot(value.to_string())
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn exit_codes_follow_error_class() {
        assert_eq!(ScanError::usage("odd").exit_code(), 2);
        assert_eq!(ScanError::device("gone").exit_code(), 3);
        assert_eq!(ScanError::UnknownModel(77).exit_code(), 3);
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "ro");
        assert_eq!(ScanError::from(io).exit_code(), 4);
        assert_eq!(ScanError::Cancelled.exit_code(), 130);
    }
    #[test]
    fn cancellation_is_not_retried() {
        assert!(!ScanError::Cancelled.is_retryable());
        assert!(!ScanError::usage("bad").is_retryable());
        assert!(ScanError::Timeout { what: "config", seconds: 1.0 }.is_retryable());
    }
}
