use thiserror::Error;

/// Rejection of a calibration quadrilateral or of a tracking parameter.
///
/// The rectifier keeps its last valid transform, and the tracker its last
/// valid parameters, whenever one of these is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("degenerate calibration quadrilateral: {reason}")]
    Degenerate { reason: String },
    #[error("invalid {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}
