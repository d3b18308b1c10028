use thiserror::Error;

/// Invalid configuration. Raised before any frame is processed.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be a finite number, got {value}")]
    NotFinite { field: &'static str, value: f64 },
    #[error("{field} must be in (0, 1), got {value}")]
    OutOfUnitRange { field: &'static str, value: f64 },
    #[error("{field} must be greater than zero, got {value}")]
    NotPositive { field: &'static str, value: f64 },
    #[error("swap_margin must be in [0, 1), got {0}")]
    SwapMargin(f64),
    #[error("tracking_tolerance ({tolerance}) must not exceed lock_confidence_threshold ({threshold})")]
    ToleranceAboveThreshold { tolerance: f64, threshold: f64 },
    #[error("max_pending_lines must be greater than zero")]
    NoPendingCapacity,
}

/// A candidate face that cannot be used this frame.
#[derive(Debug, Error, PartialEq)]
pub enum DetectionError {
    #[error("expected {expected} landmarks, got {got}")]
    LandmarkCount { expected: usize, got: usize },
    #[error("expected {expected} contour points per eye, got {got}")]
    EyeContourCount { expected: usize, got: usize },
    #[error("detection contains non-finite coordinates")]
    NonFinite,
    #[error("detection carries neither a similarity score nor an embedding")]
    Unscored,
    #[error("embedding has {got} dimensions, reference has {expected}")]
    EmbeddingDimension { expected: usize, got: usize },
    #[error("embedding has zero norm")]
    ZeroNorm,
}

/// Rejected operator control signal.
#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("switch pending release: locked on '{active}'")]
    SwitchPendingRelease { active: String },
}
