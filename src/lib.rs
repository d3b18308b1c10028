//! Face locking: acquire an exclusive lock on one enrolled identity from a
//! stream of per-frame face detections, keep it through brief recognition
//! misses, derive movement/blink/smile actions while locked, and log each
//! lock episode to a timestamped history file.

pub mod action;
pub mod config;
pub mod error;
pub mod history;
pub mod lock;
pub mod pipeline;
pub mod similarity;
pub mod types;

pub use action::{ActionDetector, DetectedAction, FaceSample};
pub use config::FaceLockConfig;
pub use error::{ConfigError, ControlError, DetectionError};
pub use history::{FileSink, HistoryRecorder, HistorySession, HistorySink, MemorySink};
pub use lock::{Acceptance, FrameOutcome, LockController, ReleaseReason, Transition};
pub use similarity::{CosineScorer, EnrolledIdentity, Gallery, SimilarityScorer};
pub use types::{
    ActionCounts, ActionEvent, ActionKind, DetectionRecord, FaceLandmarks, FrameBatch, LockState,
    LockStatus, Point,
};
