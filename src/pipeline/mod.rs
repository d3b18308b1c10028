pub mod replay;
pub mod tracker;

// Re-exports for convenience
pub use replay::{ReplayStream, parse_batch, start_replay_stream};
pub use tracker::{
    ControlSignal, StatusHandle, TrackerReport, run_tracker_loop, start_tracker,
};
