//! spinsight – ball detection and spin estimation core for a strobe-based
//! golf launch monitor.
//!
//! From still frames captured by two cameras the crate can:
//!
//! 1. **Locate a stationary ball** – adaptive Hough circle search with
//!    mode-specific preprocessing ([`Detector::find_ball`], placed mode).
//! 2. **Locate balls in a strobed flight image** – overlapping exposures,
//!    dynamic radius narrowing, colour scoring and ranking (strobed modes),
//!    or neural inference with a tiled path for small objects.
//! 3. **Estimate spin** – Gabor dimple extraction, hemisphere projection
//!    and a coarse-to-fine brute-force rotation search
//!    ([`spin::ball_rotation`]).
//!
//! The camera pipeline, inter-process messaging, shot sequencing and any
//! CLI/web surfaces are collaborators outside this crate; the only contact
//! points are plain image buffers and the [`region::FrameSource`] trait.
//!
//! Configuration is one immutable [`Config`] bundle constructed at startup
//! (typically via [`Config::from_json_file`]) and threaded by reference into
//! every call; tests inject alternative bundles freely.

pub mod ball;
pub mod color_mask;
pub mod config;
pub mod detector;
pub mod ellipse;
pub mod hough;
pub mod imgutil;
pub mod neural;
pub mod region;
pub mod spin;
pub mod strategy;

pub use ball::{Ball, Circle, ColorTriplet, Handedness};
pub use config::{Config, DetectionMethod, OnnxBackend};
pub use detector::{Detector, EllipseMethod};
pub use ellipse::Ellipse;
pub use region::{wait_for_ball_movement, FrameSource, MotionEvent};
pub use spin::ball_rotation;
pub use spin::project::IGNORE_VALUE;
pub use strategy::SearchMode;

/// Errors surfaced to callers.
///
/// Parameter ceilings, configuration clamps and edge-iteration exhaustion
/// are handled inside the pipeline (logged, degraded) and never appear here.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    /// Unusable input: empty image, non-positive radius, broken config.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The search ran to completion without an acceptable candidate.
    #[error("no ball found")]
    NoBallFound,
    /// The neural backend failed to initialise or inference failed.
    #[error("model failure: {0}")]
    Model(String),
}
