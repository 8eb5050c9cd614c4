//! Runtime configuration.
//!
//! Everything tunable lives in one serde-deserializable bundle constructed at
//! startup and treated as read-only afterwards. Tests inject alternative
//! bundles directly instead of mutating globals. Field defaults carry the
//! tuned production values.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::DetectError;

/// One mode's Hough tuning block: Canny thresholds, blur kernel sizes, the
/// accumulator parameter window walked by the adaptive loop, and the accepted
/// circle-count window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HoughModeSection {
    pub canny_lower: f32,
    pub canny_upper: f32,
    /// Blur applied before Canny; <= 0 skips, even sizes are forced odd.
    pub pre_canny_blur_size: i32,
    /// Blur applied after Canny, before the circle transform.
    pub pre_hough_blur_size: i32,
    /// Accumulator resolution divisor.
    pub dp: f32,
    /// Edge-strength threshold.
    pub param1: f32,
    pub starting_param2: f32,
    pub min_param2: f32,
    pub max_param2: f32,
    pub param2_increment: f32,
    /// Minimum acceptable circle count for the adaptive loop.
    pub min_circles: usize,
    /// Maximum acceptable circle count for the adaptive loop.
    pub max_circles: usize,
}

impl Default for HoughModeSection {
    fn default() -> Self {
        // Placed-ball values; other modes override below.
        Self {
            canny_lower: 30.0,
            canny_upper: 80.0,
            pre_canny_blur_size: 5,
            pre_hough_blur_size: 11,
            dp: 1.5,
            param1: 120.0,
            starting_param2: 40.0,
            min_param2: 30.0,
            max_param2: 60.0,
            param2_increment: 4.0,
            min_circles: 1,
            max_circles: 4,
        }
    }
}

/// CLAHE controls for the strobed preprocessing path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaheSection {
    pub enable: bool,
    pub clip_limit: i32,
    pub tiles_grid_size: i32,
}

impl Default for ClaheSection {
    fn default() -> Self {
        Self {
            enable: false,
            clip_limit: 8,
            tiles_grid_size: 8,
        }
    }
}

/// Strobed-mode parameters: a standard-algorithm block and an alternative
/// Hough algorithm variant selected by `use_alt_algorithm`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrobedSection {
    pub use_alt_algorithm: bool,
    pub primary: HoughModeSection,
    pub alt: HoughModeSection,
}

impl Default for StrobedSection {
    fn default() -> Self {
        Self {
            use_alt_algorithm: true,
            primary: HoughModeSection {
                canny_lower: 50.0,
                canny_upper: 110.0,
                pre_canny_blur_size: 5,
                pre_hough_blur_size: 13,
                max_circles: 12,
                ..HoughModeSection::default()
            },
            alt: HoughModeSection {
                canny_lower: 35.0,
                canny_upper: 70.0,
                pre_canny_blur_size: 11,
                pre_hough_blur_size: 16,
                dp: 1.5,
                param1: 130.0,
                starting_param2: 0.95,
                min_param2: 0.6,
                max_param2: 1.0,
                param2_increment: 0.05,
                min_circles: 1,
                max_circles: 12,
            },
        }
    }
}

/// Externally-strobed environments pair the launch monitor with an external
/// strobe source; parameters are tighter and carry their own CLAHE and
/// narrowing settings plus fixed hard radius bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternallyStrobedSection {
    pub hough: HoughModeSection,
    pub clahe: ClaheSection,
    /// Fixed radius bounds in pixels (not derived from image size).
    pub min_search_radius: i32,
    pub max_search_radius: i32,
    pub narrowing_param2: f32,
    pub narrowing_dp: f32,
    pub narrowing_pre_canny_blur_size: i32,
    pub narrowing_pre_hough_blur_size: i32,
}

impl Default for ExternallyStrobedSection {
    fn default() -> Self {
        Self {
            hough: HoughModeSection {
                canny_lower: 35.0,
                canny_upper: 80.0,
                pre_canny_blur_size: 3,
                pre_hough_blur_size: 11,
                dp: 1.0,
                param1: 130.0,
                starting_param2: 65.0,
                min_param2: 28.0,
                max_param2: 100.0,
                param2_increment: 4.0,
                min_circles: 3,
                max_circles: 20,
            },
            clahe: ClaheSection {
                enable: true,
                clip_limit: 6,
                tiles_grid_size: 6,
            },
            min_search_radius: 60,
            max_search_radius: 80,
            narrowing_param2: 0.6,
            narrowing_dp: 1.1,
            narrowing_pre_canny_blur_size: 3,
            narrowing_pre_hough_blur_size: 9,
        }
    }
}

/// Two-phase dynamic radius narrowing: an exploratory Hough pass averages the
/// top few radii, then the real search runs with bounds scaled around that
/// average.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrowingSection {
    pub use_dynamic_radii: bool,
    pub num_radii_to_average: usize,
    pub placed_min_ratio: f32,
    pub placed_max_ratio: f32,
    pub placed_starting_param2: f32,
    pub placed_dp: f32,
    pub placed_param1: f32,
    pub strobed_min_ratio: f32,
    pub strobed_max_ratio: f32,
    pub strobed_param2: f32,
    pub strobed_dp: f32,
}

impl Default for NarrowingSection {
    fn default() -> Self {
        Self {
            use_dynamic_radii: true,
            num_radii_to_average: 3,
            placed_min_ratio: 0.9,
            placed_max_ratio: 1.1,
            placed_starting_param2: 80.0,
            placed_dp: 2.0,
            placed_param1: 130.0,
            strobed_min_ratio: 0.8,
            strobed_max_ratio: 1.2,
            strobed_param2: 100.0,
            strobed_dp: 1.8,
        }
    }
}

/// Best-circle refinement pass around a trusted candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BestCircleSection {
    pub enable: bool,
    pub prefer_largest: bool,
    pub canny_lower: f32,
    pub canny_upper: f32,
    pub pre_canny_blur_size: i32,
    pub pre_hough_blur_size: i32,
    pub param1: f32,
    pub param2: f32,
    pub dp: f32,
    pub min_radius_ratio: f32,
    pub max_radius_ratio: f32,
}

impl Default for BestCircleSection {
    fn default() -> Self {
        Self {
            enable: false,
            prefer_largest: false,
            canny_lower: 55.0,
            canny_upper: 110.0,
            pre_canny_blur_size: 5,
            pre_hough_blur_size: 13,
            param1: 120.0,
            param2: 35.0,
            dp: 1.5,
            min_radius_ratio: 0.85,
            max_radius_ratio: 1.10,
        }
    }
}

/// Which detection pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Classical Hough pipeline.
    #[default]
    Legacy,
    /// Single-image neural inference.
    Experimental,
    /// Tiled (sliced) neural inference for small objects.
    ExperimentalSahi,
}

/// Which ONNX session profile runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnnxBackend {
    /// Fully optimized session: graph optimization level 3, configured
    /// intra-op threads, memory pattern on.
    #[default]
    Primary,
    /// Conservatively configured session able to load models the optimized
    /// profile rejects.
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnnxRuntimeSection {
    /// Retry on the fallback session profile when the primary fails.
    pub auto_fallback: bool,
    /// Intra-op thread count for the primary profile.
    pub threads: usize,
}

impl Default for OnnxRuntimeSection {
    fn default() -> Self {
        Self {
            auto_fallback: true,
            threads: 4,
        }
    }
}

/// Neural detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnnxSection {
    pub backend: OnnxBackend,
    /// Model path; a relative path is resolved against `install_root`.
    pub model_path: PathBuf,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    /// Letterbox side length.
    pub input_size: u32,
    pub sahi_slice_width: u32,
    pub sahi_slice_height: u32,
    pub sahi_overlap_ratio: f32,
    pub runtime: OnnxRuntimeSection,
}

impl Default for OnnxSection {
    fn default() -> Self {
        Self {
            backend: OnnxBackend::Primary,
            model_path: PathBuf::from("assets/models/ball.onnx"),
            confidence_threshold: 0.5,
            nms_threshold: 0.4,
            input_size: 640,
            sahi_slice_width: 320,
            sahi_slice_height: 320,
            sahi_overlap_ratio: 0.2,
            runtime: OnnxRuntimeSection::default(),
        }
    }
}

/// Everything the ball-identification pipeline reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BallIdentification {
    pub placed_ball: HoughModeSection,
    pub strobed_balls: StrobedSection,
    pub putting: HoughModeSection,
    pub externally_strobed: ExternallyStrobedSection,
    pub clahe: ClaheSection,
    pub narrowing: NarrowingSection,
    pub best_circle: BestCircleSection,
    pub detection_method: DetectionMethod,
    pub onnx: OnnxSection,
}

impl Default for BallIdentification {
    fn default() -> Self {
        Self {
            placed_ball: HoughModeSection::default(),
            strobed_balls: StrobedSection::default(),
            putting: HoughModeSection {
                pre_hough_blur_size: 9,
                max_circles: 12,
                ..HoughModeSection::default()
            },
            externally_strobed: ExternallyStrobedSection::default(),
            clahe: ClaheSection::default(),
            narrowing: NarrowingSection::default(),
            best_circle: BestCircleSection::default(),
            detection_method: DetectionMethod::default(),
            onnx: OnnxSection::default(),
        }
    }
}

/// Inclusive integer span with a step, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisSpan {
    pub start: i32,
    pub end: i32,
    pub increment: i32,
}

impl AxisSpan {
    pub fn new(start: i32, end: i32, increment: i32) -> Self {
        Self {
            start,
            end,
            increment,
        }
    }

    /// Number of samples produced by [`values`](Self::values).
    pub fn count(&self) -> usize {
        if self.increment <= 0 || self.end < self.start {
            return 0;
        }
        ((self.end - self.start) / self.increment) as usize + 1
    }

    pub fn values(&self) -> impl Iterator<Item = i32> + '_ {
        (self.start..=self.end).step_by(self.increment.max(1) as usize)
    }
}

/// Spin estimation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpinConfig {
    pub coarse_x: AxisSpan,
    pub coarse_y: AxisSpan,
    pub coarse_z: AxisSpan,
    /// Accepted window (percent) for white pixels in the dimple image.
    pub gabor_min_white_percent: i32,
    pub gabor_max_white_percent: i32,
    /// Starting binary threshold for the Gabor post-threshold step.
    pub gabor_starting_threshold: f32,
    /// Write per-candidate score tables (coarse and fine) as CSV.
    pub write_csv_files: bool,
    /// Directory for the CSV score tables.
    pub csv_output_dir: PathBuf,
}

impl Default for SpinConfig {
    fn default() -> Self {
        Self {
            coarse_x: AxisSpan::new(-42, 42, 6),
            coarse_y: AxisSpan::new(-30, 30, 5),
            coarse_z: AxisSpan::new(-50, 60, 6),
            gabor_min_white_percent: 38,
            gabor_max_white_percent: 44,
            gabor_starting_threshold: 11.0,
            write_csv_files: false,
            csv_output_dir: PathBuf::from("."),
        }
    }
}

/// Top-level configuration bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ball_identification: BallIdentification,
    pub spin_analysis: SpinConfig,
    /// Root against which relative model paths are resolved.
    pub install_root: Option<PathBuf>,
}

impl Config {
    /// Load a configuration bundle from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, DetectError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DetectError::InvalidInput(format!("config {}: {e}", path.display())))?;
        let mut cfg: Config = serde_json::from_str(&text)
            .map_err(|e| DetectError::InvalidInput(format!("config {}: {e}", path.display())))?;
        cfg.resolve_model_path();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Absolute model path, resolved against `install_root` when relative.
    pub fn resolve_model_path(&mut self) {
        let onnx = &mut self.ball_identification.onnx;
        if onnx.model_path.is_relative() {
            if let Some(root) = &self.install_root {
                onnx.model_path = root.join(&onnx.model_path);
            }
        }
    }

    /// Cross-field invariants checked once at startup.
    ///
    /// The adaptive loop's behaviour is undefined unless
    /// `min_param2 <= starting_param2 <= max_param2` holds for every mode.
    pub fn validate(&self) -> Result<(), DetectError> {
        let id = &self.ball_identification;
        let modes: [(&str, &HoughModeSection); 5] = [
            ("placed_ball", &id.placed_ball),
            ("strobed_balls.primary", &id.strobed_balls.primary),
            ("strobed_balls.alt", &id.strobed_balls.alt),
            ("putting", &id.putting),
            ("externally_strobed", &id.externally_strobed.hough),
        ];
        for (name, m) in modes {
            if !(m.min_param2 <= m.starting_param2 && m.starting_param2 <= m.max_param2) {
                return Err(DetectError::InvalidInput(format!(
                    "{name}: require min_param2 <= starting_param2 <= max_param2 \
                     (got {} / {} / {})",
                    m.min_param2, m.starting_param2, m.max_param2
                )));
            }
            if m.param2_increment <= 0.0 {
                return Err(DetectError::InvalidInput(format!(
                    "{name}: param2_increment must be positive"
                )));
            }
            if m.min_circles > m.max_circles {
                return Err(DetectError::InvalidInput(format!(
                    "{name}: min_circles > max_circles"
                )));
            }
        }
        for (axis, span) in [
            ("x", &self.spin_analysis.coarse_x),
            ("y", &self.spin_analysis.coarse_y),
            ("z", &self.spin_analysis.coarse_z),
        ] {
            if span.count() == 0 {
                return Err(DetectError::InvalidInput(format!(
                    "spin_analysis.coarse_{axis}: empty search span"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().expect("defaults must validate");
    }

    #[test]
    fn param2_ordering_is_enforced() {
        let mut cfg = Config::default();
        cfg.ball_identification.placed_ball.min_param2 = 90.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn axis_span_count() {
        assert_eq!(AxisSpan::new(-42, 42, 6).count(), 15);
        assert_eq!(AxisSpan::new(-30, 30, 5).count(), 13);
        assert_eq!(AxisSpan::new(-50, 60, 6).count(), 19);
        assert_eq!(AxisSpan::new(-50, 60, 6).values().count(), 19);
        assert_eq!(AxisSpan::new(0, 0, 1).count(), 1);
    }

    #[test]
    fn json_round_trip_preserves_method() {
        let mut cfg = Config::default();
        cfg.ball_identification.detection_method = DetectionMethod::ExperimentalSahi;
        let text = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&text).unwrap();
        assert_eq!(
            back.ball_identification.detection_method,
            DetectionMethod::ExperimentalSahi
        );
    }

    #[test]
    fn relative_model_path_resolves_against_install_root() {
        let mut cfg = Config::default();
        cfg.install_root = Some(PathBuf::from("/opt/monitor"));
        cfg.resolve_model_path();
        assert!(cfg
            .ball_identification
            .onnx
            .model_path
            .starts_with("/opt/monitor"));
    }
}
