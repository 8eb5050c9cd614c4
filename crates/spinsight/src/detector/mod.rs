//! Detection facade.
//!
//! [`Detector::find_ball`] validates input, routes between the classical
//! Hough pipeline and the neural detector, runs mode-specific preprocessing
//! and the adaptive parameter loop, then scores and ranks candidates.

pub mod adaptive;
pub mod scoring;

use image::RgbImage;
use imageproc::rect::Rect;

use crate::ball::Ball;
use crate::config::{Config, DetectionMethod};
use crate::hough::dedup::remove_smallest_concentric;
use crate::hough::preprocess::preprocess_for_mode;
use crate::hough::refine::determine_best_circle;
use crate::hough::{hough_circles, round_circles, HoughAlgorithm, HoughParams};
use crate::imgutil::{round_and_make_even, sub_image, to_gray, to_hsv, RoiOffsets};
use crate::neural;
use crate::strategy::{mode_name, mode_params, ModeParams, SearchMode};
use crate::DetectError;

/// Pre-blur the full frame before any processing. Kept for parity with the
/// tuning rigs; normally off.
const PREBLUR_IMAGE: bool = false;

/// AND the colour mask into the search image before grayscale conversion.
/// The hook was retained for IR-robust paths and is off by default.
const IS_COLOR_MASKING: bool = false;

/// Which ellipse fitter [`Detector::refine_ellipse`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EllipseMethod {
    /// Arc-grouping detector; robust on noisy edges.
    ArcGrouping,
    /// Contour-fit detector with iteratively tuned Canny thresholds.
    ContourFit,
}

/// Primary detection interface. Owns an immutable configuration bundle;
/// create once, detect on many frames.
pub struct Detector {
    config: Config,
}

impl Detector {
    /// Build a detector, validating configuration invariants once.
    pub fn new(mut config: Config) -> Result<Self, DetectError> {
        config.resolve_model_path();
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load the neural model eagerly so the first detection is fast.
    /// Only useful when the configured detection method is neural.
    pub fn preload_neural(&self) -> Result<(), DetectError> {
        neural::preload_model(&self.config.ball_identification.onnx)
    }

    /// Fit an oriented ellipse around a suspect circle candidate.
    ///
    /// Used when circle geometry is in doubt (motion blur, glancing
    /// angles); the caller picks which of the two fitters runs. The result
    /// is in full-image coordinates.
    pub fn refine_ellipse(
        &self,
        gray: &image::GrayImage,
        ball: &Ball,
        method: EllipseMethod,
    ) -> Option<crate::ellipse::Ellipse> {
        match method {
            EllipseMethod::ArcGrouping => {
                crate::ellipse::find_best_ellipse_arcs(gray, &ball.circle)
            }
            EllipseMethod::ContourFit => crate::ellipse::find_largest_ellipse_contours(
                gray,
                &ball.circle,
                ball.measured_radius_px.round() as i32,
            ),
        }
    }

    /// Locate golf balls in `image`.
    ///
    /// `expected_area` restricts the search to a region of interest (`None`
    /// searches the whole frame). Returned balls are ranked by quality
    /// (index 0 best) and expressed in full-image coordinates. Fails with
    /// [`DetectError::NoBallFound`] when no acceptable candidate exists;
    /// the ball list is never empty on success.
    pub fn find_ball(
        &self,
        image: &RgbImage,
        reference: &Ball,
        expected_area: Option<Rect>,
        mode: SearchMode,
        prefer_largest: bool,
        report_failures: bool,
    ) -> Result<Vec<Ball>, DetectError> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(DetectError::InvalidInput("empty image".into()));
        }
        tracing::trace!("find_ball: mode {}", mode_name(mode));

        let method = self.config.ball_identification.detection_method;
        if method != DetectionMethod::Legacy {
            return self.find_ball_neural(image, reference, mode, method, report_failures);
        }
        self.find_ball_hough(
            image,
            reference,
            expected_area,
            mode,
            prefer_largest,
            report_failures,
        )
    }

    fn find_ball_neural(
        &self,
        image: &RgbImage,
        reference: &Ball,
        mode: SearchMode,
        method: DetectionMethod,
        report_failures: bool,
    ) -> Result<Vec<Ball>, DetectError> {
        let params = mode_params(&self.config.ball_identification, mode);
        let (min_r, max_r) = working_radius_bounds(&params, image.height());

        let onnx = &self.config.ball_identification.onnx;
        let mut circles = match neural::detect_circles_with_fallback(onnx, method, image) {
            Ok(circles) => circles,
            Err(e) => {
                // Model failures degrade to a detection failure for callers.
                if report_failures {
                    tracing::error!("neural detection failed: {e}");
                } else {
                    tracing::debug!("neural detection failed: {e}");
                }
                return Err(DetectError::NoBallFound);
            }
        };
        circles.retain(|c| c.radius >= min_r as f32 && c.radius <= max_r as f32);
        if circles.is_empty() {
            if report_failures {
                tracing::warn!("neural detection found no balls within radius constraints");
            }
            return Err(DetectError::NoBallFound);
        }

        // Confidence order from the detector is the quality ranking; the
        // neural path does not analyse colour, so the reference colour is
        // carried through as a placeholder.
        Ok(circles
            .into_iter()
            .enumerate()
            .map(|(rank, circle)| Ball {
                measured_radius_px: circle.radius,
                circle,
                quality_rank: rank as u32,
                radius_at_calibration_px: reference.radius_at_calibration_px,
                average_color: reference.average_color,
                median_color: reference.average_color,
                std_color: Default::default(),
                hsv_lower: reference.hsv_lower,
                hsv_upper: reference.hsv_upper,
                angles_camera_ortho: reference.angles_camera_ortho,
                ellipse: None,
            })
            .collect())
    }

    fn find_ball_hough(
        &self,
        image: &RgbImage,
        reference: &Ball,
        expected_area: Option<Rect>,
        mode: SearchMode,
        prefer_largest: bool,
        report_failures: bool,
    ) -> Result<Vec<Ball>, DetectError> {
        let params = mode_params(&self.config.ball_identification, mode);

        let working = if PREBLUR_IMAGE {
            image::imageops::blur(image, 1.5)
        } else {
            image.clone()
        };

        let mut gray = to_gray(&working);
        if IS_COLOR_MASKING {
            let mask = crate::color_mask::color_mask_for_ball(
                &to_hsv(&working),
                reference,
                crate::color_mask::DEFAULT_WIDENING,
            );
            for (g, m) in gray.iter_mut().zip(mask.iter()) {
                *g &= *m;
            }
        }

        let search_image = preprocess_for_mode(&gray, mode, &params);

        let (final_search_image, offsets) = match expected_area {
            Some(rect) if rect.width() > 0 && rect.height() > 0 => sub_image(&search_image, rect),
            _ => (search_image, RoiOffsets::default()),
        };

        let (mut min_radius, mut max_radius) = working_radius_bounds(&params, image.height());
        let mut min_distance = min_radius as f32
            * match mode {
                SearchMode::Strobed => 0.3,
                SearchMode::ExternallyStrobed => 0.2,
                _ => 0.5,
            };

        // Exploratory narrowing pass: average the strongest radii and
        // tighten the search bounds around them.
        if params.use_dynamic_radii && mode != SearchMode::Placed && mode != SearchMode::Putting {
            min_radius = round_and_make_even(min_radius as f64);
            max_radius = round_and_make_even(max_radius as f64);

            let narrow_params = HoughParams {
                algorithm: HoughAlgorithm::GradientAlt,
                dp: params.narrowing_dp,
                min_dist: min_radius as f32 * 0.8,
                param1: params.narrowing_param1,
                param2: if params.narrowing_param2 > 0.0 {
                    params.narrowing_param2
                } else {
                    params.narrowing_starting_param2
                },
                min_radius,
                max_radius,
            };
            let mut test_circles = hough_circles(&final_search_image, &narrow_params);
            if test_circles.is_empty() {
                if report_failures {
                    tracing::warn!("narrowing Hough pass found 0 balls");
                }
                return Err(DetectError::NoBallFound);
            }
            remove_smallest_concentric(&mut test_circles);

            let k = params.num_radii_to_average.max(1).min(test_circles.len());
            let average: f64 =
                test_circles.iter().take(k).map(|c| c.radius as f64).sum::<f64>() / k as f64;
            min_radius = round_and_make_even(average * params.narrowing_min_ratio as f64);
            max_radius = round_and_make_even(average * params.narrowing_max_ratio as f64);
            min_distance = min_radius as f32 * 0.6;
            tracing::trace!("narrowed search radii to [{min_radius}, {max_radius}]");
        }

        let algorithm = if mode == SearchMode::Placed || params.alt_algorithm {
            HoughAlgorithm::GradientAlt
        } else {
            HoughAlgorithm::Gradient
        };

        let mut circles = adaptive::adaptive_hough(&params, |param2| {
            let hp = HoughParams {
                algorithm,
                dp: params.dp,
                min_dist: min_distance,
                param1: params.param1,
                param2,
                min_radius,
                max_radius,
            };
            let mut found = hough_circles(&final_search_image, &hp);
            round_circles(&mut found);
            remove_smallest_concentric(&mut found);
            found
        });

        if circles.is_empty() {
            if report_failures {
                tracing::error!("could not find any balls ({} mode)", mode_name(mode));
            } else {
                tracing::debug!("could not find any balls ({} mode)", mode_name(mode));
            }
            return Err(DetectError::NoBallFound);
        }

        for c in circles.iter_mut() {
            c.x += offsets.sub_to_full.0 as f32;
            c.y += offsets.sub_to_full.1 as f32;
        }

        let mut balls =
            scoring::filter_and_score(&circles, reference, image, mode, report_failures);
        if balls.is_empty() {
            return Err(DetectError::NoBallFound);
        }
        balls.truncate(params.max_circles.max(1));

        let best_cfg = &self.config.ball_identification.best_circle;
        if best_cfg.enable {
            let externally_strobed = mode == SearchMode::ExternallyStrobed;
            if let Some(refined) = determine_best_circle(
                &gray,
                &balls[0],
                prefer_largest || best_cfg.prefer_largest,
                best_cfg,
                externally_strobed,
            ) {
                balls[0].circle = refined;
                balls[0].measured_radius_px = refined.radius;
            }
        }

        tracing::trace!("returning {} balls", balls.len());
        Ok(balls)
    }
}

/// Resolve radius bounds: mode-fixed values when configured, otherwise
/// derived from the image height.
fn working_radius_bounds(params: &ModeParams, image_height: u32) -> (i32, i32) {
    let min = if params.min_search_radius >= 0 {
        params.min_search_radius
    } else {
        (image_height / 30) as i32
    };
    let max = if params.max_search_radius >= 0 {
        params.max_search_radius
    } else {
        (image_height / 6) as i32
    };
    (min.max(1), max.max(min.max(1) + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_image_is_invalid_input() {
        let detector = Detector::new(Config::default()).unwrap();
        let img = RgbImage::new(0, 0);
        let err = detector
            .find_ball(&img, &Ball::default(), None, SearchMode::Placed, false, false)
            .unwrap_err();
        assert!(matches!(err, DetectError::InvalidInput(_)));
    }

    #[test]
    fn radius_bounds_fall_back_to_image_height() {
        let params = mode_params(
            &crate::config::BallIdentification::default(),
            SearchMode::Placed,
        );
        let (min, max) = working_radius_bounds(&params, 480);
        assert_eq!(min, 16);
        assert_eq!(max, 80);
    }

    #[test]
    fn radius_bounds_respect_fixed_configuration() {
        let params = mode_params(
            &crate::config::BallIdentification::default(),
            SearchMode::ExternallyStrobed,
        );
        let (min, max) = working_radius_bounds(&params, 480);
        assert_eq!((min, max), (60, 80));
    }
}
