//! Best-circle refinement: a narrowed Hough pass around a trusted candidate.

use image::GrayImage;

use super::{hough_circles, HoughAlgorithm, HoughParams};
use crate::ball::{Ball, Circle};
use crate::config::BestCircleSection;
use crate::hough::preprocess::canny_sane;
use crate::imgutil::{centered_rect, force_odd, gaussian_blur_ksize, sub_image};

/// How far beyond the candidate radius the refinement sub-image extends.
const SUB_IMAGE_RADIUS_MULTIPLIER: f32 = 1.5;

/// Fixed minimum inter-circle distance inside the refinement region.
const MIN_INTER_CIRCLE_DISTANCE: f32 = 20.0;

/// Top-ranked circles inspected when choosing the final result.
const MAX_CIRCLES_TO_EVALUATE: usize = 3;

/// Narrow the detection around `reference` and return a more precise circle.
///
/// The search runs on a sub-image of side `2 * 1.5 * r` with radius bounds
/// `[0.85 r, 1.10 r]`. Returns `None` when the targeted pass finds nothing;
/// the caller keeps its original candidate in that case.
pub fn determine_best_circle(
    gray: &GrayImage,
    reference: &Ball,
    prefer_largest: bool,
    cfg: &BestCircleSection,
    externally_strobed: bool,
) -> Option<Circle> {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        tracing::error!("determine_best_circle called with an empty image");
        return None;
    }

    let circle = reference.circle;
    let radius = circle.radius.round();
    if radius <= 0.0 {
        tracing::error!("determine_best_circle called with non-positive radius");
        return None;
    }

    let expanded = (SUB_IMAGE_RADIUS_MULTIPLIER * radius).round();
    let rect = centered_rect(circle.x, circle.y, expanded);
    let (sub, offsets) = sub_image(gray, rect);

    tracing::trace!(
        "best-circle refinement around ({}, {}) r={} in a {}x{} window",
        circle.x,
        circle.y,
        radius,
        sub.width(),
        sub.height()
    );

    // Externally strobed input arrives pre-filtered; skip the edge pass.
    let search = if externally_strobed {
        gaussian_blur_ksize(&sub, force_odd(cfg.pre_hough_blur_size))
    } else {
        let blurred = gaussian_blur_ksize(&sub, force_odd(cfg.pre_canny_blur_size));
        let edges = canny_sane(&blurred, cfg.canny_lower, cfg.canny_upper);
        gaussian_blur_ksize(&edges, force_odd(cfg.pre_hough_blur_size))
    };

    let params = HoughParams {
        algorithm: HoughAlgorithm::GradientAlt,
        dp: cfg.dp,
        min_dist: MIN_INTER_CIRCLE_DISTANCE,
        param1: cfg.param1,
        param2: cfg.param2,
        min_radius: (radius * cfg.min_radius_ratio) as i32,
        max_radius: (radius * cfg.max_radius_ratio) as i32,
    };
    let candidates = hough_circles(&search, &params);
    if candidates.is_empty() {
        tracing::trace!("targeted Hough pass found no circles");
        return None;
    }

    let mut chosen = candidates[0];
    if prefer_largest {
        for c in candidates.iter().take(MAX_CIRCLES_TO_EVALUATE) {
            if c.radius > chosen.radius {
                chosen = *c;
            }
        }
    }

    chosen.x += offsets.sub_to_full.0 as f32;
    chosen.y += offsets.sub_to_full.1 as f32;
    Some(chosen)
}
