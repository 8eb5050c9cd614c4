//! Candidate filtering and colour scoring.

use image::RgbImage;

use crate::ball::{Ball, Circle, ColorTriplet};
use crate::imgutil::ball_color_stats;
use crate::strategy::SearchMode;

/// Candidates smaller than this radius are discarded outright.
pub const MIN_BALL_CANDIDATE_RADIUS: i32 = 10;

/// Colour tolerance for the strobed-mode candidate filter.
pub const CANDIDATE_COLOR_TOLERANCE: f64 = 50.0;

/// Cap on the number of circles examined per call.
pub const MAX_CIRCLES_TO_EVALUATE: usize = 200;

struct Candidate {
    circle: Circle,
    /// Colour-only part of the score.
    color_score: f64,
    /// Colour score plus the quality-ordering penalty.
    composite_score: f64,
    radius: i32,
    average: ColorTriplet,
    median: ColorTriplet,
    std: ColorTriplet,
}

/// Score, filter and rank circle candidates into balls.
///
/// Candidates keep the Hough detector's quality order as a strong tiebreak:
/// the composite score adds `200 * (10 i)^3` for the 1-based index `i`, so
/// colour only reorders candidates whose colour difference is decisive.
/// Strobed mode instead drops colour outliers (colour distance beyond the
/// best candidate's plus a tolerance) and sorts by radius descending, since
/// overlapping strobe exposures bias toward the larger, more complete disc.
pub fn filter_and_score(
    circles: &[Circle],
    reference: &Ball,
    image: &RgbImage,
    mode: SearchMode,
    report_failures: bool,
) -> Vec<Ball> {
    let expected_exists = reference.has_color_stats();
    let expected_avg = reference.expected_color();
    let expected_median = if expected_exists {
        reference.median_color
    } else {
        expected_avg
    };
    let expected_std = if expected_exists {
        reference.std_color
    } else {
        ColorTriplet::default()
    };

    let mut candidates: Vec<Candidate> = Vec::new();
    for (index, circle) in circles.iter().take(MAX_CIRCLES_TO_EVALUATE).enumerate() {
        let i = index + 1;
        let radius = circle.radius.round() as i32;
        if radius < MIN_BALL_CANDIDATE_RADIUS {
            tracing::trace!("skipping too-small circle of radius {radius}");
            continue;
        }

        let mut color_score = 0.0f64;
        let mut average = ColorTriplet::default();
        let mut median = ColorTriplet::default();
        let mut std = ColorTriplet::default();
        if expected_exists || mode == SearchMode::Putting {
            let [avg_c, median_c, std_c] = ball_color_stats(image, circle);
            let avg_diff = avg_c.distance(&expected_avg) as f64;
            let median_diff = median_c.distance(&expected_median) as f64;
            let std_diff = std_c.distance(&expected_std) as f64;
            color_score = avg_diff * avg_diff + 20.0 * std_diff * std_diff;
            tracing::trace!(
                "candidate {i}: r={radius} diffs avg={avg_diff:.1} median={median_diff:.1} std={std_diff:.1}"
            );
            average = avg_c;
            median = median_c;
            std = std_c;
        }
        let ordering_penalty = 200.0 * (10.0 * i as f64).powi(3);

        candidates.push(Candidate {
            circle: *circle,
            color_score,
            composite_score: color_score + ordering_penalty,
            radius,
            average,
            median,
            std,
        });
    }

    if candidates.is_empty() {
        if report_failures {
            tracing::error!("no valid circle candidates after filtering");
        }
        return Vec::new();
    }

    if mode != SearchMode::Strobed && expected_exists {
        candidates.sort_by(|a, b| a.composite_score.partial_cmp(&b.composite_score).unwrap());
    }

    if mode == SearchMode::Strobed && expected_exists {
        let best_color = candidates
            .iter()
            .map(|c| c.color_score)
            .fold(f64::INFINITY, f64::min);
        let cutoff = best_color + CANDIDATE_COLOR_TOLERANCE;
        candidates.retain(|c| c.color_score <= cutoff);
        tracing::trace!("{} candidates within colour tolerance", candidates.len());
        candidates.sort_by(|a, b| b.radius.cmp(&a.radius));
    }

    if candidates.is_empty() {
        if report_failures {
            tracing::error!("no final candidates after colour filtering");
        }
        return Vec::new();
    }

    candidates
        .into_iter()
        .enumerate()
        .map(|(rank, c)| Ball {
            circle: c.circle,
            quality_rank: rank as u32,
            measured_radius_px: c.radius as f32,
            radius_at_calibration_px: reference.radius_at_calibration_px,
            average_color: c.average,
            median_color: c.median,
            std_color: c.std,
            hsv_lower: reference.hsv_lower,
            hsv_upper: reference.hsv_upper,
            angles_camera_ortho: reference.angles_camera_ortho,
            ellipse: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn white_reference() -> Ball {
        let mut b = Ball::with_circle(Circle::new(0.0, 0.0, 20.0));
        b.average_color = ColorTriplet::new(230.0, 230.0, 230.0);
        b.median_color = b.average_color;
        b.std_color = ColorTriplet::new(5.0, 5.0, 5.0);
        b
    }

    fn image_with_discs() -> RgbImage {
        let mut img = RgbImage::from_pixel(200, 100, image::Rgb([60, 60, 60]));
        for (cx, cy, r, v) in [(50i32, 50i32, 20i32, 235u8), (150, 50, 15, 235)] {
            imageproc::drawing::draw_filled_circle_mut(
                &mut img,
                (cx, cy),
                r,
                image::Rgb([v, v, v]),
            );
        }
        img
    }

    #[test]
    fn small_circles_are_rejected() {
        let img = image_with_discs();
        let circles = [Circle::new(50.0, 50.0, 4.0)];
        let balls = filter_and_score(&circles, &white_reference(), &img, SearchMode::Placed, false);
        assert!(balls.is_empty());
    }

    #[test]
    fn ranks_are_sequential_from_zero() {
        let img = image_with_discs();
        let circles = [
            Circle::new(50.0, 50.0, 20.0),
            Circle::new(150.0, 50.0, 15.0),
        ];
        let balls = filter_and_score(&circles, &white_reference(), &img, SearchMode::Placed, false);
        assert_eq!(balls.len(), 2);
        assert_eq!(balls[0].quality_rank, 0);
        assert_eq!(balls[1].quality_rank, 1);
        // Equal colours: the ordering penalty keeps Hough order.
        assert_eq!(balls[0].circle.x, 50.0);
    }

    #[test]
    fn strobed_sorts_by_radius_descending() {
        let img = image_with_discs();
        let circles = [
            Circle::new(150.0, 50.0, 15.0),
            Circle::new(50.0, 50.0, 20.0),
        ];
        let balls = filter_and_score(&circles, &white_reference(), &img, SearchMode::Strobed, false);
        assert_eq!(balls.len(), 2);
        assert!(balls[0].measured_radius_px >= balls[1].measured_radius_px);
    }

    #[test]
    fn strobed_drops_color_outliers() {
        let mut img = image_with_discs();
        // Paint a dark disc: far from the white reference colour.
        imageproc::drawing::draw_filled_circle_mut(&mut img, (100, 20), 18, image::Rgb([10, 10, 10]));
        let circles = [
            Circle::new(50.0, 50.0, 20.0),
            Circle::new(100.0, 20.0, 18.0),
        ];
        let balls = filter_and_score(&circles, &white_reference(), &img, SearchMode::Strobed, false);
        assert_eq!(balls.len(), 1, "dark disc must be dropped by colour tolerance");
        assert_eq!(balls[0].circle.x, 50.0);
    }
}
