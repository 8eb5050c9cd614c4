//! Core geometry and ball data types shared across the detection pipeline.

use serde::{Deserialize, Serialize};

use crate::ellipse::Ellipse;

/// A detected circle in pixel coordinates.
///
/// Coordinates are real-valued; callers that need integer centers (e.g. for
/// concentric-circle comparison) round explicitly. Ordering between circles
/// of equal radius is unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    /// Center x (pixels).
    pub x: f32,
    /// Center y (pixels).
    pub y: f32,
    /// Radius (pixels), always positive for a valid circle.
    pub radius: f32,
}

impl Circle {
    pub fn new(x: f32, y: f32, radius: f32) -> Self {
        Self { x, y, radius }
    }

    /// Integer center, rounding half away from zero.
    pub fn center_i32(&self) -> (i32, i32) {
        (self.x.round() as i32, self.y.round() as i32)
    }

    /// True when `(px, py)` lies inside the circle.
    pub fn contains(&self, px: f32, py: f32) -> bool {
        let dx = px - self.x;
        let dy = py - self.y;
        dx * dx + dy * dy <= self.radius * self.radius
    }

    /// Round center and radius to whole pixels.
    pub fn rounded(&self) -> Self {
        Self {
            x: self.x.round(),
            y: self.y.round(),
            radius: self.radius.round(),
        }
    }
}

/// Three colour channels stored as floating point so that averaging and
/// distance computations are lossless.
///
/// The channel meaning depends on context: BGR for colour statistics, HSV
/// for mask ranges (H in `[0, 180)`, S and V in `[0, 255]`).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ColorTriplet(pub [f32; 3]);

impl ColorTriplet {
    pub fn new(c0: f32, c1: f32, c2: f32) -> Self {
        Self([c0, c1, c2])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0.0; 3]
    }

    /// Euclidean distance between two triplets.
    pub fn distance(&self, other: &Self) -> f32 {
        let d0 = self.0[0] - other.0[0];
        let d1 = self.0[1] - other.0[1];
        let d2 = self.0[2] - other.0[2];
        (d0 * d0 + d1 * d1 + d2 * d2).sqrt()
    }
}

/// Golfer orientation; decides which way "in front of the ball" points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Handedness {
    #[default]
    RightHanded,
    LeftHanded,
}

/// A golf ball candidate produced by the detector.
///
/// The circle is always expressed in full-image coordinates. A ball with
/// `quality_rank == 0` in a returned list is the facade's best candidate.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Ball {
    /// Detected circle in full-image coordinates.
    pub circle: Circle,
    /// 0 = best candidate of a returned list.
    pub quality_rank: u32,
    /// Measured radius of this detection (pixels).
    pub measured_radius_px: f32,
    /// Reference radius recorded at calibration distance (pixels).
    pub radius_at_calibration_px: f32,
    /// Mean colour inside the ball (BGR).
    pub average_color: ColorTriplet,
    /// Median colour inside the ball (BGR).
    pub median_color: ColorTriplet,
    /// Per-channel standard deviation inside the ball (BGR).
    pub std_color: ColorTriplet,
    /// Lower bound of the expected HSV colour range for this ball.
    pub hsv_lower: ColorTriplet,
    /// Upper bound of the expected HSV colour range for this ball.
    pub hsv_upper: ColorTriplet,
    /// Angular offsets (x, y) of the ball from the camera's orthographic
    /// center, in degrees. Used by the spin estimator to bring the two views
    /// into a common reference frame.
    pub angles_camera_ortho: [f32; 2],
    /// Fitted ellipse, when the ellipse refinement path ran.
    pub ellipse: Option<Ellipse>,
}

impl Default for Circle {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            radius: 0.0,
        }
    }
}

impl Ball {
    /// A reference ball carrying only a circle; the usual starting point for
    /// detection requests.
    pub fn with_circle(circle: Circle) -> Self {
        Self {
            measured_radius_px: circle.radius,
            circle,
            ..Self::default()
        }
    }

    pub fn x(&self) -> f32 {
        self.circle.x
    }

    pub fn y(&self) -> f32 {
        self.circle.y
    }

    pub fn set_position(&mut self, x: f32, y: f32) {
        self.circle.x = x;
        self.circle.y = y;
    }

    /// True when measured colour statistics are available (all-zero means
    /// the ball was never colour-profiled).
    pub fn has_color_stats(&self) -> bool {
        !self.average_color.is_zero()
    }

    /// Expected BGR colour anchor for candidate scoring.
    ///
    /// Prefers measured statistics; falls back to the center of the HSV
    /// search range when the ball was never profiled.
    pub fn expected_color(&self) -> ColorTriplet {
        if self.has_color_stats() {
            return self.average_color;
        }
        let center = ColorTriplet::new(
            0.5 * (self.hsv_lower.0[0] + self.hsv_upper.0[0]),
            0.5 * (self.hsv_lower.0[1] + self.hsv_upper.0[1]),
            0.5 * (self.hsv_lower.0[2] + self.hsv_upper.0[2]),
        );
        crate::imgutil::bgr_from_hsv(&center)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circle_contains_boundary() {
        let c = Circle::new(10.0, 10.0, 5.0);
        assert!(c.contains(14.9, 10.0));
        assert!(c.contains(10.0, 15.0));
        assert!(!c.contains(15.1, 10.0));
    }

    #[test]
    fn color_distance_is_euclidean() {
        let a = ColorTriplet::new(0.0, 0.0, 0.0);
        let b = ColorTriplet::new(3.0, 4.0, 0.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn expected_color_prefers_measured_stats() {
        let mut ball = Ball::default();
        ball.average_color = ColorTriplet::new(200.0, 210.0, 220.0);
        assert_eq!(ball.expected_color(), ball.average_color);
    }
}
