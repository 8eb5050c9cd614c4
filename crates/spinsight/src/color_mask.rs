//! HSV colour-range masking with hue wraparound.
//!
//! Hue lives on a circle of 180 units (OpenCV 8-bit convention), so a widened
//! range around a reddish reference colour can spill past either end. When it
//! does, the mask is the bitwise OR of the two sub-ranges spanning the wrap.

use image::GrayImage;

use crate::ball::{Ball, ColorTriplet};
use crate::imgutil::HsvImage;

/// Upper end of the hue channel (exclusive) in the 8-bit HSV convention.
pub const HUE_MAX: f32 = 180.0;

/// Default widening applied around a reference ball's stored HSV range.
pub const DEFAULT_WIDENING: f32 = 35.0;

fn in_range(hsv: &HsvImage, lower: [f32; 3], upper: [f32; 3]) -> GrayImage {
    let (w, h) = hsv.dimensions();
    let mut mask = GrayImage::new(w, h);
    for (x, y, p) in hsv.enumerate_pixels() {
        let inside = p.0[0] >= lower[0]
            && p.0[0] <= upper[0]
            && p.0[1] >= lower[1]
            && p.0[1] <= upper[1]
            && p.0[2] >= lower[2]
            && p.0[2] <= upper[2];
        if inside {
            mask.put_pixel(x, y, image::Luma([255]));
        }
    }
    mask
}

fn or_masks(a: &GrayImage, b: &GrayImage) -> GrayImage {
    let mut out = a.clone();
    for (pa, pb) in out.iter_mut().zip(b.iter()) {
        *pa |= *pb;
    }
    out
}

/// Binary mask of pixels whose HSV value lies within the widened
/// `[lower - widening, upper + widening]` range.
///
/// 255 marks pixels inside the range. S and V upper bounds are clamped to
/// 255; a hue range crossing the 180-degree wrap point is handled as two
/// sub-ranges OR-ed together. The mask is 8-bit single channel.
pub fn color_mask(
    hsv: &HsvImage,
    lower: &ColorTriplet,
    upper: &ColorTriplet,
    widening: f32,
) -> GrayImage {
    let mut lo = [
        lower.0[0] - widening,
        (lower.0[1] - widening).max(0.0),
        (lower.0[2] - widening).max(0.0),
    ];
    let mut hi = [
        upper.0[0] + widening,
        (upper.0[1] + widening).min(255.0),
        (upper.0[2] + widening).min(255.0),
    ];

    if lo[0] >= 0.0 && hi[0] <= HUE_MAX {
        return in_range(hsv, lo, hi);
    }

    // The widened hue range loops past an end of the hue circle: split it
    // into the leftmost [0, ..] part and the rightmost [.., HUE_MAX] part.
    let (left_lo, left_hi, right_lo, right_hi);
    if lo[0] < 0.0 {
        left_lo = [0.0, lo[1], lo[2]];
        left_hi = [hi[0].min(HUE_MAX), hi[1], hi[2]];
        right_lo = [HUE_MAX + lo[0], lo[1], lo[2]];
        right_hi = [HUE_MAX, hi[1], hi[2]];
        lo[0] = 0.0;
    } else {
        left_lo = [0.0, lo[1], lo[2]];
        left_hi = [hi[0] - HUE_MAX, hi[1], hi[2]];
        right_lo = [lo[0], lo[1], lo[2]];
        right_hi = [HUE_MAX, hi[1], hi[2]];
        hi[0] = HUE_MAX;
    }

    let first = in_range(hsv, left_lo, left_hi);
    let second = in_range(hsv, right_lo, right_hi);
    or_masks(&first, &second)
}

/// Convenience overload: derive the range from a reference ball's stored
/// HSV bounds.
pub fn color_mask_for_ball(hsv: &HsvImage, ball: &Ball, widening: f32) -> GrayImage {
    color_mask(hsv, &ball.hsv_lower, &ball.hsv_upper, widening)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imgutil::to_hsv;
    use image::RgbImage;

    fn hsv_of_solid(r: u8, g: u8, b: u8) -> HsvImage {
        to_hsv(&RgbImage::from_pixel(4, 4, image::Rgb([r, g, b])))
    }

    #[test]
    fn plain_range_covers_matching_pixels() {
        // A mid-green pixel: hue around 60 in the 0..180 convention.
        let hsv = hsv_of_solid(20, 200, 20);
        let mask = color_mask(
            &hsv,
            &ColorTriplet::new(50.0, 100.0, 100.0),
            &ColorTriplet::new(70.0, 255.0, 255.0),
            0.0,
        );
        assert!(mask.iter().all(|&v| v == 255));
    }

    #[test]
    fn wrapped_range_covers_deep_red() {
        // Deep red sits just below the 180 wrap point.
        let hsv = hsv_of_solid(250, 5, 20);
        // Widened range [150, 199] loops past 180.
        let mask = color_mask(
            &hsv,
            &ColorTriplet::new(170.0, 50.0, 50.0),
            &ColorTriplet::new(179.0, 255.0, 255.0),
            20.0,
        );
        assert!(mask.iter().all(|&v| v == 255), "red pixels must be covered");

        let green = hsv_of_solid(20, 200, 20);
        let mask = color_mask(
            &green,
            &ColorTriplet::new(170.0, 50.0, 50.0),
            &ColorTriplet::new(179.0, 255.0, 255.0),
            20.0,
        );
        assert!(mask.iter().all(|&v| v == 0), "green pixels must be excluded");
    }

    #[test]
    fn negative_lower_hue_wraps_low_end() {
        // Hue ~5 (orange-red); range widened below zero must still cover it
        // through the left sub-range.
        let hsv = hsv_of_solid(250, 40, 10);
        let mask = color_mask(
            &hsv,
            &ColorTriplet::new(2.0, 50.0, 50.0),
            &ColorTriplet::new(12.0, 255.0, 255.0),
            10.0,
        );
        assert!(mask.iter().all(|&v| v == 255));
    }
}
