//! Small image utilities shared across the pipeline: sub-image extraction
//! with coordinate-offset bookkeeping, even rounding, colour-space helpers,
//! in-circle colour statistics and a ring buffer for recent frames.

use image::{GrayImage, ImageBuffer, Pixel, RgbImage};
use imageproc::rect::Rect;

use crate::ball::{Circle, ColorTriplet};

/// Offsets recorded when a sub-image is extracted.
///
/// Every geometry produced inside a sub-image must be translated by
/// `sub_to_full` before it is reported; `full_to_sub` goes the other way.
/// The two are negatives of each other but both travel with the sub-image so
/// call sites never mix coordinate spaces silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoiOffsets {
    pub sub_to_full: (i32, i32),
    pub full_to_sub: (i32, i32),
}

/// Extract the part of `image` covered by `rect`, clamped to image bounds.
///
/// An out-of-range rectangle is corrected rather than rejected; the returned
/// offsets describe the rectangle actually used.
pub fn sub_image<P>(
    image: &ImageBuffer<P, Vec<P::Subpixel>>,
    rect: Rect,
) -> (ImageBuffer<P, Vec<P::Subpixel>>, RoiOffsets)
where
    P: Pixel + 'static,
{
    let (w, h) = image.dimensions();
    let x0 = rect.left().clamp(0, w.saturating_sub(1) as i32) as u32;
    let y0 = rect.top().clamp(0, h.saturating_sub(1) as i32) as u32;
    let x1 = (rect.left() + rect.width() as i32).clamp(x0 as i32 + 1, w as i32) as u32;
    let y1 = (rect.top() + rect.height() as i32).clamp(y0 as i32 + 1, h as i32) as u32;

    let sub = image::imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
    let offsets = RoiOffsets {
        sub_to_full: (x0 as i32, y0 as i32),
        full_to_sub: (-(x0 as i32), -(y0 as i32)),
    };
    (sub, offsets)
}

/// Square region of side `2 * half` centred on `(cx, cy)`.
pub fn centered_rect(cx: f32, cy: f32, half: f32) -> Rect {
    let side = (2.0 * half).round().max(1.0) as u32;
    Rect::at((cx - half).round() as i32, (cy - half).round() as i32).of_size(side, side)
}

/// Round to the nearest even integer; exact odd integers round up.
pub fn round_and_make_even(v: f64) -> i32 {
    ((v / 2.0).round() as i32) * 2
}

/// Force a positive kernel size up to the next odd value.
pub fn force_odd(k: i32) -> i32 {
    if k > 0 && k % 2 == 0 {
        k + 1
    } else {
        k
    }
}

/// Gaussian blur parametrised by kernel size instead of sigma.
///
/// Sigma is derived the same way OpenCV derives it from a kernel size, so
/// configuration values keep their familiar meaning. Sizes <= 0 skip the
/// blur; even sizes are forced odd.
pub fn gaussian_blur_ksize(image: &GrayImage, ksize: i32) -> GrayImage {
    if ksize <= 0 {
        return image.clone();
    }
    let k = force_odd(ksize) as f32;
    let sigma = 0.3 * ((k - 1.0) * 0.5 - 1.0) + 0.8;
    imageproc::filter::gaussian_blur_f32(image, sigma)
}

/// Median blur with an odd kernel size.
pub fn median_blur_ksize(image: &GrayImage, ksize: i32) -> GrayImage {
    if ksize <= 1 {
        return image.clone();
    }
    let r = (force_odd(ksize) / 2) as u32;
    imageproc::filter::median_filter(image, r, r)
}

/// Grayscale conversion.
pub fn to_gray(image: &RgbImage) -> GrayImage {
    image::imageops::grayscale(image)
}

/// Convert one RGB pixel to an HSV triplet in OpenCV 8-bit convention:
/// H in `[0, 180)`, S and V in `[0, 255]`.
pub fn hsv_from_rgb(r: f32, g: f32, b: f32) -> ColorTriplet {
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = v - min;

    let s = if v > 0.0 { 255.0 * delta / v } else { 0.0 };
    let h = if delta <= 0.0 {
        0.0
    } else if (v - r).abs() < f32::EPSILON {
        60.0 * (g - b) / delta
    } else if (v - g).abs() < f32::EPSILON {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    ColorTriplet::new(h / 2.0, s, v)
}

/// Convert an HSV triplet (OpenCV 8-bit convention) to BGR.
pub fn bgr_from_hsv(hsv: &ColorTriplet) -> ColorTriplet {
    let h = (hsv.0[0] * 2.0).rem_euclid(360.0);
    let s = (hsv.0[1] / 255.0).clamp(0.0, 1.0);
    let v = hsv.0[2].clamp(0.0, 255.0);

    let c = v * s;
    let x = c * (1.0 - ((h / 60.0).rem_euclid(2.0) - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    ColorTriplet::new(b + m, g + m, r + m)
}

/// HSV image (per-channel f32, OpenCV 8-bit ranges) from an RGB image.
pub type HsvImage = ImageBuffer<image::Rgb<f32>, Vec<f32>>;

pub fn to_hsv(image: &RgbImage) -> HsvImage {
    let (w, h) = image.dimensions();
    let mut out = HsvImage::new(w, h);
    for (x, y, p) in image.enumerate_pixels() {
        let hsv = hsv_from_rgb(p[0] as f32, p[1] as f32, p[2] as f32);
        out.put_pixel(x, y, image::Rgb(hsv.0));
    }
    out
}

/// Mean, median and per-channel standard deviation of the BGR colour in a
/// square patch of side `0.8 * radius` centred on the circle.
pub fn ball_color_stats(image: &RgbImage, circle: &Circle) -> [ColorTriplet; 3] {
    let (w, h) = image.dimensions();
    let half = (0.4 * circle.radius).max(1.0);
    let x0 = ((circle.x - half).floor().max(0.0)) as u32;
    let y0 = ((circle.y - half).floor().max(0.0)) as u32;
    let x1 = ((circle.x + half).ceil() as u32).min(w.saturating_sub(1));
    let y1 = ((circle.y + half).ceil() as u32).min(h.saturating_sub(1));

    let mut samples: [Vec<f32>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    for y in y0..=y1 {
        for x in x0..=x1 {
            let p = image.get_pixel(x, y);
            // BGR channel order to match the colour model used everywhere.
            samples[0].push(p[2] as f32);
            samples[1].push(p[1] as f32);
            samples[2].push(p[0] as f32);
        }
    }

    let n = samples[0].len().max(1) as f32;
    let mut mean = [0.0f32; 3];
    let mut median = [0.0f32; 3];
    let mut std = [0.0f32; 3];
    for c in 0..3 {
        let sum: f32 = samples[c].iter().sum();
        mean[c] = sum / n;
        let var: f32 = samples[c].iter().map(|v| (v - mean[c]) * (v - mean[c])).sum::<f32>() / n;
        std[c] = var.sqrt();
        let mut sorted = samples[c].clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        if !sorted.is_empty() {
            median[c] = sorted[sorted.len() / 2];
        }
    }
    [
        ColorTriplet(mean),
        ColorTriplet(median),
        ColorTriplet(std),
    ]
}

/// Fixed-capacity ring buffer of recent frames.
///
/// The motion watcher keeps a short history of area-of-interest frames here
/// so downstream analysis (e.g. club-face work) can look back past the
/// trigger frame.
#[derive(Debug, Clone)]
pub struct FrameRing<T> {
    buf: Vec<T>,
    capacity: usize,
    next: usize,
}

impl<T> FrameRing<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            next: 0,
        }
    }

    pub fn push(&mut self, frame: T) {
        if self.buf.len() < self.capacity {
            self.buf.push(frame);
        } else {
            self.buf[self.next] = frame;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Frames from most recent to oldest.
    pub fn iter_recent(&self) -> impl Iterator<Item = &T> {
        let n = self.buf.len();
        (0..n).map(move |i| {
            let idx = (self.next + self.capacity - 1 - i) % self.capacity;
            &self.buf[idx]
        })
    }

    /// Drain the buffer into a vector, most recent first.
    pub fn into_recent(self) -> Vec<T>
    where
        T: Clone,
    {
        self.iter_recent().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_and_make_even_matches_expected_values() {
        assert_eq!(round_and_make_even(7.3), 8);
        assert_eq!(round_and_make_even(7.7), 8);
        assert_eq!(round_and_make_even(8.0), 8);
        assert_eq!(round_and_make_even(8.5), 8);
        assert_eq!(round_and_make_even(7.0), 8);
        assert_eq!(round_and_make_even(9.0), 10);
    }

    #[test]
    fn sub_image_clamps_and_records_offsets() {
        let img = GrayImage::from_pixel(100, 80, image::Luma([7]));
        let (sub, offsets) = sub_image(&img, Rect::at(-10, 20).of_size(40, 100));
        assert_eq!(sub.dimensions(), (30, 60));
        assert_eq!(offsets.sub_to_full, (0, 20));
        assert_eq!(offsets.full_to_sub, (0, -20));
    }

    #[test]
    fn hsv_round_trip_on_primary_colors() {
        for (r, g, b) in [(255.0, 0.0, 0.0), (0.0, 255.0, 0.0), (40.0, 80.0, 200.0)] {
            let hsv = hsv_from_rgb(r, g, b);
            let bgr = bgr_from_hsv(&hsv);
            assert!((bgr.0[2] - r).abs() < 2.0, "r mismatch: {:?}", bgr);
            assert!((bgr.0[1] - g).abs() < 2.0, "g mismatch: {:?}", bgr);
            assert!((bgr.0[0] - b).abs() < 2.0, "b mismatch: {:?}", bgr);
        }
    }

    #[test]
    fn color_stats_on_uniform_patch() {
        let img = RgbImage::from_pixel(60, 60, image::Rgb([10, 20, 30]));
        let [mean, median, std] = ball_color_stats(&img, &Circle::new(30.0, 30.0, 20.0));
        assert_eq!(mean.0, [30.0, 20.0, 10.0]);
        assert_eq!(median.0, [30.0, 20.0, 10.0]);
        assert_eq!(std.0, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn frame_ring_overwrites_oldest() {
        let mut ring = FrameRing::new(3);
        for i in 0..5 {
            ring.push(i);
        }
        let recent: Vec<i32> = ring.iter_recent().cloned().collect();
        assert_eq!(recent, vec![4, 3, 2]);
    }
}
