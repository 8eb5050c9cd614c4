//! Letterbox transform: aspect-preserving resize onto a fixed square canvas
//! with neutral-gray padding, plus the inverse mapping back to slice
//! coordinates.

use image::RgbImage;

/// Neutral padding value used by the detection models' training pipeline.
const PAD_VALUE: u8 = 114;

/// Parameters of an applied letterbox transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub size: u32,
}

impl Letterbox {
    /// Map a point from letterbox coordinates back to source coordinates.
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }

    /// Map a length from letterbox scale back to source scale.
    pub fn len_to_source(&self, len: f32) -> f32 {
        len / self.scale
    }
}

/// Letterbox `image` to a `size x size` canvas.
pub fn letterbox(image: &RgbImage, size: u32) -> (RgbImage, Letterbox) {
    let (w, h) = image.dimensions();
    let scale = (size as f32 / w as f32).min(size as f32 / h as f32);
    let new_w = ((w as f32 * scale) as u32).max(1);
    let new_h = ((h as f32 * scale) as u32).max(1);

    let resized = image::imageops::resize(image, new_w, new_h, image::imageops::FilterType::Triangle);

    let mut canvas = RgbImage::from_pixel(size, size, image::Rgb([PAD_VALUE; 3]));
    let x_off = (size - new_w) / 2;
    let y_off = (size - new_h) / 2;
    image::imageops::replace(&mut canvas, &resized, x_off as i64, y_off as i64);

    (
        canvas,
        Letterbox {
            scale,
            pad_x: x_off as f32,
            pad_y: y_off as f32,
            size,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_image_is_padded_vertically() {
        let img = RgbImage::from_pixel(640, 320, image::Rgb([200, 0, 0]));
        let (canvas, lb) = letterbox(&img, 640);
        assert_eq!(canvas.dimensions(), (640, 640));
        assert_eq!(lb.scale, 1.0);
        assert_eq!(lb.pad_y, 160.0);
        assert_eq!(canvas.get_pixel(320, 10)[0], PAD_VALUE);
        assert_eq!(canvas.get_pixel(320, 320)[0], 200);
    }

    #[test]
    fn inverse_maps_back_to_source() {
        let img = RgbImage::new(1920, 1088);
        let (_, lb) = letterbox(&img, 640);
        // A point at the source center maps to the canvas center and back.
        let cx = 960.0 * lb.scale + lb.pad_x;
        let cy = 544.0 * lb.scale + lb.pad_y;
        let (sx, sy) = lb.to_source(cx, cy);
        assert!((sx - 960.0).abs() < 0.5);
        assert!((sy - 544.0).abs() < 0.5);
    }
}
