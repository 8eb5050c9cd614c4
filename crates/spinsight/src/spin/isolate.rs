//! Ball isolation and masking for spin analysis.

use image::GrayImage;
use imageproc::rect::Rect;

use crate::ball::Circle;
use crate::imgutil::sub_image;

/// Isolation margin around the measured radius.
const BALL_SURROUND_MULTIPLIER: f32 = 1.05;

/// Mask radius factor for the isolated (pre-Gabor) ball image.
const ISOLATION_MASK_FACTOR: f32 = 0.995;

/// A ball cut out of its source frame, with the circle re-expressed in
/// sub-image coordinates.
#[derive(Debug, Clone)]
pub struct IsolatedBall {
    pub image: GrayImage,
    pub circle: Circle,
}

/// Replace everything outside `factor * radius` with `fill`.
pub fn mask_outside_ball(image: &GrayImage, circle: &Circle, factor: f32, fill: u8) -> GrayImage {
    let mask_radius = circle.radius * factor;
    let r2 = mask_radius * mask_radius;
    let mut out = image.clone();
    for (x, y, p) in out.enumerate_pixels_mut() {
        let dx = x as f32 - circle.x;
        let dy = y as f32 - circle.y;
        if dx * dx + dy * dy > r2 {
            p[0] = fill;
        }
    }
    out
}

/// Extract a square around the ball (side `2 * 1.05 * r`), equalize its
/// histogram and black out everything outside the ball.
pub fn isolate_ball(image: &GrayImage, circle: &Circle) -> IsolatedBall {
    let r1 = (circle.radius * BALL_SURROUND_MULTIPLIER).round();
    let side = (2.0 * r1) as u32;
    let (w, h) = image.dimensions();

    let mut x0 = (circle.x - r1).round() as i32;
    let mut y0 = (circle.y - r1).round() as i32;
    x0 = x0.max(0);
    y0 = y0.max(0);
    if x0 as u32 + side >= w {
        x0 = w as i32 - side as i32 - 1;
    }
    if y0 as u32 + side >= h {
        y0 = h as i32 - side as i32 - 1;
    }
    let rect = Rect::at(x0.max(0), y0.max(0)).of_size(side.min(w), side.min(h));
    let (ball_image, _offsets) = sub_image(image, rect);

    // Re-center the circle in the cropped frame.
    let local = Circle::new(
        circle.x - rect.left() as f32,
        circle.y - rect.top() as f32,
        circle.radius,
    );

    let equalized = imageproc::contrast::equalize_histogram(&ball_image);
    let masked = mask_outside_ball(&equalized, &local, ISOLATION_MASK_FACTOR, 0);

    IsolatedBall {
        image: masked,
        circle: local,
    }
}

/// Bring two isolated balls to the same size by linearly up-scaling the
/// smaller one; the scaled ball's circle follows the resize factor.
pub fn match_sizes(a: IsolatedBall, b: IsolatedBall) -> (IsolatedBall, IsolatedBall) {
    let (aw, ah) = a.image.dimensions();
    let (bw, bh) = b.image.dimensions();
    if aw > bw || ah > bh {
        let scaled = scale_to(b, aw, ah);
        (a, scaled)
    } else if bw > aw || bh > ah {
        let scaled = scale_to(a, bw, bh);
        (scaled, b)
    } else {
        (a, b)
    }
}

fn scale_to(ball: IsolatedBall, w: u32, h: u32) -> IsolatedBall {
    let (ow, _) = ball.image.dimensions();
    let factor = w as f32 / ow.max(1) as f32;
    let image = image::imageops::resize(&ball.image, w, h, image::imageops::FilterType::Triangle);
    IsolatedBall {
        image,
        circle: Circle::new(
            ball.circle.x * factor,
            ball.circle.y * factor,
            ball.circle.radius * factor,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolation_centers_the_ball() {
        let mut img = GrayImage::from_pixel(200, 200, image::Luma([10]));
        imageproc::drawing::draw_filled_circle_mut(&mut img, (100, 100), 40, image::Luma([220]));
        let isolated = isolate_ball(&img, &Circle::new(100.0, 100.0, 40.0));
        let (w, h) = isolated.image.dimensions();
        assert_eq!((w, h), (84, 84));
        assert!((isolated.circle.x - 42.0).abs() <= 1.0);
        assert!((isolated.circle.y - 42.0).abs() <= 1.0);
    }

    #[test]
    fn mask_blacks_out_the_outside() {
        let img = GrayImage::from_pixel(80, 80, image::Luma([200]));
        let circle = Circle::new(40.0, 40.0, 30.0);
        let masked = mask_outside_ball(&img, &circle, 0.9, 0);
        assert_eq!(masked.get_pixel(40, 40)[0], 200);
        assert_eq!(masked.get_pixel(0, 0)[0], 0);
        assert_eq!(masked.get_pixel(40, 78)[0], 0);
    }

    #[test]
    fn size_matching_scales_circle_too() {
        let a = IsolatedBall {
            image: GrayImage::new(100, 100),
            circle: Circle::new(50.0, 50.0, 47.0),
        };
        let b = IsolatedBall {
            image: GrayImage::new(50, 50),
            circle: Circle::new(25.0, 25.0, 23.0),
        };
        let (a2, b2) = match_sizes(a, b);
        assert_eq!(a2.image.dimensions(), b2.image.dimensions());
        assert!((b2.circle.radius - 46.0).abs() <= 0.5);
        assert!((b2.circle.x - 50.0).abs() <= 0.5);
    }
}
