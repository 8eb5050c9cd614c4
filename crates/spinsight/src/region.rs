//! Region manager: the area of interest ahead of a teed ball, and a
//! cooperative motion watch that polls a camera until the scene changes.

use std::time::{Duration, Instant};

use image::{GrayImage, RgbImage};
use imageproc::rect::Rect;

use crate::ball::{Ball, Circle, Handedness};
use crate::imgutil::{sub_image, to_gray, FrameRing};
use crate::DetectError;

/// Source of frames for the motion watch. The capture pipeline lives
/// outside the core; this is its only contact surface.
pub trait FrameSource {
    /// Next frame, or `None` when capture failed.
    fn next_frame(&mut self) -> Option<RgbImage>;
}

/// Threshold applied to the frame difference before contour extraction.
const MOTION_DIFF_THRESHOLD: u8 = 70;

/// Frames discarded at the start of a watch for sensor stabilisation.
const STARTUP_FRAMES_TO_SKIP: u32 = 1;

/// Frames of history retained around the trigger.
const RECENT_FRAME_CAPACITY: usize = 8;

/// The watch region sits in front of the ball in the direction of flight:
/// from the ball center to 10 radii forward, 6 radii up and 1.5 radii down,
/// clamped to the image. Flight direction follows the golfer's handedness.
pub fn area_of_interest(
    ball: &Circle,
    image_width: u32,
    image_height: u32,
    handedness: Handedness,
) -> Rect {
    let x = ball.x as i32;
    let y = ball.y as i32;
    let r = ball.radius as i32;

    let (xmin, xmax) = match handedness {
        Handedness::RightHanded => (x.max(0), (x + 10 * r).min(image_width as i32)),
        Handedness::LeftHanded => ((x - 10 * r).max(0), x.min(image_width as i32)),
    };
    let ymin = (y - 6 * r).max(0);
    let ymax = (y + (r as f32 * 1.5) as i32).min(image_height as i32);

    Rect::at(xmin, ymin).of_size(
        (xmax - xmin).max(1) as u32,
        (ymax - ymin).max(1) as u32,
    )
}

/// A detected motion event.
#[derive(Debug, Clone)]
pub struct MotionEvent {
    /// The area-of-interest crop in which motion was first seen.
    pub frame: RgbImage,
    /// Recent area-of-interest frames, most recent first.
    pub recent_frames: Vec<RgbImage>,
}

/// Signed area of a closed pixel contour (shoelace formula).
fn contour_area(points: &[imageproc::point::Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut acc = 0i64;
    for i in 0..points.len() {
        let p = points[i];
        let q = points[(i + 1) % points.len()];
        acc += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    (acc.abs() as f64) * 0.5
}

/// Poll `camera` until the area of interest in front of `ball` changes
/// substantially, or until `timeout` passes.
///
/// A baseline grayscale frame (blurred 7x7) is kept; each new frame is
/// differenced against it, thresholded, and scanned for contours. Motion is
/// accepted when at least one contour exceeds the ball's squared radius in
/// area and the contours' total area does too.
///
/// Returns `Ok(Some(event))` on motion, `Ok(None)` on timeout, and an error
/// when the camera stops delivering frames.
pub fn wait_for_ball_movement<C: FrameSource>(
    camera: &mut C,
    ball: &Ball,
    timeout: Duration,
    handedness: Handedness,
) -> Result<Option<MotionEvent>, DetectError> {
    let min_area = (ball.circle.radius as f64).powi(2);
    let start = Instant::now();

    let mut baseline: Option<GrayImage> = None;
    let mut startup_skipped = 0u32;
    let mut ring: FrameRing<RgbImage> = FrameRing::new(RECENT_FRAME_CAPACITY);

    loop {
        if start.elapsed() > timeout {
            tracing::warn!("wait_for_ball_movement: time ran out");
            return Ok(None);
        }

        let Some(full_frame) = camera.next_frame() else {
            tracing::warn!("frame was not captured");
            return Err(DetectError::InvalidInput("camera returned no frame".into()));
        };

        if startup_skipped < STARTUP_FRAMES_TO_SKIP {
            startup_skipped += 1;
            continue;
        }

        let aoi = area_of_interest(
            &ball.circle,
            full_frame.width(),
            full_frame.height(),
            handedness,
        );
        let (frame, _) = sub_image(&full_frame, aoi);
        ring.push(frame.clone());

        // A 7x7 kernel removes transient spikes without costing much.
        let gray = imageproc::filter::gaussian_blur_f32(&to_gray(&frame), 1.4);

        let base = match baseline.take() {
            Some(base) => base,
            None => {
                baseline = Some(gray);
                continue;
            }
        };

        let mut thresh = GrayImage::new(gray.width(), gray.height());
        for ((t, &a), &b) in thresh.iter_mut().zip(gray.iter()).zip(base.iter()) {
            if a.abs_diff(b) > MOTION_DIFF_THRESHOLD {
                *t = 255;
            }
        }
        baseline = Some(base);

        let contours = imageproc::contours::find_contours::<i32>(&thresh);
        let mut total_area = 0.0;
        let mut any_large = false;
        for contour in &contours {
            if contour.border_type != imageproc::contours::BorderType::Outer {
                continue;
            }
            let area = contour_area(&contour.points);
            if area > min_area {
                any_large = true;
            }
            total_area += area;
        }

        if any_large && total_area > min_area {
            tracing::debug!(
                "motion accepted: total contour area {:.0} over threshold {:.0}",
                total_area,
                min_area
            );
            return Ok(Some(MotionEvent {
                frame,
                recent_frames: ring.into_recent(),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedCamera {
        frames: Vec<RgbImage>,
        cursor: usize,
    }

    impl FrameSource for ScriptedCamera {
        fn next_frame(&mut self) -> Option<RgbImage> {
            let frame = self.frames.get(self.cursor.min(self.frames.len() - 1)).cloned();
            self.cursor += 1;
            frame
        }
    }

    fn quiet_frame() -> RgbImage {
        RgbImage::from_pixel(400, 300, image::Rgb([80, 80, 80]))
    }

    fn ball() -> Ball {
        Ball::with_circle(Circle::new(40.0, 150.0, 15.0))
    }

    #[test]
    fn aoi_sits_in_front_of_the_ball() {
        let rect = area_of_interest(&ball().circle, 400, 300, Handedness::RightHanded);
        assert_eq!(rect.left(), 40);
        assert_eq!(rect.left() + rect.width() as i32, 190);
        assert_eq!(rect.top(), 60);
        assert_eq!(rect.top() + rect.height() as i32, 172);
    }

    #[test]
    fn aoi_mirrors_for_left_handed() {
        let rect = area_of_interest(&ball().circle, 400, 300, Handedness::LeftHanded);
        assert_eq!(rect.left() + rect.width() as i32, 40);
    }

    #[test]
    fn quiet_scene_times_out() {
        let mut camera = ScriptedCamera {
            frames: vec![quiet_frame(); 4],
            cursor: 0,
        };
        let out = wait_for_ball_movement(
            &mut camera,
            &ball(),
            Duration::from_millis(30),
            Handedness::RightHanded,
        )
        .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn moving_blob_triggers_motion() {
        let mut frames = vec![quiet_frame(); 3];
        let mut moved = quiet_frame();
        // A bright blob larger than the ball appears in the watch region.
        imageproc::drawing::draw_filled_circle_mut(&mut moved, (120, 120), 25, image::Rgb([255, 255, 255]));
        frames.push(moved);
        let mut camera = ScriptedCamera { frames, cursor: 0 };

        let out = wait_for_ball_movement(
            &mut camera,
            &ball(),
            Duration::from_secs(5),
            Handedness::RightHanded,
        )
        .unwrap();
        assert!(out.is_some(), "the blob must register as motion");
        let event = out.unwrap();
        assert!(!event.recent_frames.is_empty());
    }
}
