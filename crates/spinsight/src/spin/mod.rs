//! Spin estimation: recover the three-axis rotation between two views of a
//! ball in flight.
//!
//! Each ball is isolated, equalized and reduced to a binary dimple image by
//! a Gabor filter bank; specular highlights and everything outside the ball
//! are stamped with the ignore sentinel. After compensating the camera
//! perspective difference between the two views, a coarse 3-D grid of
//! rotation hypotheses is scored by pixel agreement and the winner is
//! refined in a second, fine pass.

pub mod gabor;
pub mod isolate;
pub mod project;
pub mod reflections;
pub mod search;

use image::GrayImage;

use crate::ball::{Ball, Handedness};
use crate::config::SpinConfig;

use gabor::dimple_image;
use isolate::{isolate_ball, mask_outside_ball, match_sizes};
use project::{rotate_image, IGNORE_VALUE};
use search::{best_candidate, compute_candidates, fine_space_around, RotationSearchSpace};

/// Mask factor for the final dimple images: slightly inside the ball edge so
/// rim artifacts never take part in the comparison.
const FINAL_MASK_FACTOR: f32 = 0.92;

/// Estimate ball rotation between two frames, in integer degrees.
///
/// The result is camera-frame normalised; by golf convention positive X
/// (side spin) means the surface moves right-to-left. On a failed search
/// the function warns and returns `(0, 0, 0)`.
pub fn ball_rotation(
    image1: &GrayImage,
    ball1: &Ball,
    image2: &GrayImage,
    ball2: &Ball,
    cfg: &SpinConfig,
    handedness: Handedness,
) -> [i32; 3] {
    let iso1 = isolate_ball(image1, &ball1.circle);
    let iso2 = isolate_ball(image2, &ball2.circle);
    let (iso1, iso2) = match_sizes(iso1, iso2);

    // Both balls share the binary threshold calibrated on the first one so
    // the two dimple images stay comparable.
    let d1 = dimple_image(&iso1.image, cfg, None);
    let d2 = dimple_image(&iso2.image, cfg, Some(d1.threshold));
    let mut dimples1 = d1.image;
    let mut dimples2 = d2.image;

    reflections::suppress_reflections(&iso1.image, &mut dimples1);
    reflections::suppress_reflections(&iso2.image, &mut dimples2);

    dimples1 = mask_outside_ball(&dimples1, &iso1.circle, FINAL_MASK_FACTOR, IGNORE_VALUE);
    dimples2 = mask_outside_ball(&dimples2, &iso2.circle, FINAL_MASK_FACTOR, IGNORE_VALUE);

    // Perspective de-rotation: split the angular offset between the two
    // views so both land in a common reference frame.
    let offset1 = ball1.angles_camera_ortho;
    let offset2 = ball2.angles_camera_ortho;
    let mut delta1 = [
        (offset2[0] - offset1[0]) / 2.0,
        (offset2[1] - offset1[1]) / 2.0,
    ];
    if handedness == Handedness::LeftHanded {
        delta1[1] = -delta1[1];
    }
    let delta1_int = [delta1[0].round() as i32, delta1[1].round() as i32, 0];
    dimples1 = rotate_image(&dimples1, &iso1.circle, delta1_int);
    tracing::trace!(
        "perspective de-rotation for ball 1: ({}, {}, 0)",
        delta1_int[0],
        delta1_int[1]
    );

    let mut delta2 = [
        -((offset2[0] - offset1[0]) - delta1[0]),
        -((offset2[1] - offset1[1]) - delta1[1]),
    ];
    if handedness == Handedness::LeftHanded {
        delta2[1] = -((offset1[1] - offset2[1]) - delta1[1]);
    }
    let delta2_int = [delta2[0].round() as i32, delta2[1].round() as i32, 0];
    dimples2 = rotate_image(&dimples2, &iso2.circle, delta2_int);
    tracing::trace!(
        "perspective de-rotation for ball 2: ({}, {}, 0)",
        delta2_int[0],
        delta2_int[1]
    );

    // Coarse pass.
    let coarse_space = RotationSearchSpace {
        x: cfg.coarse_x,
        y: cfg.coarse_y,
        z: cfg.coarse_z,
    };
    let mut coarse = compute_candidates(&dimples1, &iso1.circle, &coarse_space);
    let Some(best_coarse) = best_candidate(&dimples2, &mut coarse) else {
        tracing::warn!("no best coarse rotation candidate found");
        return [0, 0, 0];
    };
    if cfg.write_csv_files {
        let path = cfg.csv_output_dir.join("spin_analysis_coarse.csv");
        if let Err(e) = search::write_score_csv(&path, &coarse) {
            tracing::warn!("failed to write {}: {e}", path.display());
        }
    }
    let coarse_rotation = coarse[best_coarse].rotation;
    tracing::debug!(
        "best coarse rotation candidate: ({}, {}, {})",
        coarse_rotation[0],
        coarse_rotation[1],
        coarse_rotation[2]
    );

    // Fine pass, best effort: the coarse result stands when it fails.
    let fine_space = fine_space_around(&coarse_space, coarse_rotation);
    let mut fine = compute_candidates(&dimples1, &iso1.circle, &fine_space);
    let best = match best_candidate(&dimples2, &mut fine) {
        Some(best_fine) => {
            if cfg.write_csv_files {
                let path = cfg.csv_output_dir.join("spin_analysis_fine.csv");
                if let Err(e) = search::write_score_csv(&path, &fine) {
                    tracing::warn!("failed to write {}: {e}", path.display());
                }
            }
            fine[best_fine].rotation
        }
        None => {
            tracing::warn!("fine rotation pass failed, keeping the coarse result");
            coarse_rotation
        }
    };

    // Normalise the result into the camera frame using the perspective
    // correction actually applied to ball 1.
    let phi_x = (offset1[0] + delta1[0]).to_radians() as f64;
    let phi_y = (offset1[1] - delta1[1]).to_radians() as f64;
    let (bx, by, bz) = (best[0] as f64, best[1] as f64, best[2] as f64);

    let normalized_x = (bx * phi_y.cos() + bz * phi_y.sin()).round() as i32;
    let normalized_y = (by * phi_x.cos() - bz * phi_x.sin()).round() as i32;
    let normalized_z = (bz * phi_x.cos() * phi_y.cos()).round() as i32
        - (by * phi_x.sin()).round() as i32
        - (bx * phi_y.sin()).round() as i32;

    tracing::debug!(
        "normalized spin (x, y, z) = ({}, {}, {})",
        normalized_x,
        normalized_y,
        normalized_z
    );

    // Golf convention: positive side spin means right-to-left surface travel.
    [-normalized_x, normalized_y, normalized_z]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ball::Circle;

    #[test]
    fn identical_textured_inputs_give_zero_rotation() {
        let mut img = GrayImage::from_pixel(120, 120, image::Luma([30]));
        for y in 0..120u32 {
            for x in 0..120u32 {
                let dx = x as f32 - 60.0;
                let dy = y as f32 - 60.0;
                if dx * dx + dy * dy < 40.0 * 40.0 {
                    let v = 120.0
                        + 70.0 * ((x as f64 / 3.0).sin() * (y as f64 / 3.5).cos()) as f32;
                    img.put_pixel(x, y, image::Luma([v.clamp(0.0, 255.0) as u8]));
                }
            }
        }
        let ball = Ball::with_circle(Circle::new(60.0, 60.0, 40.0));
        let mut cfg = SpinConfig::default();
        // Tiny grid keeps the test fast.
        cfg.coarse_x = crate::config::AxisSpan::new(-6, 6, 6);
        cfg.coarse_y = crate::config::AxisSpan::new(0, 0, 1);
        cfg.coarse_z = crate::config::AxisSpan::new(-6, 6, 6);
        let out = ball_rotation(&img, &ball, &img, &ball, &cfg, Handedness::RightHanded);
        assert_eq!(out, [0, 0, 0]);
    }
}
