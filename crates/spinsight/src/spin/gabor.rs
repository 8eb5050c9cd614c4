//! Gabor dimple extraction.
//!
//! A bank of oriented Gabor kernels responds to the quasi-periodic dimple
//! pattern on the ball surface. The per-pixel maximum over all orientations
//! is thresholded into a binary edge image; the threshold self-calibrates so
//! the white fraction of the image lands in a configured window, and the
//! calibrated value is reused for the second ball of a pair so both share
//! the same operating point.

use image::GrayImage;
use rayon::prelude::*;

use crate::config::SpinConfig;

const KERNEL_SIZE: usize = 21;
const SIGMA: f64 = 1.0;
const LAMBDA: f64 = 6.0;
const GAMMA: f64 = 0.2;
const PSI_DEGREES: f64 = 90.0;
const ORIENTATIONS: usize = 32;
const THETA_INCREMENT_DEGREES: f64 = 11.25;

/// Hard bounds for the self-calibrating binary threshold.
const THRESHOLD_MIN: f32 = 2.0;
const THRESHOLD_MAX: f32 = 30.0;

/// Result of one dimple extraction.
#[derive(Debug, Clone)]
pub struct DimpleImage {
    /// Binary image: dimple edges at 255, everything else 0.
    pub image: GrayImage,
    /// Percentage of white pixels actually achieved.
    pub white_percent: i32,
    /// The binary threshold that produced the image.
    pub threshold: f32,
}

/// One Gabor kernel with the bank's fixed support and shape parameters.
fn gabor_kernel(theta_degrees: f64) -> [f32; KERNEL_SIZE * KERNEL_SIZE] {
    let theta = theta_degrees.to_radians();
    let psi = PSI_DEGREES.to_radians();
    let half = (KERNEL_SIZE / 2) as i32;
    let (sin_t, cos_t) = theta.sin_cos();

    let mut kernel = [0.0f32; KERNEL_SIZE * KERNEL_SIZE];
    for ky in -half..=half {
        for kx in -half..=half {
            let x = kx as f64;
            let y = ky as f64;
            let xr = x * cos_t + y * sin_t;
            let yr = -x * sin_t + y * cos_t;
            let envelope = (-(xr * xr + GAMMA * GAMMA * yr * yr) / (2.0 * SIGMA * SIGMA)).exp();
            let carrier = (2.0 * std::f64::consts::PI * xr / LAMBDA + psi).cos();
            kernel[((ky + half) * KERNEL_SIZE as i32 + (kx + half)) as usize] =
                (envelope * carrier) as f32;
        }
    }
    kernel
}

/// Max response over the orientation bank, quantised to 8 bits.
fn gabor_response(image: &GrayImage) -> GrayImage {
    let (w, h) = image.dimensions();
    let src: Vec<f32> = image.iter().map(|&v| v as f32 / 255.0).collect();
    let kernels: Vec<_> = (0..ORIENTATIONS)
        .map(|i| gabor_kernel(i as f64 * THETA_INCREMENT_DEGREES))
        .collect();

    let half = (KERNEL_SIZE / 2) as i32;
    let stride = w as usize;
    let response: Vec<u8> = (0..h as i32)
        .into_par_iter()
        .flat_map_iter(|y| {
            let src = &src;
            let kernels = &kernels;
            (0..w as i32).map(move |x| {
                let mut best = 0.0f32;
                for kernel in kernels {
                    let mut acc = 0.0f32;
                    for ky in -half..=half {
                        let sy = (y + ky).clamp(0, h as i32 - 1) as usize;
                        let krow = ((ky + half) * KERNEL_SIZE as i32) as usize;
                        for kx in -half..=half {
                            let sx = (x + kx).clamp(0, w as i32 - 1) as usize;
                            acc += src[sy * stride + sx] * kernel[krow + (kx + half) as usize];
                        }
                    }
                    if acc > best {
                        best = acc;
                    }
                }
                (best * 255.0).clamp(0.0, 255.0) as u8
            })
        })
        .collect();

    GrayImage::from_raw(w, h, response).expect("response buffer matches dimensions")
}

fn threshold_binary(response: &GrayImage, binary_threshold: f32) -> (GrayImage, i32) {
    let cut = (binary_threshold * 10.0).round() as i16;
    let mut out = response.clone();
    let mut white = 0u32;
    for p in out.iter_mut() {
        if (*p as i16) > cut {
            *p = 255;
            white += 1;
        } else {
            *p = 0;
        }
    }
    let percent = ((white as f64 * 100.0) / out.len().max(1) as f64).round() as i32;
    (out, percent)
}

/// Extract the binary dimple image for one ball.
///
/// With no `prior_threshold`, the binary threshold ratchets until the white
/// fraction lands inside the configured window, stepping by 1 when more
/// than 5 points out and by 0.5 otherwise, bounded to `[2, 30]`. With a
/// prior threshold (from the first ball of the pair), that value is used
/// as-is so both dimple images share the same operating point.
pub fn dimple_image(
    image: &GrayImage,
    cfg: &SpinConfig,
    prior_threshold: Option<f32>,
) -> DimpleImage {
    let response = gabor_response(image);

    let mut threshold = prior_threshold.unwrap_or(cfg.gabor_starting_threshold);
    let (mut binary, mut white_percent) = threshold_binary(&response, threshold);
    tracing::trace!("initial gabor white percent = {white_percent}");

    if prior_threshold.is_none() {
        let ratcheting_down = white_percent < cfg.gabor_min_white_percent;
        while white_percent < cfg.gabor_min_white_percent
            || white_percent >= cfg.gabor_max_white_percent
        {
            if ratcheting_down {
                let gap = cfg.gabor_min_white_percent - white_percent;
                threshold -= if gap > 5 { 1.0 } else { 0.5 };
            } else {
                let gap = white_percent - cfg.gabor_max_white_percent;
                threshold += if gap > 5 { 1.0 } else { 0.5 };
            }
            if !(THRESHOLD_MIN..=THRESHOLD_MAX).contains(&threshold) {
                tracing::warn!("gabor binary threshold reached limit at {threshold}");
                break;
            }
            let (b, p) = threshold_binary(&response, threshold);
            binary = b;
            white_percent = p;
            tracing::trace!("refined gabor threshold {threshold} -> {white_percent}% white");
        }
    }

    DimpleImage {
        image: binary,
        white_percent,
        threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn textured_ball(size: u32) -> GrayImage {
        // A wavy texture standing in for dimples.
        let mut img = GrayImage::new(size, size);
        for (x, y, p) in img.enumerate_pixels_mut() {
            let v = 120.0
                + 60.0 * ((x as f64 / 3.5).sin() * (y as f64 / 3.5).cos())
                + 30.0 * ((x as f64 + y as f64) / 5.0).sin();
            p[0] = v.clamp(0.0, 255.0) as u8;
        }
        img
    }

    #[test]
    fn output_is_strictly_binary() {
        let img = textured_ball(64);
        let dimples = dimple_image(&img, &SpinConfig::default(), None);
        for &v in dimples.image.iter() {
            assert!(v == 0 || v == 255, "non-binary value {v}");
        }
    }

    #[test]
    fn adaptive_threshold_lands_in_window_or_at_bound() {
        let cfg = SpinConfig::default();
        let img = textured_ball(64);
        let dimples = dimple_image(&img, &cfg, None);
        let in_window = dimples.white_percent >= cfg.gabor_min_white_percent
            && dimples.white_percent < cfg.gabor_max_white_percent;
        let at_bound = !(THRESHOLD_MIN..=THRESHOLD_MAX).contains(&dimples.threshold);
        assert!(
            in_window || at_bound,
            "white={}%, threshold={}",
            dimples.white_percent,
            dimples.threshold
        );
    }

    #[test]
    fn prior_threshold_is_reused_without_ratcheting() {
        let img = textured_ball(48);
        let dimples = dimple_image(&img, &SpinConfig::default(), Some(7.5));
        assert_eq!(dimples.threshold, 7.5);
    }

    #[test]
    fn kernel_is_odd_symmetric_with_finite_energy() {
        // With a 90 degree phase the carrier is sine-like: the kernel sums
        // to ~0 but carries energy off-center.
        let k = gabor_kernel(0.0);
        let sum: f32 = k.iter().sum();
        assert!(sum.abs() < 1e-3, "kernel sum {sum}");
        let max = k.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(max > 0.1, "kernel energy too small: {max}");
    }
}
