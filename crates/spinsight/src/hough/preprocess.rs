//! Mode-specific preprocessing ahead of the circle transform.
//!
//! Strobed modes get CLAHE (when enabled) followed by blur / Canny / blur;
//! the placed mode runs blur / Canny / blur directly; putting mode swaps
//! Canny for a median blur plus an edge-drawing style detector.

use image::GrayImage;

use crate::imgutil::{force_odd, gaussian_blur_ksize, median_blur_ksize};
use crate::strategy::{ModeParams, SearchMode};

/// Contrast-limited adaptive histogram equalization.
///
/// The image is divided into `grid x grid` tiles; each tile gets a clipped,
/// renormalized equalization LUT, and pixels blend the LUTs of the four
/// surrounding tile centers bilinearly. Grid and clip values below 1 are
/// clamped to 1 and logged.
pub fn clahe(image: &GrayImage, clip_limit: i32, tiles_grid_size: i32) -> GrayImage {
    let mut grid = tiles_grid_size;
    if grid < 1 {
        tracing::warn!("clahe tiles_grid_size {} < 1, clamping to 1", grid);
        grid = 1;
    }
    let mut clip = clip_limit;
    if clip < 1 {
        tracing::warn!("clahe clip_limit {} < 1, clamping to 1", clip);
        clip = 1;
    }

    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }
    let grid = grid as u32;
    let tile_w = w.div_ceil(grid).max(1);
    let tile_h = h.div_ceil(grid).max(1);
    let tiles_x = w.div_ceil(tile_w);
    let tiles_y = h.div_ceil(tile_h);

    // Per-tile LUTs.
    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);
            let area = ((x1 - x0) * (y1 - y0)) as u32;

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[image.get_pixel(x, y)[0] as usize] += 1;
                }
            }

            // Clip and redistribute the excess uniformly.
            let limit = ((clip as u32 * area) / 256).max(1);
            let mut excess = 0u32;
            for count in hist.iter_mut() {
                if *count > limit {
                    excess += *count - limit;
                    *count = limit;
                }
            }
            let bonus = excess / 256;
            for count in hist.iter_mut() {
                *count += bonus;
            }

            let lut = &mut luts[(ty * tiles_x + tx) as usize];
            let mut cdf = 0u32;
            for v in 0..256 {
                cdf += hist[v];
                lut[v] = ((cdf as u64 * 255) / area.max(1) as u64) as u8;
            }
        }
    }

    fn lut_at(luts: &[[u8; 256]], tiles_x: u32, tiles_y: u32, tx: u32, ty: u32) -> &[u8; 256] {
        &luts[(ty.min(tiles_y - 1) * tiles_x + tx.min(tiles_x - 1)) as usize]
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let v = image.get_pixel(x, y)[0] as usize;

            // Position relative to tile centers.
            let fx = (x as f32 - tile_w as f32 * 0.5) / tile_w as f32;
            let fy = (y as f32 - tile_h as f32 * 0.5) / tile_h as f32;
            let tx0 = fx.floor().max(0.0) as u32;
            let ty0 = fy.floor().max(0.0) as u32;
            let ax = (fx - fx.floor()).clamp(0.0, 1.0);
            let ay = (fy - fy.floor()).clamp(0.0, 1.0);
            let (ax, ay) = if fx < 0.0 { (0.0, ay) } else { (ax, ay) };
            let ay = if fy < 0.0 { 0.0 } else { ay };

            let v00 = lut_at(&luts, tiles_x, tiles_y, tx0, ty0)[v] as f32;
            let v10 = lut_at(&luts, tiles_x, tiles_y, tx0 + 1, ty0)[v] as f32;
            let v01 = lut_at(&luts, tiles_x, tiles_y, tx0, ty0 + 1)[v] as f32;
            let v11 = lut_at(&luts, tiles_x, tiles_y, tx0 + 1, ty0 + 1)[v] as f32;
            let blended = v00 * (1.0 - ax) * (1.0 - ay)
                + v10 * ax * (1.0 - ay)
                + v01 * (1.0 - ax) * ay
                + v11 * ax * ay;
            out.put_pixel(x, y, image::Luma([blended.round() as u8]));
        }
    }
    out
}

/// Canny with sanitized thresholds.
///
/// Configuration may carry zero or inverted thresholds; they are clamped to
/// a usable pair and the correction is logged rather than treated as fatal.
pub fn canny_sane(image: &GrayImage, lower: f32, upper: f32) -> GrayImage {
    let (mut lo, mut hi) = (lower, upper);
    if lo <= 0.0 || hi <= lo {
        tracing::warn!("canny thresholds ({lo}, {hi}) unusable, falling back to (30, 80)");
        lo = 30.0;
        hi = 80.0;
    }
    imageproc::edges::canny(image, lo, hi)
}

/// Parameter-free edge detector in the edge-drawing family: gradient
/// magnitude with non-maximum suppression along the gradient direction and
/// an adaptive threshold derived from the image's own gradient statistics.
pub fn edge_draw(image: &GrayImage) -> GrayImage {
    let (w, h) = image.dimensions();
    let mut out = GrayImage::new(w, h);
    if w < 3 || h < 3 {
        return out;
    }

    let gx = imageproc::gradients::horizontal_scharr(image);
    let gy = imageproc::gradients::vertical_scharr(image);
    let stride = w as usize;
    let gx_raw = gx.as_raw();
    let gy_raw = gy.as_raw();

    let mut mag = vec![0.0f32; stride * h as usize];
    let mut sum = 0.0f64;
    for (i, m) in mag.iter_mut().enumerate() {
        let x = gx_raw[i] as f32;
        let y = gy_raw[i] as f32;
        *m = (x * x + y * y).sqrt();
        sum += *m as f64;
    }
    let threshold = (sum / mag.len() as f64) as f32 * 2.0;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let idx = y as usize * stride + x as usize;
            let m = mag[idx];
            if m < threshold {
                continue;
            }
            let gxv = gx_raw[idx] as f32;
            let gyv = gy_raw[idx] as f32;

            // Quantize the gradient direction to one of four neighbours.
            let (n1, n2) = if gxv.abs() > 2.414 * gyv.abs() {
                (idx - 1, idx + 1)
            } else if gyv.abs() > 2.414 * gxv.abs() {
                (idx - stride, idx + stride)
            } else if gxv * gyv > 0.0 {
                (idx - stride - 1, idx + stride + 1)
            } else {
                (idx - stride + 1, idx + stride - 1)
            };

            if m >= mag[n1] && m >= mag[n2] {
                out.put_pixel(x, y, image::Luma([255]));
            }
        }
    }
    out
}

fn invert(image: &GrayImage) -> GrayImage {
    let mut out = image.clone();
    for p in out.iter_mut() {
        *p = 255 - *p;
    }
    out
}

/// Run the preprocessing chain for `mode` over a grayscale search image.
pub fn preprocess_for_mode(image: &GrayImage, mode: SearchMode, params: &ModeParams) -> GrayImage {
    match mode {
        SearchMode::Strobed | SearchMode::ExternallyStrobed => {
            let mut working = if params.use_clahe {
                clahe(image, params.clahe_clip_limit, params.clahe_tiles_grid_size)
            } else {
                image.clone()
            };

            let pre_canny = force_odd(params.pre_canny_blur_size);
            if pre_canny > 0 {
                working = gaussian_blur_ksize(&working, pre_canny);
            } else {
                tracing::trace!("skipping pre-Canny blur");
            }

            // Externally strobed frames may arrive already edge-filtered;
            // a zero pre-Canny blur bypasses Canny entirely for them.
            let edges = if mode == SearchMode::ExternallyStrobed && params.pre_canny_blur_size == 0
            {
                working
            } else {
                canny_sane(&working, params.canny_lower, params.canny_upper)
            };
            gaussian_blur_ksize(&edges, force_odd(params.pre_hough_blur_size))
        }
        SearchMode::Putting => {
            let blurred = median_blur_ksize(image, params.pre_hough_blur_size);
            let edges = invert(&edge_draw(&blurred));
            gaussian_blur_ksize(&edges, 5)
        }
        _ => {
            let blurred = gaussian_blur_ksize(image, force_odd(params.pre_canny_blur_size));
            let edges = canny_sane(&blurred, params.canny_lower, params.canny_upper);
            gaussian_blur_ksize(&edges, force_odd(params.pre_hough_blur_size))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clahe_improves_contrast_of_flat_region() {
        // A low-contrast gradient strip.
        let mut img = GrayImage::new(64, 64);
        for (x, _, p) in img.enumerate_pixels_mut() {
            p[0] = 100 + (x / 8) as u8;
        }
        let eq = clahe(&img, 4, 4);
        let (min, max) = eq.iter().fold((255u8, 0u8), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
        let (omin, omax) = img.iter().fold((255u8, 0u8), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
        assert!(
            max - min > omax - omin,
            "clahe must widen the value range ({min}..{max} vs {omin}..{omax})"
        );
    }

    #[test]
    fn clahe_clamps_bad_grid() {
        let img = GrayImage::from_pixel(16, 16, image::Luma([90]));
        // Must not panic with nonsensical settings.
        let _ = clahe(&img, 0, -3);
    }

    #[test]
    fn edge_draw_marks_a_step_edge() {
        let mut img = GrayImage::from_pixel(32, 32, image::Luma([20]));
        for y in 0..32 {
            for x in 16..32 {
                img.put_pixel(x, y, image::Luma([220]));
            }
        }
        let edges = edge_draw(&img);
        let on_edge = (1..31).filter(|&y| edges.get_pixel(16, y)[0] == 255 || edges.get_pixel(15, y)[0] == 255).count();
        assert!(on_edge > 20, "step edge should be traced, got {on_edge}");
    }

    #[test]
    fn canny_sane_survives_zero_thresholds() {
        let img = GrayImage::from_pixel(16, 16, image::Luma([128]));
        let _ = canny_sane(&img, 0.0, 0.0);
    }
}
