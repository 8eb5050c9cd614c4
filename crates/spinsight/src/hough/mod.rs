//! Gradient-voting Hough circle transform.
//!
//! Every pixel with a strong gradient casts votes along its gradient
//! direction (both ways) at distances in `[min_radius, max_radius]`. Circle
//! centers produce accumulator peaks because edge gradients converge
//! radially. Radius is then estimated per peak from the radially-aligned
//! edge pixels around it.
//!
//! `param2` carries two semantics. The standard algorithm reads it as an
//! absolute accumulator vote threshold. The alternative algorithm reads
//! values in (0, 1] as a circle "perfectness" threshold, the fraction of
//! the circumference that must be covered by aligned edge pixels; values
//! above 1 keep the vote semantics so narrowing passes can share bundles.

pub mod dedup;
pub mod preprocess;
pub mod refine;

use image::GrayImage;

use crate::ball::Circle;

/// Which accumulator variant runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HoughAlgorithm {
    /// Vote-threshold ranking.
    Gradient,
    /// Perfectness-gated variant for overlapping, partially occluded circles.
    #[default]
    GradientAlt,
}

/// One invocation's parameters; the adaptive loop owns `param2` evolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoughParams {
    pub algorithm: HoughAlgorithm,
    /// Accumulator resolution divisor (>= 1).
    pub dp: f32,
    /// Minimum distance between returned circle centers.
    pub min_dist: f32,
    /// Edge-strength threshold on the (Sobel-scaled) gradient magnitude.
    pub param1: f32,
    /// Accumulator threshold, see module docs for the dual semantics.
    pub param2: f32,
    pub min_radius: i32,
    pub max_radius: i32,
}

/// Minimum radial alignment (|cos|) between a pixel's gradient and the ray
/// to a candidate center for the pixel to count as circle support.
const RADIAL_ALIGNMENT_MIN: f32 = 0.85;

/// Half-width of the radius window used for support counting, wide enough to
/// span both gradient slopes of a blurred edge ring.
const RADIUS_WINDOW: f32 = 6.0;

const ANGULAR_BINS: usize = 64;

/// The alternative algorithm reads `param2` values in (0, 1] as a
/// circumference-coverage ("perfectness") threshold; larger values and the
/// standard algorithm use the absolute accumulator-vote semantics.
fn perfectness_mode(params: &HoughParams) -> bool {
    params.algorithm == HoughAlgorithm::GradientAlt && params.param2 <= 1.0
}

struct EdgePixel {
    x: f32,
    y: f32,
    /// Unit gradient direction.
    dx: f32,
    dy: f32,
}

#[inline]
fn bilinear_add(accum: &mut [f32], stride: usize, rows: usize, x: f32, y: f32, weight: f32) {
    if x < 0.0 || y < 0.0 {
        return;
    }
    let x0 = x as usize;
    let y0 = y as usize;
    if x0 + 1 >= stride || y0 + 1 >= rows {
        return;
    }
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let base = y0 * stride + x0;
    accum[base] += weight * (1.0 - fx) * (1.0 - fy);
    accum[base + 1] += weight * fx * (1.0 - fy);
    accum[base + stride] += weight * (1.0 - fx) * fy;
    accum[base + stride + 1] += weight * fx * fy;
}

fn collect_edge_pixels(image: &GrayImage, param1: f32) -> Vec<EdgePixel> {
    let gx = imageproc::gradients::horizontal_scharr(image);
    let gy = imageproc::gradients::vertical_scharr(image);
    let (w, _) = image.dimensions();
    let stride = w as usize;

    // Scharr responses run ~8x a unit intensity slope; the search images
    // arrive edge-filtered, so ridge slopes are shallower than raw edges.
    // A 2x factor keeps `param1` in the familiar Canny-threshold range.
    let threshold_sq = (param1 * 2.0) * (param1 * 2.0);

    let gx_raw = gx.as_raw();
    let gy_raw = gy.as_raw();
    let mut edges = Vec::new();
    for (idx, (&gxv, &gyv)) in gx_raw.iter().zip(gy_raw.iter()).enumerate() {
        let gxv = gxv as f32;
        let gyv = gyv as f32;
        let mag_sq = gxv * gxv + gyv * gyv;
        if mag_sq < threshold_sq || mag_sq <= 0.0 {
            continue;
        }
        let inv = mag_sq.sqrt().recip();
        edges.push(EdgePixel {
            x: (idx % stride) as f32,
            y: (idx / stride) as f32,
            dx: gxv * inv,
            dy: gyv * inv,
        });
    }
    edges
}

struct Peak {
    x: f32,
    y: f32,
    votes: f32,
}

fn accumulate_and_find_peaks(
    edges: &[EdgePixel],
    width: u32,
    height: u32,
    params: &HoughParams,
    min_r: i32,
    max_r: i32,
) -> Vec<Peak> {
    let dp = params.dp.max(1.0);
    let aw = (width as f32 / dp).ceil() as usize + 2;
    let ah = (height as f32 / dp).ceil() as usize + 2;
    let mut accum = vec![0.0f32; aw * ah];

    let inv_dp = 1.0 / dp;
    for e in edges {
        let mut r = min_r as f32;
        while r <= max_r as f32 {
            bilinear_add(
                &mut accum,
                aw,
                ah,
                (e.x + e.dx * r) * inv_dp,
                (e.y + e.dy * r) * inv_dp,
                1.0,
            );
            bilinear_add(
                &mut accum,
                aw,
                ah,
                (e.x - e.dx * r) * inv_dp,
                (e.y - e.dy * r) * inv_dp,
                1.0,
            );
            r += 1.0;
        }
    }

    let vote_floor = if perfectness_mode(params) {
        // Perfectness mode: a full circle deposits roughly one vote per
        // circumference pixel at its center, so gate on a fraction of the
        // smallest plausible circumference.
        (params.param2 * std::f32::consts::PI * min_r as f32).max(6.0)
    } else {
        params.param2
    };

    let mut peaks = Vec::new();
    for cy in 1..ah - 1 {
        for cx in 1..aw - 1 {
            let idx = cy * aw + cx;
            let v = accum[idx];
            if v < vote_floor {
                continue;
            }
            let mut is_max = true;
            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nidx = (cy as i32 + dy) as usize * aw + (cx as i32 + dx) as usize;
                    if accum[nidx] > v || (accum[nidx] == v && nidx < idx) {
                        is_max = false;
                        break;
                    }
                }
                if !is_max {
                    break;
                }
            }
            if !is_max {
                continue;
            }

            // Sub-cell refinement: weighted centroid over the 3x3 window.
            let mut sum = 0.0f32;
            let mut sx = 0.0f32;
            let mut sy = 0.0f32;
            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    let nv = accum[(cy as i32 + dy) as usize * aw + (cx as i32 + dx) as usize];
                    sum += nv;
                    sx += nv * (cx as i32 + dx) as f32;
                    sy += nv * (cy as i32 + dy) as f32;
                }
            }
            if sum <= 0.0 {
                continue;
            }
            peaks.push(Peak {
                x: sx / sum * dp,
                y: sy / sum * dp,
                votes: v,
            });
        }
    }

    peaks.sort_by(|a, b| b.votes.partial_cmp(&a.votes).unwrap());
    peaks
}

/// Greedy center suppression: walk peaks in vote order and drop any peak
/// within `min_dist` of an already accepted one.
fn suppress_close_peaks(peaks: Vec<Peak>, min_dist: f32) -> Vec<Peak> {
    let d2 = min_dist * min_dist;
    let mut kept: Vec<Peak> = Vec::new();
    for p in peaks {
        if kept
            .iter()
            .all(|k| (k.x - p.x).powi(2) + (k.y - p.y).powi(2) >= d2)
        {
            kept.push(p);
        }
    }
    kept
}

struct RadiusEstimate {
    radius: f32,
    support: usize,
    coverage: f32,
}

/// Estimate a circle radius around a center from radially-aligned edges.
///
/// A blurred edge ring produces two gradient slopes, one on each side of the
/// true edge, with opposite radial orientation. When both populations are
/// present the radius is their midpoint, which lands on the ridge line.
fn estimate_radius(
    edges: &[EdgePixel],
    cx: f32,
    cy: f32,
    min_r: i32,
    max_r: i32,
) -> Option<RadiusEstimate> {
    let lo = min_r as f32 - 2.0;
    let hi = max_r as f32 + 2.0;

    // (distance, outward?, angle) for aligned pixels.
    let mut aligned: Vec<(f32, bool, f32)> = Vec::new();
    let mut histogram = vec![0u32; (hi as usize) + 3];
    for e in edges {
        let rx = e.x - cx;
        let ry = e.y - cy;
        let d = (rx * rx + ry * ry).sqrt();
        if d < lo || d > hi || d <= 0.0 {
            continue;
        }
        let align = (e.dx * rx + e.dy * ry) / d;
        if align.abs() < RADIAL_ALIGNMENT_MIN {
            continue;
        }
        aligned.push((d, align > 0.0, ry.atan2(rx)));
        histogram[d.round() as usize] += 1;
    }
    if aligned.is_empty() {
        return None;
    }

    // Modal bin with +-1 smoothing.
    let mut best_bin = 0usize;
    let mut best_mass = 0u32;
    for b in 1..histogram.len() - 1 {
        let mass = histogram[b - 1] + histogram[b] + histogram[b + 1];
        if mass > best_mass {
            best_mass = mass;
            best_bin = b;
        }
    }
    if best_mass == 0 {
        return None;
    }

    let win_lo = best_bin as f32 - RADIUS_WINDOW;
    let win_hi = best_bin as f32 + RADIUS_WINDOW;
    let mut out_sum = 0.0f32;
    let mut out_n = 0usize;
    let mut in_sum = 0.0f32;
    let mut in_n = 0usize;
    let mut bins = [false; ANGULAR_BINS];
    for &(d, outward, theta) in &aligned {
        if d < win_lo || d > win_hi {
            continue;
        }
        if outward {
            out_sum += d;
            out_n += 1;
        } else {
            in_sum += d;
            in_n += 1;
        }
        let turn = (theta + std::f32::consts::PI) / (2.0 * std::f32::consts::PI);
        let bin = (turn * ANGULAR_BINS as f32) as usize;
        bins[bin.min(ANGULAR_BINS - 1)] = true;
    }
    let support = out_n + in_n;
    if support == 0 {
        return None;
    }

    let minority = out_n.min(in_n) as f32 / support as f32;
    let radius = if minority >= 0.25 {
        0.5 * (out_sum / out_n as f32 + in_sum / in_n as f32)
    } else {
        (out_sum + in_sum) / support as f32
    };
    let radius = radius.clamp(min_r as f32, max_r as f32);
    let coverage = bins.iter().filter(|&&b| b).count() as f32 / ANGULAR_BINS as f32;

    Some(RadiusEstimate {
        radius,
        support,
        coverage,
    })
}

/// Detect circles. Returned circles are ordered by detection quality
/// (descending accumulator votes); the order is stable for equal votes.
pub fn hough_circles(image: &GrayImage, params: &HoughParams) -> Vec<Circle> {
    let (w, h) = image.dimensions();
    if w < 8 || h < 8 {
        return Vec::new();
    }
    let min_r = params.min_radius.max(1);
    let max_r = params.max_radius.max(min_r + 1);

    let edges = collect_edge_pixels(image, params.param1);
    if edges.is_empty() {
        return Vec::new();
    }

    let peaks = accumulate_and_find_peaks(&edges, w, h, params, min_r, max_r);
    let peaks = suppress_close_peaks(peaks, params.min_dist.max(1.0));

    let mut circles = Vec::new();
    for p in peaks {
        let Some(est) = estimate_radius(&edges, p.x, p.y, min_r, max_r) else {
            continue;
        };
        if est.support < 8 {
            continue;
        }
        if perfectness_mode(params) && est.coverage < params.param2 {
            continue;
        }
        circles.push(Circle::new(p.x, p.y, est.radius));
    }
    circles
}

/// Round circle data to whole pixels, in place.
pub fn round_circles(circles: &mut [Circle]) {
    for c in circles.iter_mut() {
        *c = c.rounded();
    }
}
