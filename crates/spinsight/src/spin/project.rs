//! Hemisphere projection and rotated re-projection of dimple images.
//!
//! The visible half of the ball is modelled as a hemisphere: every pixel
//! inside the circle gets a depth `z = sqrt(r² − x² − y²)`. Rotating a
//! candidate spin applies X, then Y, then Z axis rotations to each surface
//! point and writes it back onto the image plane. Distinct source pixels may
//! land on the same destination; the write order is serialised per row so
//! the last-write-wins outcome is deterministic, which is acceptable at the
//! resolution of the thresholded dimple images compared afterwards.

use image::GrayImage;
use rayon::prelude::*;

use crate::ball::Circle;

/// Reserved pixel value meaning "do not compare this pixel".
///
/// The Gabor post-threshold step only produces {0, 255}, so the sentinel
/// never collides with real dimple content inside this pipeline.
pub const IGNORE_VALUE: u8 = 128;

/// Two-channel projection target: per-pixel depth and dimple value.
#[derive(Debug, Clone)]
pub struct DepthImage {
    width: u32,
    height: u32,
    pub z: Vec<i32>,
    pub value: Vec<u8>,
}

impl DepthImage {
    /// Depth 0 and the ignore sentinel everywhere.
    pub fn new(width: u32, height: u32) -> Self {
        let n = (width * height) as usize;
        Self {
            width,
            height,
            z: vec![0; n],
            value: vec![IGNORE_VALUE; n],
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32) -> usize {
        (y * self.width + x) as usize
    }
}

/// Depth of the visible hemisphere at an image position; 0 outside the ball.
#[inline]
fn hemisphere_z(circle: &Circle, x: f64, y: f64) -> f64 {
    let r = circle.radius as f64;
    let dx = x - circle.x as f64;
    let dy = y - circle.y as f64;
    if dx.abs() > r || dy.abs() > r {
        return 0.0;
    }
    let diff = r * r - dx * dx - dy * dy;
    if diff < 0.0 {
        0.0
    } else {
        diff.sqrt()
    }
}

struct RotationSetup {
    sin_x: f64,
    cos_x: f64,
    sin_y: f64,
    cos_y: f64,
    sin_z: f64,
    cos_z: f64,
    on_x: bool,
    on_y: bool,
    on_z: bool,
}

impl RotationSetup {
    fn new(rotation_degrees: [i32; 3]) -> Self {
        // The X angle is negated so that positive X spin reads as backspin
        // in the camera frame.
        let rx = -(rotation_degrees[0] as f64).to_radians();
        let ry = (rotation_degrees[1] as f64).to_radians();
        let rz = (rotation_degrees[2] as f64).to_radians();
        Self {
            sin_x: rx.sin(),
            cos_x: rx.cos(),
            sin_y: ry.sin(),
            cos_y: ry.cos(),
            sin_z: rz.sin(),
            cos_z: rz.cos(),
            on_x: rx.abs() > 0.001,
            on_y: ry.abs() > 0.001,
            on_z: rz.abs() > 0.001,
        }
    }
}

/// Project `image` onto the ball's hemisphere, rotate by
/// `rotation_degrees = (rx, ry, rz)` applied X-then-Y-then-Z, and re-project
/// to the image plane.
///
/// Destination pixels never reached by a rotated source point keep depth 0
/// and the ignore sentinel. Source pixels outside the visible hemisphere
/// carry the sentinel with them, masking whatever they land on.
pub fn project_to_rotated_hemisphere(
    image: &GrayImage,
    circle: &Circle,
    rotation_degrees: [i32; 3],
) -> DepthImage {
    let (width, height) = image.dimensions();
    let mut dest = DepthImage::new(width, height);
    let setup = RotationSetup::new(rotation_degrees);

    // Pure per-pixel phase: each row computes its writes independently.
    let row_writes: Vec<Vec<(usize, i32, u8)>> = (0..height)
        .into_par_iter()
        .map(|y| {
            let mut writes = Vec::with_capacity(width as usize);
            for x in 0..width {
                let z0 = hemisphere_z(circle, x as f64, y as f64);
                let valid = z0 > 0.0001;

                let mut px = x as f64 - circle.x as f64;
                let mut py = y as f64 - circle.y as f64;
                let mut pz = z0;

                if setup.on_x {
                    let tmp = py;
                    py = py * setup.cos_x - pz * setup.sin_x;
                    pz = tmp * setup.sin_x + pz * setup.cos_x;
                }
                if setup.on_y {
                    let tmp = px;
                    px = px * setup.cos_y + pz * setup.sin_y;
                    pz = pz * setup.cos_y - tmp * setup.sin_y;
                }
                if setup.on_z {
                    let tmp = px;
                    px = px * setup.cos_z - py * setup.sin_z;
                    py = tmp * setup.sin_z + py * setup.cos_z;
                }
                // The rotated depth itself is not kept; the landing
                // position's hemisphere depth is what gets recorded.
                let _ = pz;

                let ix = px + circle.x as f64;
                let iy = py + circle.y as f64;
                let z_landed = hemisphere_z(circle, ix, iy);
                if ix < 0.0 || iy < 0.0 || z_landed <= 0.0 {
                    continue;
                }
                let dx = (ix + 0.5) as u32;
                let dy = (iy + 0.5) as u32;
                if dx >= width || dy >= height {
                    continue;
                }
                let value = if valid {
                    image.get_pixel(x, y)[0]
                } else {
                    IGNORE_VALUE
                };
                writes.push(((dy * width + dx) as usize, z_landed as i32, value));
            }
            writes
        })
        .collect();

    // Serial application in row order keeps overwrites deterministic.
    for writes in row_writes {
        for (idx, z, value) in writes {
            dest.z[idx] = z;
            dest.value[idx] = value;
        }
    }
    dest
}

/// Flatten a projection back into a grayscale image (value channel).
pub fn unproject_to_image(depth: &DepthImage) -> GrayImage {
    let (w, h) = depth.dimensions();
    GrayImage::from_raw(w, h, depth.value.clone()).expect("value buffer matches dimensions")
}

/// Rotate a dimple image about the ball center: project, rotate, flatten.
pub fn rotate_image(image: &GrayImage, circle: &Circle, rotation_degrees: [i32; 3]) -> GrayImage {
    unproject_to_image(&project_to_rotated_hemisphere(image, circle, rotation_degrees))
}

/// Compare a target dimple image against a projected candidate.
///
/// Only pixel pairs where neither side carries the sentinel are counted.
/// Returns `(matched, examined)`.
pub fn compare_dimple_images(target: &GrayImage, candidate: &DepthImage) -> (u64, u64) {
    debug_assert_eq!(target.dimensions(), candidate.dimensions());
    let mut matched = 0u64;
    let mut examined = 0u64;
    for (t, c) in target.iter().zip(candidate.value.iter()) {
        if *t == IGNORE_VALUE || *c == IGNORE_VALUE {
            continue;
        }
        examined += 1;
        if t == c {
            matched += 1;
        }
    }
    (matched, examined)
}
