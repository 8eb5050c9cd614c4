//! Specular reflection suppression.
//!
//! Strobe lighting leaves saturated highlights on the ball; dimple content
//! under a highlight is garbage, so those regions are stamped with the
//! ignore sentinel before comparison.

use image::GrayImage;
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, dilate};

use super::project::IGNORE_VALUE;

/// Pixels at or above this value count as specular reflection.
const REFLECTION_MIN_VALUE: u8 = 245;

/// Grayscale value below which the brightest `percent` of pixels lie.
///
/// Walks the histogram from the top until the requested share of pixels is
/// accumulated. Used to characterise how pronounced the highlights are.
pub fn brightness_cutoff(image: &GrayImage, brightness_percentage: u32) -> u8 {
    let mut histogram = [0u32; 256];
    for &v in image.iter() {
        histogram[v as usize] += 1;
    }
    let total = image.len() as u64;
    let target = total * (100 - brightness_percentage.min(100)) as u64 / 100;
    let mut accum = 0u64;
    for v in (0..256).rev() {
        accum += histogram[v] as u64;
        if accum >= target {
            return v as u8;
        }
    }
    0
}

/// Stamp the sentinel into `dimples` wherever `original` carries a
/// (morphologically expanded) specular highlight.
pub fn suppress_reflections(original: &GrayImage, dimples: &mut GrayImage) {
    let cutoff = brightness_cutoff(original, 99);
    tracing::trace!("reflection suppression: 99th percentile brightness at {cutoff}");

    let (w, h) = original.dimensions();
    let mut mask = GrayImage::new(w, h);
    for (m, &v) in mask.iter_mut().zip(original.iter()) {
        if v >= REFLECTION_MIN_VALUE {
            *m = 255;
        }
    }

    // Bridge pinholes inside highlights, then grow the area so the halo
    // around a highlight is masked as well.
    let mask = close(&mask, Norm::L2, 1);
    let mask = dilate(&mask, Norm::L2, 2);

    for (d, &m) in dimples.iter_mut().zip(mask.iter()) {
        if m == 255 {
            *d = IGNORE_VALUE;
        }
    }
}
