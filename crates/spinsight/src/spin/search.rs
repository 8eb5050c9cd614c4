//! Brute-force rotation search over a 3-D angle grid.

use std::io::Write;
use std::path::Path;

use image::GrayImage;

use super::project::{compare_dimple_images, project_to_rotated_hemisphere, DepthImage};
use crate::ball::Circle;
use crate::config::AxisSpan;

/// One rotation hypothesis with its projected image and comparison scores.
pub struct RotationCandidate {
    pub index: usize,
    pub rotation: [i32; 3],
    pub image: DepthImage,
    pub pixels_matching: u64,
    pub pixels_examined: u64,
    /// Raw score: matched / examined.
    pub score: f64,
}

/// The searched angle grid, per axis.
#[derive(Debug, Clone, Copy)]
pub struct RotationSearchSpace {
    pub x: AxisSpan,
    pub y: AxisSpan,
    pub z: AxisSpan,
}

impl RotationSearchSpace {
    pub fn candidate_count(&self) -> usize {
        self.x.count() * self.y.count() * self.z.count()
    }
}

/// Low-count penalty shape: candidates whose comparison examined far fewer
/// pixels than the best candidate's count are discounted.
const LOW_COUNT_WEIGHT: f64 = 500.0;
const LOW_COUNT_POWER: i32 = 2;
const LOW_COUNT_SCALE: f64 = 1000.0;

/// Project the base dimple image under every rotation in the search space.
pub fn compute_candidates(
    base_dimples: &GrayImage,
    ball: &Circle,
    space: &RotationSearchSpace,
) -> Vec<RotationCandidate> {
    let mut candidates = Vec::with_capacity(space.candidate_count());
    tracing::trace!("computing {} candidate rotations", space.candidate_count());

    let mut index = 0usize;
    for rx in space.x.values() {
        for ry in space.y.values() {
            for rz in space.z.values() {
                let image = project_to_rotated_hemisphere(base_dimples, ball, [rx, ry, rz]);
                candidates.push(RotationCandidate {
                    index,
                    rotation: [rx, ry, rz],
                    image,
                    pixels_matching: 0,
                    pixels_examined: 0,
                    score: 0.0,
                });
                index += 1;
            }
        }
    }
    candidates
}

/// Compare every candidate against the target dimple image, apply the
/// low-count penalty and return the winning candidate's index into the
/// slice. `None` when there are no candidates or nothing was comparable.
pub fn best_candidate(
    target: &GrayImage,
    candidates: &mut [RotationCandidate],
) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }
    for c in candidates.iter_mut() {
        let (matched, examined) = compare_dimple_images(target, &c.image);
        c.pixels_matching = matched;
        c.pixels_examined = examined;
        c.score = if examined > 0 {
            matched as f64 / examined as f64
        } else {
            0.0
        };
    }

    let max_examined = candidates
        .iter()
        .map(|c| c.pixels_examined)
        .max()
        .unwrap_or(0);
    if max_examined == 0 {
        tracing::warn!("no comparable pixels in any rotation candidate");
        return None;
    }

    let mut best_index = 0usize;
    let mut best_final = f64::NEG_INFINITY;
    for (i, c) in candidates.iter().enumerate() {
        let deficit = (max_examined - c.pixels_examined) as f64 / LOW_COUNT_WEIGHT;
        let penalty = deficit.powi(LOW_COUNT_POWER) / LOW_COUNT_SCALE;
        let final_score = c.score * 10.0 - penalty;
        if final_score > best_final {
            best_final = final_score;
            best_index = i;
        }
    }

    let best = &candidates[best_index];
    tracing::debug!(
        "best rotation candidate #{} rot=({}, {}, {}) score {:.4} ({} / {} pixels)",
        best.index,
        best.rotation[0],
        best.rotation[1],
        best.rotation[2],
        best_final,
        best.pixels_matching,
        best.pixels_examined
    );
    Some(best_index)
}

/// Fine search space around a coarse winner: +-ceil(inc/2) per axis, step 1
/// on X and Z, half the coarse step on Y.
pub fn fine_space_around(coarse: &RotationSearchSpace, best: [i32; 3]) -> RotationSearchSpace {
    let half_x = (coarse.x.increment as f64 / 2.0).ceil() as i32;
    let half_y = (coarse.y.increment as f64 / 2.0).ceil() as i32;
    let half_z = (coarse.z.increment as f64 / 2.0).ceil() as i32;
    RotationSearchSpace {
        x: AxisSpan::new(best[0] - half_x, best[0] + half_x, 1),
        y: AxisSpan::new(
            best[1] - half_y,
            best[1] + half_y,
            ((coarse.y.increment as f64 / 2.0).round() as i32).max(1),
        ),
        z: AxisSpan::new(best[2] - half_z, best[2] + half_z, 1),
    }
}

/// Dump a per-candidate score table, one row per rotation hypothesis.
pub fn write_score_csv(path: &Path, candidates: &[RotationCandidate]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "index,rot_x,rot_y,rot_z,matched,examined,score")?;
    for c in candidates {
        writeln!(
            file,
            "{},{},{},{},{},{},{:.6}",
            c.index,
            c.rotation[0],
            c.rotation[1],
            c.rotation[2],
            c.pixels_matching,
            c.pixels_examined,
            c.score
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spin::project::{rotate_image, IGNORE_VALUE};

    fn dimple_pattern(size: u32, circle: &Circle) -> GrayImage {
        let mut img = GrayImage::from_pixel(size, size, image::Luma([IGNORE_VALUE]));
        for y in 0..size {
            for x in 0..size {
                let dx = x as f32 - circle.x;
                let dy = y as f32 - circle.y;
                if dx * dx + dy * dy < circle.radius * circle.radius {
                    let v = ((x / 3).wrapping_mul(11) ^ (y / 3).wrapping_mul(5)) % 4;
                    img.put_pixel(x, y, image::Luma([if v < 2 { 255 } else { 0 }]));
                }
            }
        }
        img
    }

    #[test]
    fn identity_wins_when_target_is_unrotated() {
        let circle = Circle::new(40.0, 40.0, 32.0);
        let base = dimple_pattern(80, &circle);
        let space = RotationSearchSpace {
            x: AxisSpan::new(-12, 12, 6),
            y: AxisSpan::new(-10, 10, 5),
            z: AxisSpan::new(-12, 12, 6),
        };
        let mut candidates = compute_candidates(&base, &circle, &space);
        let best = best_candidate(&base, &mut candidates).expect("must find a winner");
        assert_eq!(candidates[best].rotation, [0, 0, 0]);
    }

    #[test]
    fn recovers_a_known_rotation() {
        let circle = Circle::new(40.0, 40.0, 32.0);
        let base = dimple_pattern(80, &circle);
        let target = rotate_image(&base, &circle, [6, -5, 12]);

        let space = RotationSearchSpace {
            x: AxisSpan::new(-12, 12, 6),
            y: AxisSpan::new(-10, 10, 5),
            z: AxisSpan::new(-18, 18, 6),
        };
        let mut candidates = compute_candidates(&base, &circle, &space);
        let best = best_candidate(&target, &mut candidates).expect("must find a winner");
        assert_eq!(candidates[best].rotation, [6, -5, 12]);
    }

    #[test]
    fn fine_space_brackets_the_winner() {
        let coarse = RotationSearchSpace {
            x: AxisSpan::new(-42, 42, 6),
            y: AxisSpan::new(-30, 30, 5),
            z: AxisSpan::new(-50, 60, 6),
        };
        let fine = fine_space_around(&coarse, [12, -5, 30]);
        assert_eq!((fine.x.start, fine.x.end, fine.x.increment), (9, 15, 1));
        assert_eq!((fine.y.start, fine.y.end, fine.y.increment), (-8, -2, 3));
        assert_eq!((fine.z.start, fine.z.end, fine.z.increment), (27, 33, 1));
    }

    #[test]
    fn csv_dump_has_one_row_per_candidate() {
        let circle = Circle::new(20.0, 20.0, 16.0);
        let base = dimple_pattern(40, &circle);
        let space = RotationSearchSpace {
            x: AxisSpan::new(0, 6, 6),
            y: AxisSpan::new(0, 0, 1),
            z: AxisSpan::new(0, 6, 6),
        };
        let mut candidates = compute_candidates(&base, &circle, &space);
        let _ = best_candidate(&base, &mut candidates);

        let dir = std::env::temp_dir().join("spinsight_csv_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("scores.csv");
        write_score_csv(&path, &candidates).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1 + candidates.len());
        std::fs::remove_dir_all(&dir).ok();
    }
}
