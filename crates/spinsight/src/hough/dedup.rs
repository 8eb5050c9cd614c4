//! Concentric-circle deduplication.

use std::collections::HashMap;

use crate::ball::Circle;

/// Remove concentric circles: among circles sharing the same integer center,
/// only the largest survives (the earliest one on a radius tie). The
/// relative order of the remaining circles is unchanged.
pub fn remove_smallest_concentric(circles: &mut Vec<Circle>) {
    let mut best_idx: HashMap<(i32, i32), usize> = HashMap::new();
    for (index, c) in circles.iter().enumerate() {
        let key = c.center_i32();
        match best_idx.get(&key) {
            Some(&prev) if circles[prev].radius.round() >= c.radius.round() => {}
            _ => {
                best_idx.insert(key, index);
            }
        }
    }

    let mut index = 0;
    circles.retain(|c| {
        let keep = best_idx.get(&c.center_i32()) == Some(&index);
        index += 1;
        keep
    });
}
