//! Sliced-inference tiling.
//!
//! Large frames are cut into overlapping tiles so small balls keep enough
//! pixels after the letterbox resize; detections are translated back by the
//! tile origin and merged, with one global NMS pass at the end.

/// One tile of the slicing grid, in source-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Build the tile grid: stride is `tile - tile * overlap_ratio`, and border
/// tiles are clamped to the image.
pub fn tile_grid(
    width: u32,
    height: u32,
    tile_w: u32,
    tile_h: u32,
    overlap_ratio: f32,
) -> Vec<Tile> {
    let tile_w = tile_w.max(1).min(width.max(1));
    let tile_h = tile_h.max(1).min(height.max(1));
    let overlap = overlap_ratio.clamp(0.0, 0.9);
    let stride_x = ((tile_w as f32 * (1.0 - overlap)) as u32).max(1);
    let stride_y = ((tile_h as f32 * (1.0 - overlap)) as u32).max(1);

    let mut tiles = Vec::new();
    let mut y = 0;
    while y < height {
        let mut x = 0;
        while x < width {
            tiles.push(Tile {
                x,
                y,
                w: tile_w.min(width - x),
                h: tile_h.min(height - y),
            });
            x += stride_x;
        }
        y += stride_y;
    }
    tiles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_covers_the_whole_image() {
        let tiles = tile_grid(1920, 1088, 320, 320, 0.2);
        assert!(!tiles.is_empty());
        let mut covered = vec![false; (1920 / 16) * (1088 / 16)];
        for t in &tiles {
            for cy in (t.y / 16)..((t.y + t.h) / 16) {
                for cx in (t.x / 16)..((t.x + t.w) / 16) {
                    covered[(cy * (1920 / 16) + cx) as usize] = true;
                }
            }
        }
        assert!(covered.iter().all(|&c| c), "every cell must be covered");
    }

    #[test]
    fn stride_reflects_overlap() {
        let tiles = tile_grid(1000, 320, 320, 320, 0.2);
        let xs: Vec<u32> = tiles.iter().filter(|t| t.y == 0).map(|t| t.x).collect();
        assert_eq!(xs[1] - xs[0], 256);
    }

    #[test]
    fn small_image_gets_one_tile() {
        let tiles = tile_grid(200, 150, 320, 320, 0.2);
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0], Tile { x: 0, y: 0, w: 200, h: 150 });
    }
}
