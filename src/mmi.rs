//! Per-frame MMI extraction: reduces the raw luma plane to one intensity
//! value per calibrated grid node.

use crate::model::{Grid, FRAME_H, FRAME_W, MMI_COUNT, PATCH_RADIUS};

/// Computes the mean intensity in the `PATCH_RADIUS`-pixel window around
/// each grid node, excluding pixels at or below `dark_value`. A window with
/// no surviving pixels yields 0.0 — this can legitimately happen for a
/// miscalibrated or occluded node.
pub fn extract_mmis(frame: &[u8], grid: &Grid, dark_value: u8) -> Vec<f64> {
    debug_assert_eq!(frame.len(), FRAME_W * FRAME_H);
    let mut values = Vec::with_capacity(MMI_COUNT);

    for node in &grid.nodes {
        let x0 = (node.x - PATCH_RADIUS).max(0);
        let x1 = (node.x + PATCH_RADIUS).min(FRAME_W as i64 - 1);
        let y0 = (node.y - PATCH_RADIUS).max(0);
        let y1 = (node.y + PATCH_RADIUS).min(FRAME_H as i64 - 1);

        let mut sum = 0u64;
        let mut count = 0u64;
        for y in y0..=y1 {
            for x in x0..=x1 {
                let pixel = frame[(y * FRAME_W as i64 + x) as usize];
                if pixel <= dark_value {
                    continue;
                }
                sum += pixel as u64;
                count += 1;
            }
        }

        values.push(if count == 0 {
            0.0
        } else {
            sum as f64 / count as f64
        });
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GridNode;

    fn flat_frame(value: u8) -> Vec<u8> {
        vec![value; FRAME_W * FRAME_H]
    }

    #[test]
    fn excludes_pixels_at_or_below_dark_value() {
        let mut frame = flat_frame(5);
        // Brighten a small patch around (100, 100).
        for y in 92..=108 {
            for x in 92..=108 {
                frame[y * FRAME_W + x] = 50;
            }
        }
        let grid = Grid {
            nodes: vec![GridNode {
                x: 100,
                y: 100,
                row: 0,
                col: 0,
            }],
        };
        let values = extract_mmis(&frame, &grid, 5);
        assert_eq!(values.len(), 1);
        assert!((values[0] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn all_pixels_at_dark_floor_yields_zero() {
        let frame = flat_frame(3);
        let grid = Grid {
            nodes: vec![GridNode {
                x: 50,
                y: 50,
                row: 0,
                col: 0,
            }],
        };
        let values = extract_mmis(&frame, &grid, 3);
        assert_eq!(values, vec![0.0]);
    }

    #[test]
    fn window_clips_to_frame_bounds_near_edges() {
        let frame = flat_frame(40);
        let grid = Grid {
            nodes: vec![GridNode {
                x: 0,
                y: 0,
                row: 0,
                col: 0,
            }],
        };
        let values = extract_mmis(&frame, &grid, 0);
        assert!((values[0] - 40.0).abs() < 1e-9);
    }
}
