//! Spot-grid geometric calibration: recovers the 192 MMI node locations
//! (pixel coordinates plus logical row/column) from a single averaged frame.
//!
//! Pipeline: local-maxima peak detection -> contour extraction -> blob
//! centroids -> common-axis-angle search -> pivot-normalize -> per-axis
//! border clustering -> interlaced grid expansion.

use imageproc::contours::{find_contours, Contour};
use imageproc::point::Point;

use crate::error::{DriverError, DriverResult};
use crate::layout::MZI_MMI_MAP;
use crate::model::{Grid, GridNode, FRAME_H, FRAME_W};

const MIN_CONTOUR_AREA: f64 = 5.0;
const MAX_CONTOUR_AREA: f64 = 200.0;
const DILATION_KERNEL: i64 = 3;
const NODE_INTERLACE_GAP: f64 = 10.0;
const MIN_PRIMARY_CONTOURS: usize = 100;
const ANGLE_SEARCH_ARC_DEG: f64 = 5.0;
const ANGLE_SEARCH_STEP_DEG: f64 = 0.1;
/// Expected number of X-axis (column) borders: 32 columns of interlaced
/// positions, per SPEC_FULL.md section 4.4.
const EXPECTED_X_BORDERS: usize = 32;
/// Expected number of Y-axis (row) borders: 12 rows of interlaced positions.
const EXPECTED_Y_BORDERS: usize = 12;

#[derive(Clone, Copy, Debug)]
struct Blob {
    x: f64,
    y: f64,
}

/// Runs the full spot-grid calibration over a single averaged luma frame.
pub fn calibrate_grid(frame: &[u8]) -> DriverResult<Grid> {
    debug_assert_eq!(frame.len(), FRAME_W * FRAME_H);
    let blobs = detect_primary_blobs(frame)?;
    compute_full_grid(&blobs)
}

/// 3x3 local-maximum detection: a pixel is a peak candidate if no neighbor
/// in its 3x3 neighborhood exceeds it. Mirrors `gocv.Dilate` (box dilation)
/// followed by `Compare(mat, dilated, CompareGE)` and a bitwise-not.
fn local_max_mask(frame: &[u8]) -> Vec<u8> {
    let w = FRAME_W as i64;
    let h = FRAME_H as i64;
    let half = DILATION_KERNEL / 2;
    let mut mask = vec![0u8; frame.len()];

    for y in 0..h {
        for x in 0..w {
            let value = frame[(y * w + x) as usize];
            let mut dilated = 0u8;
            for dy in -half..=half {
                for dx in -half..=half {
                    let ny = y + dy;
                    let nx = x + dx;
                    if ny >= 0 && ny < h && nx >= 0 && nx < w {
                        dilated = dilated.max(frame[(ny * w + nx) as usize]);
                    }
                }
            }
            // original >= dilated, then inverted (bitwise-not) -> peaks are 0 in compareMat,
            // so the *inverted* mask marks peaks as the foreground (255).
            mask[(y * w + x) as usize] = if value >= dilated { 0 } else { 255 };
        }
    }
    mask
}

fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..points.len() {
        let p0 = points[i];
        let p1 = points[(i + 1) % points.len()];
        sum += (p0.x as f64) * (p1.y as f64) - (p1.x as f64) * (p0.y as f64);
    }
    (sum / 2.0).abs()
}

fn centroid(points: &[Point<i32>]) -> Option<Blob> {
    if points.is_empty() {
        return None;
    }
    let (sx, sy) = points
        .iter()
        .fold((0i64, 0i64), |(sx, sy), p| (sx + p.x as i64, sy + p.y as i64));
    let n = points.len() as f64;
    Some(Blob {
        x: sx as f64 / n,
        y: sy as f64 / n,
    })
}

fn detect_primary_blobs(frame: &[u8]) -> DriverResult<Vec<Blob>> {
    let mask = local_max_mask(frame);
    let image = image::GrayImage::from_raw(FRAME_W as u32, FRAME_H as u32, mask)
        .expect("mask buffer matches fixed camera geometry");

    let contours: Vec<Contour<i32>> = find_contours(&image);
    log::debug!("found {} contours", contours.len());
    if contours.len() < MIN_PRIMARY_CONTOURS {
        return Err(DriverError::CalibrationInsufficientData {
            found: contours.len(),
            required: MIN_PRIMARY_CONTOURS,
        });
    }

    let mut blobs: Vec<Blob> = contours
        .iter()
        .filter_map(|c| {
            let area = polygon_area(&c.points);
            if !(MIN_CONTOUR_AREA..=MAX_CONTOUR_AREA).contains(&area) {
                return None;
            }
            centroid(&c.points)
        })
        .collect();

    if blobs.len() < MIN_PRIMARY_CONTOURS {
        return Err(DriverError::CalibrationInsufficientData {
            found: blobs.len(),
            required: MIN_PRIMARY_CONTOURS,
        });
    }

    // Row-major, left-to-right ordering, tolerant of the grid's interlacing:
    // two blobs within NODE_INTERLACE_GAP in x are considered the same
    // column band and ordered by y instead.
    blobs.sort_by(|a, b| {
        if b.x < a.x - NODE_INTERLACE_GAP || b.x > a.x + NODE_INTERLACE_GAP {
            a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal)
        } else {
            a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal)
        }
    });

    Ok(blobs)
}

fn deg2rad(deg: f64) -> f64 {
    deg * std::f64::consts::PI / 180.0
}

fn rad2deg(rad: f64) -> f64 {
    rad * 180.0 / std::f64::consts::PI
}

/// Linear sweep for the axis angle that maximizes a concentration score over
/// overlapping projection bins. `around` is the nominal axis angle (0 for
/// horizontal, pi/2 for vertical); the true axis is within `arc` of it.
fn find_common_angle_rad(around: f64, arc: f64, step: f64, blobs: &[Blob]) -> f64 {
    let steps = (arc / step).round() as i64;
    let mut common_angle = around;
    let mut best_energy = 0.0f64;

    for angle_idx in -steps..steps {
        let theta = around + angle_idx as f64 * step;
        let rs: Vec<f64> = blobs
            .iter()
            .map(|b| b.x * theta.cos() + b.y * theta.sin())
            .collect();
        let min = rs.iter().cloned().fold(f64::MAX, f64::min);
        let max = rs.iter().cloned().fold(f64::MIN, f64::max);
        if max <= min {
            continue;
        }
        let bin_step = (max - min) / 90.0;
        let bin_width = bin_step / 3.0;

        let mut energy = 0.0f64;
        let mut bin = min;
        while bin < max {
            let population = rs.iter().filter(|&&r| bin <= r && r < bin + bin_step).count() as f64;
            energy += population.powi(4);
            bin += bin_width;
        }

        if energy > best_energy {
            best_energy = energy;
            common_angle = theta;
        }
    }

    common_angle
}

/// Rotates `(x, y)` by `angle` about `(pivot_x, pivot_y)`.
fn pivot(x: f64, y: f64, pivot_x: f64, pivot_y: f64, angle: f64) -> (f64, f64) {
    let centered_x = pivot_x - x;
    let centered_y = pivot_y - y;

    let rotated_x = centered_x * angle.cos() - centered_y * angle.sin();
    let rotated_y = centered_x * angle.sin() + centered_y * angle.cos();

    (pivot_x - rotated_x, pivot_y - rotated_y)
}

/// Sorts, clusters adjacent coordinates closer than half the largest gap,
/// and returns one representative (the cluster mean) per border.
fn compute_borders(mut values: Vec<f64>) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let max_diff = values
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(0.0f64, f64::max);
    let threshold = max_diff / 2.0;

    let mut borders = Vec::new();
    let mut cluster_sum = values[0];
    let mut cluster_count = 1usize;

    for pair in values.windows(2) {
        let diff = (pair[1] - pair[0]).abs();
        if diff > threshold {
            borders.push(cluster_sum / cluster_count as f64);
            cluster_sum = pair[1];
            cluster_count = 1;
        } else {
            cluster_sum += pair[1];
            cluster_count += 1;
        }
    }
    borders.push(cluster_sum / cluster_count as f64);
    borders
}

fn compute_full_grid(blobs: &[Blob]) -> DriverResult<Grid> {
    let arc = deg2rad(ANGLE_SEARCH_ARC_DEG);
    let step = deg2rad(ANGLE_SEARCH_STEP_DEG);

    let horizontal_angle = find_common_angle_rad(0.0, arc, step, blobs);
    let vertical_angle = find_common_angle_rad(std::f64::consts::FRAC_PI_2, arc, step, blobs);
    let forward_angle = (horizontal_angle + vertical_angle - std::f64::consts::FRAC_PI_2) / 2.0;
    let backward_angle = -forward_angle;

    log::info!(
        "grid axis angles: horizontal={:.2}deg vertical={:.2}deg effective={:.2}deg",
        rad2deg(horizontal_angle),
        rad2deg(vertical_angle),
        rad2deg(forward_angle)
    );

    let min_x = blobs.iter().map(|b| b.x).fold(f64::MAX, f64::min);
    let max_x = blobs.iter().map(|b| b.x).fold(f64::MIN, f64::max);
    let min_y = blobs.iter().map(|b| b.y).fold(f64::MAX, f64::min);
    let max_y = blobs.iter().map(|b| b.y).fold(f64::MIN, f64::max);

    let center_x = min_x + (max_x - min_x) / 2.0;
    let center_y = min_y + (max_y - min_y) / 2.0;

    let pivoted: Vec<Blob> = blobs
        .iter()
        .map(|b| {
            let (x, y) = pivot(b.x, b.y, center_x, center_y, backward_angle);
            Blob { x, y }
        })
        .collect();

    let projections_x = compute_borders(pivoted.iter().map(|b| b.x).collect());
    let projections_y = compute_borders(pivoted.iter().map(|b| b.y).collect());

    log::info!(
        "grid projected borders: x={} y={}",
        projections_x.len(),
        projections_y.len()
    );

    if projections_x.len() != EXPECTED_X_BORDERS {
        return Err(DriverError::CalibrationInsufficientData {
            found: projections_x.len(),
            required: EXPECTED_X_BORDERS,
        });
    }
    if projections_y.len() != EXPECTED_Y_BORDERS {
        return Err(DriverError::CalibrationInsufficientData {
            found: projections_y.len(),
            required: EXPECTED_Y_BORDERS,
        });
    }

    let mut nodes = Vec::with_capacity(crate::model::MMI_COUNT);
    for (col, &x) in projections_x.iter().enumerate() {
        // Interlaced columns: even columns start one row-index further in.
        let row_start = if col % 2 == 0 { 1 } else { 0 };
        let mut row = row_start;
        while row < projections_y.len() {
            let y = projections_y[row];
            let (unpivoted_x, unpivoted_y) = pivot(x, y, center_x, center_y, forward_angle);
            nodes.push(GridNode {
                x: unpivoted_x.round() as i64,
                y: unpivoted_y.round() as i64,
                row,
                col,
            });
            row += 2;
        }
    }

    if nodes.len() != crate::model::MMI_COUNT {
        return Err(DriverError::CalibrationInsufficientData {
            found: nodes.len(),
            required: crate::model::MMI_COUNT,
        });
    }

    let grid = Grid { nodes };
    for taps in MZI_MMI_MAP.iter() {
        for &(row, col) in taps.iter() {
            if grid.node_at(row, col).is_none() {
                return Err(DriverError::CalibrationMissingNode { row, col });
            }
        }
    }

    Ok(grid)
}
