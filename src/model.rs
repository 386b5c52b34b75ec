//! Core data types: fixed geometry constants, the calibrated grid, wire
//! message shapes, and the process-wide calibration snapshot.
//!
//! Wire message field names are `PascalCase` to match the bus's existing
//! subscribers, which predate this driver.

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, DriverResult};
use crate::layout::MZI_MMI_MAP;

/// Number of Mach-Zehnder interferometers on the chip.
pub const MZI_COUNT: usize = 64;
/// Number of MMI taps per MZI.
pub const MMI_PER_MZI: usize = 3;
/// Total number of MMI spots visible on the camera image.
pub const MMI_COUNT: usize = MZI_COUNT * MMI_PER_MZI;
/// Camera frame width in pixels.
pub const FRAME_W: usize = 640;
/// Camera frame height in pixels.
pub const FRAME_H: usize = 480;
/// Half-width of the square extraction window around each MMI node.
pub const PATCH_RADIUS: i64 = 8;

/// One MMI spot's location in both pixel space and logical grid space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridNode {
    #[serde(rename = "X")]
    pub x: i64,
    #[serde(rename = "Y")]
    pub y: i64,
    #[serde(rename = "Row")]
    pub row: usize,
    #[serde(rename = "Col")]
    pub col: usize,
}

/// The full calibrated set of 192 MMI node locations, in a fixed
/// enumeration order established at calibration time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub nodes: Vec<GridNode>,
}

impl Grid {
    /// Finds the node at the given logical `(row, col)`, if populated.
    pub fn node_at(&self, row: usize, col: usize) -> Option<&GridNode> {
        self.nodes.iter().find(|n| n.row == row && n.col == col)
    }
}

/// `[64][3]` table of indices into the MMI vector, one entry per MZI tap.
/// Built once per calibration from [`MZI_MMI_MAP`] plus the calibrated
/// [`Grid`], so the hot loop never re-scans the grid by `(row, col)`.
pub type MziIndex = [[usize; 3]; MZI_COUNT];

/// Resolves every `(row, col)` pair in [`MZI_MMI_MAP`] against `grid`,
/// failing if any tap's node was not recovered during grid calibration.
pub fn build_mzi_index(grid: &Grid) -> DriverResult<MziIndex> {
    let mut index = [[0usize; 3]; MZI_COUNT];
    for (i, taps) in MZI_MMI_MAP.iter().enumerate() {
        for (k, &(row, col)) in taps.iter().enumerate() {
            let node_idx = grid
                .nodes
                .iter()
                .position(|n| n.row == row && n.col == col)
                .ok_or(DriverError::CalibrationMissingNode { row, col })?;
            index[i][k] = node_idx;
        }
    }
    Ok(index)
}

/// Camera power state as carried on the control-plane `camera/state/*` topics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CameraState {
    Off = 0,
    On = 1,
}

/// `{ "State": 0|1 }` request/response body.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CameraStateMessage {
    #[serde(rename = "State")]
    pub state: CameraState,
}

/// `{ "Framerate": n }` request/response body.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CameraFramerateMessage {
    #[serde(rename = "Framerate")]
    pub framerate: u32,
}

/// Calibration snapshot published on `camera/calibration/get/cb`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraCalibrationMessage {
    #[serde(rename = "TargetMaxValue")]
    pub target_max_value: u32,
    #[serde(rename = "EffectiveMaxValue")]
    pub effective_max_value: u32,
    #[serde(rename = "EffectiveShutterSpeed")]
    pub effective_shutter_speed: u32,
    #[serde(rename = "EffectiveDarkValue")]
    pub effective_dark_value: u8,
    #[serde(rename = "EffectiveGrid")]
    pub effective_grid: Vec<GridNode>,
}

/// Control-plane response envelope every `*/cb` reply is wrapped in, matching
/// the bus's existing subscribers (`{ "Message": ..., "Error": "" }`, per the
/// original driver's `MQTTResponse`). `error` is empty on success; this
/// driver never produces a populated `Error` field itself (control-plane
/// failures are logged and dropped rather than echoed to the caller).
#[derive(Clone, Debug, Serialize)]
pub struct ResponseEnvelope<T: Serialize> {
    #[serde(rename = "Message")]
    pub message: T,
    #[serde(rename = "Error")]
    pub error: String,
}

impl<T: Serialize> ResponseEnvelope<T> {
    pub fn ok(message: T) -> Self {
        ResponseEnvelope {
            message,
            error: String::new(),
        }
    }
}

/// One broadcast frame of either MZI phase shifts or raw MMI values.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameMessage {
    #[serde(rename = "I")]
    pub sequence: u64,
    #[serde(rename = "Timestamp")]
    pub timestamp_ms: i64,
    #[serde(rename = "Values")]
    pub values: Vec<f64>,
}

/// Immutable result of the startup calibration sequence, shared read-only
/// with the hot loop for the duration of a camera run.
#[derive(Clone, Debug)]
pub struct CalibrationState {
    pub shutter_us: u32,
    pub target_max_value: u32,
    pub effective_max_value: u32,
    pub dark_value: u8,
    pub grid: Grid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_envelope_serializes_message_and_empty_error() {
        let envelope = ResponseEnvelope::ok(CameraStateMessage {
            state: CameraState::On,
        });
        let json = serde_json::to_string(&envelope).expect("serialize");
        assert!(json.contains("\"Message\":{\"State\":1}"));
        assert!(json.contains("\"Error\":\"\""));
    }

    #[test]
    fn grid_node_serializes_with_pascal_case_fields() {
        let node = GridNode {
            x: 10,
            y: 20,
            row: 1,
            col: 2,
        };
        let json = serde_json::to_string(&node).expect("serialize");
        assert!(json.contains("\"X\":10"));
        assert!(json.contains("\"Row\":1"));
    }

    #[test]
    fn grid_node_at_finds_populated_position() {
        let grid = Grid {
            nodes: vec![GridNode {
                x: 1,
                y: 2,
                row: 3,
                col: 4,
            }],
        };
        assert!(grid.node_at(3, 4).is_some());
        assert!(grid.node_at(0, 0).is_none());
    }

    fn full_grid() -> Grid {
        let mut nodes = Vec::new();
        for taps in MZI_MMI_MAP.iter() {
            for &(row, col) in taps.iter() {
                if !nodes.iter().any(|n: &GridNode| n.row == row && n.col == col) {
                    nodes.push(GridNode {
                        x: col as i64,
                        y: row as i64,
                        row,
                        col,
                    });
                }
            }
        }
        Grid { nodes }
    }

    #[test]
    fn build_mzi_index_resolves_every_tap_against_the_layout_map() {
        let grid = full_grid();
        let index = build_mzi_index(&grid).expect("every layout node is populated");
        for (i, taps) in MZI_MMI_MAP.iter().enumerate() {
            for (k, &(row, col)) in taps.iter().enumerate() {
                let node = &grid.nodes[index[i][k]];
                assert_eq!((node.row, node.col), (row, col));
            }
        }
    }

    #[test]
    fn build_mzi_index_fails_when_a_layout_node_is_missing() {
        let mut grid = full_grid();
        grid.nodes.remove(0);
        assert!(build_mzi_index(&grid).is_err());
    }
}
