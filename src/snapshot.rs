//! JPEG snapshot encoding and debug grid overlays, published on demand via
//! the `camera/get_image` control command.

use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_circle_mut;

use crate::layout::MZI_MMI_MAP;
use crate::model::{Grid, FRAME_H, FRAME_W, PATCH_RADIUS};

/// JPEG-encodes the raw luma plane, no overlay.
pub fn encode_raw_jpeg(luma: &[u8]) -> Vec<u8> {
    let image = GrayImage::from_raw(FRAME_W as u32, FRAME_H as u32, luma.to_vec())
        .expect("luma buffer matches fixed camera geometry");
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new(&mut out);
    encoder
        .encode_image(&image)
        .expect("in-memory JPEG encode cannot fail for a well-formed buffer");
    out
}

/// Finds the MZI index and tap letter (a/b/c) for a grid position, for
/// overlay labeling. Mirrors the original driver's `DrawSpotsgridDebug`.
fn mzi_label(row: usize, col: usize) -> Option<(usize, char)> {
    for (mzi_idx, taps) in MZI_MMI_MAP.iter().enumerate() {
        for (tap_idx, &(tap_row, tap_col)) in taps.iter().enumerate() {
            if tap_row == row && tap_col == col {
                let letter = ['a', 'b', 'c'][tap_idx];
                return Some((mzi_idx, letter));
            }
        }
    }
    None
}

/// Renders the luma plane with a circle over every calibrated grid node,
/// then JPEG-encodes it. Used for calibration debugging, published on the
/// `camera/get_drawing/cb` topic. Each node's human-readable `mzi[tap]`
/// label (see [`mzi_label`]) is logged at trace level rather than burned
/// into the image: no font asset ships with this driver, so text rendering
/// is deferred until one is available.
pub fn encode_debug_overlay(luma: &[u8], grid: &Grid) -> Vec<u8> {
    let mut image = RgbaImage::from_fn(FRAME_W as u32, FRAME_H as u32, |x, y| {
        let v = luma[(y as usize) * FRAME_W + x as usize];
        Rgba([v, v, v, 255])
    });

    let magenta = Rgba([255, 0, 255, 255]);

    for node in &grid.nodes {
        draw_hollow_circle_mut(
            &mut image,
            (node.x as i32, node.y as i32),
            PATCH_RADIUS as i32,
            magenta,
        );
        if log::log_enabled!(log::Level::Trace) {
            let label = match mzi_label(node.row, node.col) {
                Some((mzi_idx, tap)) => format!("{mzi_idx}{tap}"),
                None => "?".to_string(),
            };
            log::trace!(
                "grid node [{}:{}] at ({}, {}) -> {label}",
                node.row,
                node.col,
                node.x,
                node.y
            );
        }
    }

    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new(&mut out);
    let rgb = image::DynamicImage::ImageRgba8(image).into_rgb8();
    encoder
        .encode_image(&rgb)
        .expect("in-memory JPEG encode cannot fail for a well-formed buffer");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mzi_label_resolves_known_tap() {
        let (mzi_idx, tap) = mzi_label(13, 14).expect("tap 0a is at (13,14)");
        assert_eq!(mzi_idx, 0);
        assert_eq!(tap, 'a');
    }

    #[test]
    fn unknown_position_has_no_label() {
        assert!(mzi_label(999, 999).is_none());
    }

    #[test]
    fn encode_raw_jpeg_produces_nonempty_bytes() {
        let luma = vec![128u8; FRAME_W * FRAME_H];
        let bytes = encode_raw_jpeg(&luma);
        assert!(!bytes.is_empty());
        // JPEG SOI marker.
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
