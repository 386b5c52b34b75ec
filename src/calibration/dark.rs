//! Dark-value calibration: the camera's effective black level, estimated as
//! the mode of an averaged frame's intensity histogram.

/// Returns the most frequent pixel value in `frame`, used as the per-run
/// dark-value floor for MMI extraction.
pub fn calibrate_dark_value(frame: &[u8]) -> u8 {
    let mut histogram = [0u32; 256];
    for &pixel in frame {
        histogram[pixel as usize] += 1;
    }
    let (mode, _) = histogram
        .iter()
        .enumerate()
        .max_by_key(|&(_, &count)| count)
        .unwrap_or((0, &0));
    mode as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_the_most_common_value() {
        let mut frame = vec![20u8; 1000];
        frame.extend(std::iter::repeat(200u8).take(10));
        assert_eq!(calibrate_dark_value(&frame), 20);
    }

    #[test]
    fn empty_frame_defaults_to_zero() {
        assert_eq!(calibrate_dark_value(&[]), 0);
    }
}
