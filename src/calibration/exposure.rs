//! Auto-exposure calibration: bisect the shutter speed so a sampled frame's
//! max pixel value lands within tolerance of a fixed target.
//!
//! The original driver did this recursively; that accumulates one stack
//! frame per trial and makes the "give up after N trials" exit path awkward
//! to express. Modeled here as an explicit iterative loop instead.

use crate::error::DriverResult;
use crate::frame_source::{sample_averaged_luma, FrameSource};

pub const LOWER_BOUNDARY_US: u32 = 100;
pub const UPPER_BOUNDARY_US: u32 = 3000;
pub const MAX_VALUE_TARGET: u32 = 150;
pub const MAX_VALUE_TOLERANCE: u32 = 5;
pub const MAX_TRIALS: u32 = 5;

/// Shutter speed and the max pixel value it produced, at the end of calibration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExposureResult {
    pub shutter_us: u32,
    pub max_value: u32,
}

/// Samples the camera at a candidate shutter speed and returns the sampled
/// frame's max pixel value. Broken out so tests can substitute a mock
/// sampling function without starting a real subprocess.
pub async fn sample_max_value(
    framerate: u32,
    shutter_us: u32,
) -> DriverResult<u32> {
    let mut source = FrameSource::start(framerate, shutter_us)?;
    let frame = sample_averaged_luma(&mut source).await;
    source.stop().await?;
    let frame = frame?;
    Ok(frame.into_iter().map(u32::from).max().unwrap_or(0))
}

/// Runs the bisection loop against a sampling closure, so the search logic
/// can be tested independent of any real camera.
pub async fn bisect_exposure<F, Fut>(previous_shutter_us: u32, mut sample: F) -> ExposureResult
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = DriverResult<u32>>,
{
    let mut lower = LOWER_BOUNDARY_US;
    let mut upper = UPPER_BOUNDARY_US;
    let mut parameter = if previous_shutter_us == 0 {
        (lower + upper) / 2
    } else {
        previous_shutter_us
    };

    let mut last = ExposureResult {
        shutter_us: parameter,
        max_value: 0,
    };

    for trial in 0..=MAX_TRIALS {
        let value = match sample(parameter).await {
            Ok(v) => v,
            Err(e) => {
                log::error!("exposure calibration sample failed: {e}");
                return last;
            }
        };
        last = ExposureResult {
            shutter_us: parameter,
            max_value: value,
        };

        let diff = (MAX_VALUE_TARGET as i64 - value as i64).unsigned_abs() as u32;
        log::debug!("exposure calibration trial {trial}: shutter={parameter}us value={value} diff={diff}");

        if diff < MAX_VALUE_TOLERANCE {
            return last;
        }
        if trial == MAX_TRIALS {
            log::warn!(
                "exposure calibration reached max trials: shutter={parameter}us value={value}"
            );
            return last;
        }

        let next = (lower + upper) / 2;
        if value < MAX_VALUE_TARGET {
            lower = parameter;
        } else {
            upper = parameter;
        }
        parameter = next;
    }

    last
}

/// Calibrates exposure against a real camera subprocess.
pub async fn calibrate_exposure(previous_shutter_us: u32) -> ExposureResult {
    bisect_exposure(previous_shutter_us, |shutter| async move {
        sample_max_value(30, shutter).await
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn converges_on_monotone_camera() {
        // max(shutter) = shutter / 10, rounded down.
        let result = bisect_exposure(0, |shutter| async move { Ok(shutter / 10) }).await;
        assert!(
            (1450..=1550).contains(&result.shutter_us),
            "shutter {} out of expected range",
            result.shutter_us
        );
        let diff = (MAX_VALUE_TARGET as i64 - result.max_value as i64).unsigned_abs();
        assert!(diff < MAX_VALUE_TOLERANCE as u64 || result.shutter_us == UPPER_BOUNDARY_US);
    }

    #[tokio::test]
    async fn gives_up_after_max_trials_without_converging() {
        // A sampler that never lands in tolerance must still terminate.
        let result = bisect_exposure(0, |shutter| async move {
            Ok(if shutter % 2 == 0 { 0 } else { 1000 })
        })
        .await;
        // Just needs to return, not hang or panic.
        assert!(result.shutter_us >= LOWER_BOUNDARY_US);
    }

    #[tokio::test]
    async fn seeds_from_previous_shutter() {
        let result = bisect_exposure(1500, |shutter| async move { Ok(shutter / 10) }).await;
        assert!((1450..=1550).contains(&result.shutter_us));
    }
}
