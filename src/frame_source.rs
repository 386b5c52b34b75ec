//! Adapter over the `libcamera-raw` subprocess.
//!
//! The camera is a child process emitting back-to-back NV12 frames on its
//! standard output. This module owns the child's lifecycle and exposes a
//! simple "read one frame" interface; everything downstream operates on the
//! luma plane only.

use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};

use crate::error::{DriverError, DriverResult};
use crate::model::{FRAME_H, FRAME_W};

/// Bytes in one NV12 frame at the fixed camera geometry (luma + half-size chroma).
pub const FRAME_BYTES: usize = FRAME_W * FRAME_H + FRAME_W * FRAME_H / 2;

/// A running camera subprocess plus its piped stdout.
pub struct FrameSource {
    child: Child,
    stdout: BufReader<ChildStdout>,
}

impl FrameSource {
    /// Spawns `libcamera-raw` at the given framerate and shutter speed,
    /// fixed at the driver's native 640x480 geometry.
    pub fn start(framerate: u32, shutter_us: u32) -> DriverResult<Self> {
        let mut child = Command::new("libcamera-raw")
            .args([
                "--camera",
                "0",
                "--width",
                &FRAME_W.to_string(),
                "--height",
                &FRAME_H.to_string(),
                "--framerate",
                &framerate.to_string(),
                "--flush",
                "1",
                "-t",
                "0",
                "--shutter",
                &shutter_us.to_string(),
                "--gain",
                "1",
                "--ev",
                "0",
                "--denoise",
                "off",
                "--contrast",
                "1",
                "-o",
                "-",
            ])
            .stdout(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| DriverError::CameraStartFailure(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DriverError::CameraStartFailure("no stdout pipe".to_string()))?;

        Ok(FrameSource {
            child,
            stdout: BufReader::new(stdout),
        })
    }

    /// Reads one full NV12 frame into `buf`, which must be exactly
    /// [`FRAME_BYTES`] long. A short read (child died) surfaces as an I/O
    /// error.
    pub async fn read_frame(&mut self, buf: &mut [u8]) -> DriverResult<()> {
        debug_assert_eq!(buf.len(), FRAME_BYTES);
        self.stdout.read_exact(buf).await?;
        Ok(())
    }

    /// Kills and reaps the child. Idempotent: safe to call even if the child
    /// already exited on its own.
    pub async fn stop(mut self) -> DriverResult<()> {
        log::debug!("killing camera subprocess");
        if let Err(e) = self.child.start_kill() {
            log::debug!("camera subprocess kill failed (likely already exited): {e}");
        }
        let status = self.child.wait().await?;
        log::debug!("camera subprocess exited: {status}");
        Ok(())
    }
}

/// Drops the first [`PURGE_FRAMES`] frames, then averages the next
/// [`SAMPLE_FRAMES`] into a single 8-bit luma frame.
///
/// Shared by exposure, grid, and dark-value calibration: each needs one
/// representative averaged frame rather than raw single-shot noise.
pub const PURGE_FRAMES: usize = 3;
pub const SAMPLE_FRAMES: usize = 3;

pub async fn sample_averaged_luma(source: &mut FrameSource) -> DriverResult<Vec<u8>> {
    let mut buf = vec![0u8; FRAME_BYTES];

    for _ in 0..PURGE_FRAMES {
        source.read_frame(&mut buf).await?;
    }

    let mut accumulator = vec![0u16; FRAME_W * FRAME_H];
    for _ in 0..SAMPLE_FRAMES {
        source.read_frame(&mut buf).await?;
        for (acc, &pixel) in accumulator.iter_mut().zip(buf[..FRAME_W * FRAME_H].iter()) {
            *acc += pixel as u16;
        }
    }

    Ok(accumulator
        .into_iter()
        .map(|v| (v / SAMPLE_FRAMES as u16) as u8)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_bytes_matches_nv12_geometry() {
        assert_eq!(FRAME_BYTES, FRAME_W * FRAME_H * 3 / 2);
    }
}
