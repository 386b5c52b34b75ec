//! Pipeline orchestrator: camera lifecycle, the startup calibration
//! sequence, and the per-frame hot loop.
//!
//! Structured as a single-task actor owning all mutable run state, the same
//! shape as the teacher's `DaqManagerActor`: one `tokio::select!` loop
//! processes control commands and frame arrivals without any locking.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::bus::{topics, Bus};
use crate::calibration::{calibrate_dark_value, calibrate_exposure, calibrate_grid};
use crate::control::ControlCommand;
use crate::demod::{demodulate, Unwrapper};
use crate::frame_source::{sample_averaged_luma, FrameSource, FRAME_BYTES};
use crate::mmi::extract_mmis;
use crate::model::{
    build_mzi_index, CalibrationState, CameraCalibrationMessage, CameraState, FrameMessage,
    MziIndex, FRAME_H, FRAME_W, MMI_COUNT, MZI_COUNT,
};
use crate::snapshot::{encode_debug_overlay, encode_raw_jpeg};

/// Owns the camera run state: current power state, last calibration, and
/// the control-command inbox. Generic over the bus implementation so tests
/// can swap in an in-memory fake instead of a live MQTT broker.
pub struct Orchestrator<B: Bus> {
    bus: Arc<B>,
    control_rx: mpsc::Receiver<ControlCommand>,
    framerate: u32,
    mzi_rate: u32,
    previous_shutter_us: u32,
    state: CameraState,
    calibration: Option<CalibrationState>,
    restart_requested: bool,
}

impl<B: Bus + 'static> Orchestrator<B> {
    /// Builds an orchestrator in the `Off` state with no calibration yet.
    /// `mzi_rate` is the target publish cadence (Hz); it must not exceed
    /// `framerate`, the camera's raw capture rate.
    pub fn new(
        bus: Arc<B>,
        control_rx: mpsc::Receiver<ControlCommand>,
        framerate: u32,
        mzi_rate: u32,
    ) -> Self {
        Orchestrator {
            bus,
            control_rx,
            framerate,
            mzi_rate,
            previous_shutter_us: 0,
            state: CameraState::Off,
            calibration: None,
            restart_requested: false,
        }
    }

    /// Runs until the control channel closes (process shutdown).
    pub async fn run(mut self) {
        log::info!("orchestrator started, camera off");
        loop {
            match self.control_rx.recv().await {
                Some(ControlCommand::SetState {
                    state: CameraState::On,
                    response,
                }) => {
                    let _ = response.send(());
                    loop {
                        self.run_camera_session().await;
                        if !self.restart_requested {
                            break;
                        }
                        self.restart_requested = false;
                        log::info!("restarting camera session at framerate {}", self.framerate);
                    }
                }
                Some(cmd) => self.handle_idle_command(cmd).await,
                None => {
                    log::info!("control channel closed, orchestrator stopping");
                    return;
                }
            }
        }
    }

    /// Handles a control command while the camera is off: nothing to read
    /// or calibrate against, so every reply is either the idle default or a
    /// no-op acknowledgement.
    async fn handle_idle_command(&mut self, cmd: ControlCommand) {
        match cmd {
            ControlCommand::GetState { response } => {
                let _ = response.send(self.state);
            }
            ControlCommand::SetState { response, .. } => {
                // Already off; Off->Off is a no-op acknowledgement.
                let _ = response.send(());
            }
            ControlCommand::GetFramerate { response } => {
                let _ = response.send(self.framerate);
            }
            ControlCommand::SetFramerate {
                framerate,
                response,
            } => {
                self.framerate = framerate;
                let _ = response.send(());
            }
            ControlCommand::GetCalibration { response } => {
                let _ = response.send(self.calibration.as_ref().map(to_calibration_message));
            }
            ControlCommand::GetImage { response } => {
                log::warn!("get_image requested while camera is off, nothing to capture");
                let _ = response.send(());
            }
        }
    }

    /// Runs the full calibration sequence, then the per-frame hot loop,
    /// until a `SetState(Off)` command or a fatal camera error ends the
    /// session. Always leaves `self.state == Off` on return.
    async fn run_camera_session(&mut self) {
        let camera_rate = self.framerate;
        log::info!("calibrating exposure at framerate {camera_rate}");
        let exposure = calibrate_exposure(self.previous_shutter_us).await;
        self.previous_shutter_us = exposure.shutter_us;

        let mut source = match FrameSource::start(camera_rate, exposure.shutter_us) {
            Ok(source) => source,
            Err(e) => {
                log::error!("failed to start camera: {e}");
                return;
            }
        };

        let calibration_frame = match sample_averaged_luma(&mut source).await {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("failed to sample calibration frame: {e}");
                let _ = source.stop().await;
                return;
            }
        };

        let grid = match calibrate_grid(&calibration_frame) {
            Ok(grid) => grid,
            Err(e) => {
                log::error!("grid calibration failed: {e}");
                let _ = source.stop().await;
                return;
            }
        };

        let dark_value = calibrate_dark_value(&calibration_frame);

        let mzi_index = match build_mzi_index(&grid) {
            Ok(index) => index,
            Err(e) => {
                log::error!("failed to build MZI index table: {e}");
                let _ = source.stop().await;
                return;
            }
        };

        let calibration = CalibrationState {
            shutter_us: exposure.shutter_us,
            target_max_value: crate::calibration::exposure::MAX_VALUE_TARGET,
            effective_max_value: exposure.max_value,
            dark_value,
            grid,
        };
        log::info!(
            "calibration complete: shutter={}us dark={} nodes={}",
            calibration.shutter_us,
            calibration.dark_value,
            calibration.grid.nodes.len()
        );
        self.calibration = Some(calibration);
        self.state = CameraState::On;

        self.hot_loop(source, camera_rate, mzi_index).await;

        self.state = CameraState::Off;
    }

    /// Reads frames, demodulates, and publishes on a rate-gated cadence
    /// until told to stop (explicit `set_state(0)`, a framerate change, a
    /// closed control channel, or a camera read failure).
    async fn hot_loop(&mut self, mut source: FrameSource, camera_rate: u32, mzi_index: MziIndex) {
        let grid = self
            .calibration
            .as_ref()
            .expect("hot loop only runs after calibration")
            .grid
            .clone();
        let dark_value = self.calibration.as_ref().expect("calibrated").dark_value;
        let publish_gate = rate_gate_interval(self.mzi_rate, camera_rate);

        let mut unwrapper = Unwrapper::new();
        let mut sequence: u64 = 0;
        let mut frame_buf = vec![0u8; FRAME_BYTES];

        let mut shift_accumulator = [0.0f64; MZI_COUNT];
        let mut mmi_accumulator = vec![0.0f64; MMI_COUNT];
        let mut accumulated_frames: u32 = 0;
        let mut last_publish = Instant::now();

        loop {
            tokio::select! {
                biased;

                cmd = self.control_rx.recv() => {
                    match cmd {
                        Some(ControlCommand::SetState { state: CameraState::Off, response }) => {
                            let _ = response.send(());
                            log::info!("stopping camera session");
                            break;
                        }
                        Some(ControlCommand::SetFramerate { framerate, response }) => {
                            self.framerate = framerate;
                            self.restart_requested = true;
                            let _ = response.send(());
                            log::info!("framerate changed to {framerate}, restarting camera session");
                            break;
                        }
                        Some(ControlCommand::GetImage { response }) => {
                            self.publish_snapshot(&frame_buf[..FRAME_W * FRAME_H], &grid).await;
                            let _ = response.send(());
                        }
                        Some(other) => self.handle_idle_command(other).await,
                        None => {
                            log::info!("control channel closed during camera session");
                            break;
                        }
                    }
                }

                frame_result = source.read_frame(&mut frame_buf) => {
                    if let Err(e) = frame_result {
                        log::error!("frame read failed, stopping camera session: {e}");
                        break;
                    }
                    let luma = &frame_buf[..FRAME_W * FRAME_H];
                    let mmis = extract_mmis(luma, &grid, dark_value);
                    let raw_phases = demodulate(&mmis, &mzi_index);

                    // The bootstrapping frame never contributes: it only seeds the
                    // unwrapper's reference point, per the unwrap state machine.
                    let Some(shifts) = unwrapper.update(raw_phases) else {
                        continue;
                    };

                    for (acc, v) in shift_accumulator.iter_mut().zip(shifts.iter()) {
                        *acc += v;
                    }
                    for (acc, v) in mmi_accumulator.iter_mut().zip(mmis.iter()) {
                        *acc += v;
                    }
                    accumulated_frames += 1;

                    if last_publish.elapsed() >= publish_gate {
                        sequence += 1;
                        let timestamp_ms = chrono::Utc::now().timestamp_millis();
                        let n = accumulated_frames as f64;
                        let mean_shifts: Vec<f64> = shift_accumulator.iter().map(|v| v / n).collect();
                        let mean_mmis: Vec<f64> = mmi_accumulator.iter().map(|v| v / n).collect();

                        self.publish_frame(topics::MZI_BROADCAST, sequence, timestamp_ms, mean_shifts).await;
                        self.publish_frame(topics::MMI_BROADCAST, sequence, timestamp_ms, mean_mmis).await;

                        shift_accumulator = [0.0; MZI_COUNT];
                        mmi_accumulator.iter_mut().for_each(|v| *v = 0.0);
                        accumulated_frames = 0;
                        last_publish = Instant::now();
                    }
                }
            }
        }

        unwrapper.reset();
        if let Err(e) = source.stop().await {
            log::warn!("error stopping camera subprocess: {e}");
        }
    }

    async fn publish_frame(&self, topic: &str, sequence: u64, timestamp_ms: i64, values: Vec<f64>) {
        let message = FrameMessage {
            sequence,
            timestamp_ms,
            values,
        };
        if let Err(e) = self.bus.publish_json(topic, &message).await {
            log::error!("failed to publish frame on {topic}: {e}");
        }
    }

    async fn publish_snapshot(&self, luma: &[u8], grid: &crate::model::Grid) {
        let raw = encode_raw_jpeg(luma);
        if let Err(e) = self.bus.publish_image(topics::GET_IMAGE_CB, &raw).await {
            log::error!("failed to publish snapshot: {e}");
        }
        let overlay = encode_debug_overlay(luma, grid);
        if let Err(e) = self
            .bus
            .publish_image(topics::GET_DRAWING_CB, &overlay)
            .await
        {
            log::error!("failed to publish debug overlay: {e}");
        }
    }
}

/// Computes the minimum interval between publishes so that, across a run at
/// `camera_rate` raw frames/sec, publishes land at roughly `mzi_rate`/sec.
/// `mzi_rate` above `camera_rate` would imply a negative gate; clamp to zero
/// so every accumulated frame publishes immediately instead.
fn rate_gate_interval(mzi_rate: u32, camera_rate: u32) -> Duration {
    let mzi_period_ms = 1000.0 / mzi_rate as f64;
    let camera_period_ms = 1000.0 / camera_rate as f64;
    let gate_ms = (mzi_period_ms - camera_period_ms).max(0.0);
    Duration::from_secs_f64(gate_ms / 1000.0)
}

fn to_calibration_message(state: &CalibrationState) -> CameraCalibrationMessage {
    CameraCalibrationMessage {
        target_max_value: state.target_max_value,
        effective_max_value: state.effective_max_value,
        effective_shutter_speed: state.shutter_us,
        effective_dark_value: state.dark_value,
        effective_grid: state.grid.nodes.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverResult;
    use async_trait::async_trait;
    use serde::Serialize;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl Bus for RecordingBus {
        async fn publish_json<T: Serialize + Send + Sync>(
            &self,
            topic: &str,
            payload: &T,
        ) -> DriverResult<()> {
            let body = serde_json::to_vec(payload).expect("serialize");
            self.published.lock().await.push((topic.to_string(), body));
            Ok(())
        }

        async fn publish_image(&self, topic: &str, jpeg_bytes: &[u8]) -> DriverResult<()> {
            self.published
                .lock()
                .await
                .push((topic.to_string(), jpeg_bytes.to_vec()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn idle_get_state_reports_off() {
        let bus = Arc::new(RecordingBus::default());
        let (_tx, rx) = mpsc::channel(4);
        let mut orchestrator = Orchestrator::new(bus, rx, 10, 5);

        let (cmd, reply) = ControlCommand::get_state();
        orchestrator.handle_idle_command(cmd).await;
        assert_eq!(reply.await.expect("reply"), CameraState::Off);
    }

    #[tokio::test]
    async fn idle_set_framerate_updates_state() {
        let bus = Arc::new(RecordingBus::default());
        let (_tx, rx) = mpsc::channel(4);
        let mut orchestrator = Orchestrator::new(bus, rx, 10, 5);

        let (cmd, reply) = ControlCommand::set_framerate(25);
        orchestrator.handle_idle_command(cmd).await;
        reply.await.expect("acked");
        assert_eq!(orchestrator.framerate, 25);
    }

    #[tokio::test]
    async fn idle_get_calibration_is_none_before_first_run() {
        let bus = Arc::new(RecordingBus::default());
        let (_tx, rx) = mpsc::channel(4);
        let mut orchestrator = Orchestrator::new(bus, rx, 10, 5);

        let (cmd, reply) = ControlCommand::get_calibration();
        orchestrator.handle_idle_command(cmd).await;
        assert!(reply.await.expect("reply").is_none());
    }

    #[tokio::test]
    async fn publish_frame_wraps_values_with_sequence_and_timestamp() {
        let bus = Arc::new(RecordingBus::default());
        let (_tx, rx) = mpsc::channel(4);
        let orchestrator = Orchestrator::new(bus.clone(), rx, 10, 5);

        orchestrator
            .publish_frame(topics::MZI_BROADCAST, 7, 1_000, vec![1.0, 2.0])
            .await;

        let published = bus.published.lock().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, topics::MZI_BROADCAST);
        let decoded: FrameMessage = serde_json::from_slice(&published[0].1).expect("decode");
        assert_eq!(decoded.sequence, 7);
        assert_eq!(decoded.values, vec![1.0, 2.0]);
    }

    #[test]
    fn rate_gate_is_zero_when_mzi_rate_matches_camera_rate() {
        assert_eq!(rate_gate_interval(10, 10), Duration::from_millis(0));
    }

    #[test]
    fn rate_gate_clamps_to_zero_when_mzi_rate_exceeds_camera_rate() {
        // A requested publish rate faster than the raw capture rate can't be
        // honored; every accumulated frame should publish immediately.
        assert_eq!(rate_gate_interval(30, 10), Duration::from_millis(0));
    }

    #[test]
    fn rate_gate_widens_as_mzi_rate_drops_below_camera_rate() {
        let gate = rate_gate_interval(5, 30);
        // 1000/5 - 1000/30 = 200 - 33.33... ~= 166.67ms
        assert!((gate.as_secs_f64() * 1000.0 - 166.666_67).abs() < 1e-2);
    }
}
