//! Control-plane command envelope.
//!
//! Requests arrive off the bus (see [`crate::bus`]) already decoded into
//! [`ControlCommand`] values and are handed to the orchestrator over an
//! mpsc channel; each carries a oneshot sender for its reply, mirroring the
//! teacher crate's `DaqCommand` pattern for actor/GUI communication.

use tokio::sync::oneshot;

use crate::model::{CameraCalibrationMessage, CameraState};

/// One control-plane request, paired with a channel to deliver its reply.
#[derive(Debug)]
pub enum ControlCommand {
    GetState {
        response: oneshot::Sender<CameraState>,
    },
    SetState {
        state: CameraState,
        response: oneshot::Sender<()>,
    },
    GetFramerate {
        response: oneshot::Sender<u32>,
    },
    SetFramerate {
        framerate: u32,
        response: oneshot::Sender<()>,
    },
    GetCalibration {
        response: oneshot::Sender<Option<CameraCalibrationMessage>>,
    },
    GetImage {
        response: oneshot::Sender<()>,
    },
}

impl ControlCommand {
    pub fn get_state() -> (Self, oneshot::Receiver<CameraState>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetState { response: tx }, rx)
    }

    pub fn set_state(state: CameraState) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetState { state, response: tx }, rx)
    }

    pub fn get_framerate() -> (Self, oneshot::Receiver<u32>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetFramerate { response: tx }, rx)
    }

    pub fn set_framerate(framerate: u32) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::SetFramerate {
                framerate,
                response: tx,
            },
            rx,
        )
    }

    pub fn get_calibration() -> (Self, oneshot::Receiver<Option<CameraCalibrationMessage>>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetCalibration { response: tx }, rx)
    }

    pub fn get_image() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetImage { response: tx }, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_state_round_trips_through_the_reply_channel() {
        let (cmd, rx) = ControlCommand::set_state(CameraState::On);
        match cmd {
            ControlCommand::SetState { state, response } => {
                assert_eq!(state, CameraState::On);
                response.send(()).expect("receiver still open");
            }
            _ => panic!("wrong variant"),
        }
        rx.await.expect("reply delivered");
    }
}
