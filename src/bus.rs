//! Message-bus adapter: an MQTT client (`rumqttc`) wired to the fixed
//! topic layout and wire formats the bus's other subscribers already
//! expect (confirmed against the original driver's `mqtt_client.go`).
//!
//! Publishing is behind a small [`Bus`] trait so the orchestrator and its
//! tests can swap in an in-memory fake instead of a live broker.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::Settings;
use crate::control::ControlCommand;
use crate::error::{DriverError, DriverResult};
use crate::model::CameraState;

/// MQTT QoS used for every publish; matches the original driver's
/// `DEFAULT_QOS = 2` (exactly-once delivery for control-plane round trips).
const DEFAULT_QOS: QoS = QoS::ExactlyOnce;

pub mod topics {
    pub const STATE_GET: &str = "camera/state/get";
    pub const STATE_GET_CB: &str = "camera/state/get/cb";
    pub const STATE_SET: &str = "camera/state/set";
    pub const STATE_SET_CB: &str = "camera/state/set/cb";
    pub const FRAMERATE_GET: &str = "camera/framerate/get";
    pub const FRAMERATE_GET_CB: &str = "camera/framerate/get/cb";
    pub const FRAMERATE_SET: &str = "camera/framerate/set";
    pub const FRAMERATE_SET_CB: &str = "camera/framerate/set/cb";
    pub const CALIBRATION_GET: &str = "camera/calibration/get";
    pub const CALIBRATION_GET_CB: &str = "camera/calibration/get/cb";
    pub const GET_IMAGE: &str = "camera/get_image";
    pub const GET_IMAGE_CB: &str = "camera/get_image/cb";
    pub const GET_DRAWING_CB: &str = "camera/get_drawing/cb";
    pub const MZI_BROADCAST: &str = "camera/mzi/broadcast";
    pub const MMI_BROADCAST: &str = "camera/mmi/broadcast";

    pub const ALL_REQUEST_TOPICS: &[&str] = &[
        STATE_GET,
        STATE_SET,
        FRAMERATE_GET,
        FRAMERATE_SET,
        CALIBRATION_GET,
        GET_IMAGE,
    ];
}

/// Publishing surface the orchestrator needs from the bus.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish_json<T: Serialize + Send + Sync>(
        &self,
        topic: &str,
        payload: &T,
    ) -> DriverResult<()>;

    async fn publish_image(&self, topic: &str, jpeg_bytes: &[u8]) -> DriverResult<()>;
}

/// Live MQTT-backed bus client.
pub struct MqttBus {
    client: AsyncClient,
    prefix: String,
}

impl MqttBus {
    /// Connects to the broker described by `settings` and subscribes to
    /// every control-plane request topic. Returns the bus handle plus the
    /// driven `EventLoop`, which the caller must poll (see
    /// [`run_dispatch_loop`]) for incoming messages to be processed.
    pub fn connect(settings: &Settings) -> (Self, EventLoop) {
        let client_id = uuid::Uuid::new_v4().to_string();
        log::info!(
            "connecting to MQTT broker {}://{}:{} as {client_id}",
            settings.bus.scheme,
            settings.bus.host,
            settings.bus.port
        );

        let mut options = MqttOptions::new(client_id, &settings.bus.host, settings.bus.port);
        options.set_keep_alive(std::time::Duration::from_secs(5));
        if let (Some(username), Some(password)) = (&settings.bus.username, &settings.bus.password)
        {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, 32);
        (
            MqttBus {
                client,
                prefix: settings.topic_prefix(),
            },
            event_loop,
        )
    }

    fn full_topic(&self, topic: &str) -> String {
        format!("{}/{}", self.prefix, topic)
    }

    pub async fn subscribe_control_topics(&self) -> DriverResult<()> {
        for topic in topics::ALL_REQUEST_TOPICS {
            self.client
                .subscribe(self.full_topic(topic), QoS::ExactlyOnce)
                .await
                .map_err(|e| DriverError::BusPublishError(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Bus for MqttBus {
    async fn publish_json<T: Serialize + Send + Sync>(
        &self,
        topic: &str,
        payload: &T,
    ) -> DriverResult<()> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| DriverError::BusPublishError(e.to_string()))?;
        self.client
            .publish(self.full_topic(topic), DEFAULT_QOS, false, body)
            .await
            .map_err(|e| DriverError::BusPublishError(e.to_string()))
    }

    async fn publish_image(&self, topic: &str, jpeg_bytes: &[u8]) -> DriverResult<()> {
        let encoded = BASE64.encode(jpeg_bytes);
        self.client
            .publish(self.full_topic(topic), DEFAULT_QOS, false, encoded)
            .await
            .map_err(|e| DriverError::BusPublishError(e.to_string()))
    }
}

/// Parses an incoming request on one of [`topics::ALL_REQUEST_TOPICS`] (with
/// the device's topic prefix already stripped) into a [`ControlCommand`].
/// Unparseable payloads and unknown topics are logged and dropped, per the
/// control-plane error policy: malformed requests never get a response.
pub fn parse_control_command(
    topic: &str,
    payload: &[u8],
) -> Option<(ControlCommand, tokio::sync::oneshot::Receiver<CommandReply>)> {
    use crate::model::{CameraFramerateMessage, CameraStateMessage};

    let (cmd, reply_rx) = match topic {
        topics::STATE_GET => {
            let (cmd, rx) = ControlCommand::get_state();
            (cmd, CommandReplyReceiver::State(rx))
        }
        topics::STATE_SET => {
            let msg: CameraStateMessage = serde_json::from_slice(payload).ok()?;
            let (cmd, rx) = ControlCommand::set_state(msg.state);
            (cmd, CommandReplyReceiver::Unit(rx))
        }
        topics::FRAMERATE_GET => {
            let (cmd, rx) = ControlCommand::get_framerate();
            (cmd, CommandReplyReceiver::Framerate(rx))
        }
        topics::FRAMERATE_SET => {
            let msg: CameraFramerateMessage = serde_json::from_slice(payload).ok()?;
            let (cmd, rx) = ControlCommand::set_framerate(msg.framerate);
            (cmd, CommandReplyReceiver::Unit(rx))
        }
        topics::CALIBRATION_GET => {
            let (cmd, rx) = ControlCommand::get_calibration();
            (cmd, CommandReplyReceiver::Calibration(rx))
        }
        topics::GET_IMAGE => {
            let (cmd, rx) = ControlCommand::get_image();
            (cmd, CommandReplyReceiver::Unit(rx))
        }
        other => {
            log::warn!("ignoring request on unrecognized control topic: {other}");
            return None;
        }
    };

    let (tx, external_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let reply = match reply_rx {
            CommandReplyReceiver::State(rx) => rx.await.ok().map(CommandReply::State),
            CommandReplyReceiver::Unit(rx) => rx.await.ok().map(|_| CommandReply::Unit),
            CommandReplyReceiver::Framerate(rx) => rx.await.ok().map(CommandReply::Framerate),
            CommandReplyReceiver::Calibration(rx) => {
                rx.await.ok().map(CommandReply::Calibration)
            }
        };
        if let Some(reply) = reply {
            let _ = tx.send(reply);
        }
    });

    Some((cmd, external_rx))
}

enum CommandReplyReceiver {
    State(tokio::sync::oneshot::Receiver<CameraState>),
    Unit(tokio::sync::oneshot::Receiver<()>),
    Framerate(tokio::sync::oneshot::Receiver<u32>),
    Calibration(tokio::sync::oneshot::Receiver<Option<crate::model::CameraCalibrationMessage>>),
}

/// A control command's completed reply, ready to be serialized onto its
/// `*/cb` topic.
pub enum CommandReply {
    State(CameraState),
    Unit,
    Framerate(u32),
    Calibration(Option<crate::model::CameraCalibrationMessage>),
}

/// Drives the MQTT event loop, forwarding decoded control requests to the
/// orchestrator over `control_tx` and publishing each reply to the
/// request's `<topic>/cb` counterpart.
pub async fn run_dispatch_loop(
    mut event_loop: EventLoop,
    bus: std::sync::Arc<MqttBus>,
    control_tx: mpsc::Sender<ControlCommand>,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let prefix = format!("{}/", bus.prefix);
                let Some(topic) = publish.topic.strip_prefix(&prefix) else {
                    continue;
                };
                let Some((cmd, reply_rx)) = parse_control_command(topic, &publish.payload) else {
                    continue;
                };
                if control_tx.send(cmd).await.is_err() {
                    log::error!("control command channel closed, stopping bus dispatch");
                    return;
                }

                // `get_image` is special: the orchestrator publishes the raw
                // snapshot and debug overlay directly onto `GET_IMAGE_CB` and
                // `GET_DRAWING_CB` once it has a frame in hand, so the
                // generic JSON ack below would just clobber it.
                let skip_auto_reply = topic == topics::GET_IMAGE;
                let cb_topic = format!("{topic}/cb");
                let bus = bus.clone();
                tokio::spawn(async move {
                    if let Ok(reply) = reply_rx.await {
                        if !skip_auto_reply {
                            publish_reply(bus.as_ref(), &cb_topic, reply).await;
                        }
                    }
                });
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("bus event loop error: {e}");
            }
        }
    }
}

async fn publish_reply<B: Bus>(bus: &B, cb_topic: &str, reply: CommandReply) {
    use crate::model::{CameraFramerateMessage, CameraStateMessage, ResponseEnvelope};

    let result = match reply {
        CommandReply::State(state) => {
            bus.publish_json(cb_topic, &ResponseEnvelope::ok(CameraStateMessage { state }))
                .await
        }
        CommandReply::Unit => {
            bus.publish_json(cb_topic, &ResponseEnvelope::ok(serde_json::json!({})))
                .await
        }
        CommandReply::Framerate(framerate) => {
            bus.publish_json(
                cb_topic,
                &ResponseEnvelope::ok(CameraFramerateMessage { framerate }),
            )
            .await
        }
        CommandReply::Calibration(Some(cal)) => {
            bus.publish_json(cb_topic, &ResponseEnvelope::ok(cal)).await
        }
        CommandReply::Calibration(None) => {
            bus.publish_json(cb_topic, &ResponseEnvelope::ok(serde_json::json!(null)))
                .await
        }
    };
    if let Err(e) = result {
        log::error!("failed to publish reply on {cb_topic}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CameraStateMessage;
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

        async fn publish_image(&self, _topic: &str, _jpeg_bytes: &[u8]) -> DriverResult<()> {
            unimplemented!("not exercised by these tests")
        }
    }

    #[tokio::test]
    async fn reply_payloads_are_wrapped_in_the_response_envelope() {
        let bus = RecordingBus::default();
        publish_reply(
            &bus,
            topics::STATE_GET_CB,
            CommandReply::State(CameraState::On),
        )
        .await;

        let published = bus.published.lock().await;
        let body: serde_json::Value = serde_json::from_slice(&published[0].1).expect("decode");
        assert_eq!(body["Error"], "");
        assert_eq!(body["Message"]["State"], 1);
    }

    #[tokio::test]
    async fn absent_calibration_reply_wraps_a_null_message() {
        let bus = RecordingBus::default();
        publish_reply(&bus, topics::CALIBRATION_GET_CB, CommandReply::Calibration(None)).await;

        let published = bus.published.lock().await;
        let body: serde_json::Value = serde_json::from_slice(&published[0].1).expect("decode");
        assert_eq!(body["Error"], "");
        assert!(body["Message"].is_null());
    }

    #[tokio::test]
    async fn parses_state_set_payload() {
        let payload = serde_json::to_vec(&CameraStateMessage {
            state: CameraState::On,
        })
        .unwrap();
        let (cmd, _rx) = parse_control_command(topics::STATE_SET, &payload).expect("parses");
        match cmd {
            ControlCommand::SetState { state, .. } => assert_eq!(state, CameraState::On),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_topic_is_ignored() {
        assert!(parse_control_command("camera/unknown", b"{}").is_none());
    }
}
