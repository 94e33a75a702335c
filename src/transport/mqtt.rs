//! MQTT transport built on `rumqttc`.
//!
//! A background task drives the client event loop. On every (re)connect it subscribes
//! to the sensor and summary topics; incoming publishes are decoded and offered to the
//! matching intake queue without ever blocking the event loop. Connection errors mark
//! the transport disconnected and back off exponentially before the next poll.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Channel, Publisher};
use crate::config::MqttConfig;
use crate::error::{AppResult, GatewayError};
use crate::intake::{IntakeProducer, OfferOutcome};
use crate::record::{RawPacket, Record};

/// Request channel capacity between the client handle and the event loop.
const CLIENT_CHANNEL_CAPACITY: usize = 20;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// How long shutdown waits for the event loop to flush DISCONNECT.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Intake queues fed by the receive path.
#[derive(Debug, Clone)]
pub struct TransportHandles {
    /// Sensor packets from the field device.
    pub sensors: IntakeProducer<RawPacket>,
    /// Precomputed daily summaries.
    pub summaries: IntakeProducer<Record>,
}

/// Where an incoming message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Queued as a sensor packet.
    Sensor(OfferOutcome),
    /// Queued as a daily summary.
    Summary(OfferOutcome),
    /// Payload was not a JSON object.
    Malformed,
    /// Topic not handled by the gateway.
    Ignored,
}

/// Routes incoming publishes to the intake queues.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    sensor_topic: String,
    summary_topic: String,
    handles: TransportHandles,
}

impl MessageRouter {
    /// Router for the topics in `config`.
    pub fn new(config: &MqttConfig, handles: TransportHandles) -> Self {
        Self {
            sensor_topic: config.sensor_topic.clone(),
            summary_topic: config.summary_topic.clone(),
            handles,
        }
    }

    /// Decode and queue one message.
    pub fn route(&self, topic: &str, payload: &[u8]) -> RouteOutcome {
        let is_sensor = topic == self.sensor_topic;
        if !is_sensor && topic != self.summary_topic {
            debug!(topic = %topic, "Ignoring message on unhandled topic");
            return RouteOutcome::Ignored;
        }

        let record = match Record::from_json_slice(payload) {
            Ok(record) => record,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Discarding malformed payload");
                return RouteOutcome::Malformed;
            }
        };

        if is_sensor {
            let outcome = self.handles.sensors.offer(record);
            if outcome == OfferOutcome::Dropped {
                warn!(
                    dropped = self.handles.sensors.dropped_count(),
                    "Sensor queue full, dropping packet"
                );
            }
            RouteOutcome::Sensor(outcome)
        } else {
            let outcome = self.handles.summaries.offer(record);
            if outcome == OfferOutcome::Dropped {
                warn!("Summary queue full, dropping summary");
            }
            RouteOutcome::Summary(outcome)
        }
    }

    fn topics(&self) -> [&str; 2] {
        [&self.sensor_topic, &self.summary_topic]
    }
}

/// MQTT client plus its event-loop task.
pub struct MqttTransport {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    command_topic: String,
    status_topic: String,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    /// Create the client and spawn the event loop. Must run inside a tokio runtime.
    pub fn start(config: &MqttConfig, handles: TransportHandles) -> Self {
        info!(broker = %config.broker, port = config.port, "Initializing MQTT client");

        let mut options = MqttOptions::new(config.client_id.clone(), config.broker.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let Some(username) = config.username.as_ref().filter(|u| !u.is_empty()) {
            options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, CLIENT_CHANNEL_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let router = MessageRouter::new(config, handles);

        let task = tokio::spawn(drive_event_loop(
            eventloop,
            client.clone(),
            Arc::clone(&connected),
            router,
        ));

        Self {
            client,
            connected,
            command_topic: config.command_topic.clone(),
            status_topic: config.status_topic.clone(),
            event_task: Mutex::new(Some(task)),
        }
    }

    /// Whether the broker acknowledged the current connection.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Disconnect and stop the event loop.
    ///
    /// When connected, the event loop gets a short grace period to write DISCONNECT
    /// and exit on its own; otherwise (or on timeout) the task is aborted.
    pub async fn shutdown(&self) -> AppResult<()> {
        info!("Stopping MQTT loop");
        let was_connected = self.connected.swap(false, Ordering::AcqRel);
        let disconnect = if was_connected {
            self.client.disconnect().await.map_err(GatewayError::from)
        } else {
            Ok(())
        };

        let task = self.event_task.lock().ok().and_then(|mut t| t.take());
        let Some(mut task) = task else {
            return disconnect;
        };

        if was_connected && disconnect.is_ok() {
            match tokio::time::timeout(DISCONNECT_GRACE, &mut task).await {
                Ok(Ok(())) => debug!("MQTT event loop stopped"),
                Ok(Err(e)) => warn!(error = %e, "MQTT event loop ended abnormally"),
                Err(_) => {
                    warn!("MQTT event loop did not stop in time, aborting");
                    task.abort();
                }
            }
        } else {
            task.abort();
        }
        disconnect
    }
}

#[async_trait]
impl Publisher for MqttTransport {
    async fn publish(&self, channel: Channel, document: &Value) -> AppResult<()> {
        if !self.is_connected() {
            return Err(GatewayError::TransportNotConnected);
        }

        let (topic, qos) = match channel {
            Channel::Command => (&self.command_topic, QoS::AtLeastOnce),
            Channel::Status => (&self.status_topic, QoS::AtMostOnce),
        };
        let payload = serde_json::to_vec(document)?;

        match channel {
            Channel::Command => info!(topic = %topic, payload = %document, "Publishing command"),
            Channel::Status => debug!(topic = %topic, "Publishing status"),
        }

        self.client.publish(topic.as_str(), qos, false, payload).await?;
        Ok(())
    }

    async fn close(&self) -> AppResult<()> {
        self.shutdown().await
    }
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport")
            .field("connected", &self.is_connected())
            .field("command_topic", &self.command_topic)
            .field("status_topic", &self.status_topic)
            .finish()
    }
}

async fn drive_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    router: MessageRouter,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                router.route(&publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to MQTT broker");
                backoff = INITIAL_BACKOFF;
                // The broker may have dropped our session; subscribe on every connect.
                for topic in router.topics() {
                    match client.subscribe(topic, QoS::AtLeastOnce).await {
                        Ok(()) => info!(topic = %topic, "Subscribed"),
                        Err(e) => error!(topic = %topic, error = %e, "Subscribe failed"),
                    }
                }
                connected.store(true, Ordering::Release);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("MQTT broker sent disconnect");
                connected.store(false, Ordering::Release);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("Disconnected from MQTT broker");
                connected.store(false, Ordering::Release);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                connected.store(false, Ordering::Release);
                error!(error = %e, retry_in = ?backoff, "MQTT connection error");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::IntakeQueue;
    use crate::record::FieldValue;
    use serde_json::json;

    fn router(capacity: usize) -> (MessageRouter, IntakeQueue<RawPacket>, IntakeQueue<Record>) {
        let sensors = IntakeQueue::new(capacity);
        let summaries = IntakeQueue::new(capacity);
        let handles = TransportHandles {
            sensors: sensors.producer(),
            summaries: summaries.producer(),
        };
        (MessageRouter::new(&MqttConfig::default(), handles), sensors, summaries)
    }

    #[test]
    fn sensor_messages_reach_the_sensor_queue() {
        let (router, mut sensors, summaries) = router(4);
        let outcome = router.route("greenhouse/sensors", br#"{"inside_temp_f": 72.5}"#);

        assert_eq!(outcome, RouteOutcome::Sensor(OfferOutcome::Accepted));
        let packet = sensors.poll().unwrap();
        assert_eq!(packet.get("inside_temp_f"), Some(&FieldValue::Float(72.5)));
        assert!(summaries.is_empty());
    }

    #[test]
    fn summary_messages_reach_the_summary_queue() {
        let (router, sensors, mut summaries) = router(4);
        let outcome = router.route("greenhouse/summary", br#"{"date": "2025-04-10"}"#);

        assert_eq!(outcome, RouteOutcome::Summary(OfferOutcome::Accepted));
        assert!(summaries.poll().is_some());
        assert!(sensors.is_empty());
    }

    #[test]
    fn malformed_and_foreign_messages_are_discarded() {
        let (router, sensors, _summaries) = router(4);
        assert_eq!(router.route("greenhouse/sensors", b"{oops"), RouteOutcome::Malformed);
        assert_eq!(router.route("greenhouse/esp32/status", b"{}"), RouteOutcome::Ignored);
        assert!(sensors.is_empty());
    }

    #[test]
    fn full_sensor_queue_drops_new_packets() {
        let (router, sensors, _summaries) = router(1);
        router.route("greenhouse/sensors", br#"{"inside_temp_f": 70}"#);
        let outcome = router.route("greenhouse/sensors", br#"{"inside_temp_f": 71}"#);

        assert_eq!(outcome, RouteOutcome::Sensor(OfferOutcome::Dropped));
        assert_eq!(sensors.dropped_count(), 1);
    }

    #[tokio::test]
    async fn publish_before_connect_is_rejected() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = MqttConfig {
            port,
            ..MqttConfig::default()
        };
        let (_router, sensors, summaries) = router(1);
        let transport = MqttTransport::start(
            &config,
            TransportHandles {
                sensors: sensors.producer(),
                summaries: summaries.producer(),
            },
        );

        let err = transport
            .publish(Channel::Command, &json!({"grow_light_pwm": 0}))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::TransportNotConnected));
        assert!(!transport.is_connected());
        transport.shutdown().await.unwrap();
    }

    /// Minimal broker: reads one MQTT control packet, returning its header byte.
    async fn read_packet(stream: &mut tokio::net::TcpStream) -> Option<u8> {
        use tokio::io::AsyncReadExt;

        let header = stream.read_u8().await.ok()?;
        let mut remaining = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await.ok()?;
            remaining |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0u8; remaining];
        stream.read_exact(&mut body).await.ok()?;
        Some(header)
    }

    #[tokio::test]
    async fn shutdown_sends_disconnect_to_broker() {
        use tokio::io::AsyncWriteExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            assert_eq!(read_packet(&mut stream).await, Some(0x10), "expected CONNECT");
            stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

            let mut headers = Vec::new();
            while let Some(header) = read_packet(&mut stream).await {
                headers.push(header);
            }
            headers
        });

        let config = MqttConfig {
            port,
            ..MqttConfig::default()
        };
        let (_router, sensors, summaries) = router(1);
        let transport = MqttTransport::start(
            &config,
            TransportHandles {
                sensors: sensors.producer(),
                summaries: summaries.producer(),
            },
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while !transport.is_connected() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        transport.shutdown().await.unwrap();
        assert!(!transport.is_connected());

        let headers = tokio::time::timeout(Duration::from_secs(5), broker)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(headers.last(), Some(&0xE0), "packets seen: {headers:x?}");
    }
}
