//! MQTT client for Bambu printers.
//!
//! One spawned delivery task owns the rumqttc event loop. It subscribes to
//! the report topic on every ConnAck and folds each report into the
//! client's [`StateAggregator`]. Callers read state and publish commands
//! from any task.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, TlsConfiguration, Transport,
};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::commands::{self, PrinterCommand};
use crate::error::{BambuError, Result};
use crate::state::StateAggregator;
use crate::status::{AmsStatus, Status};
use crate::tls;

/// Default MQTT port.
pub const DEFAULT_MQTT_PORT: u16 = 8883;

/// Full reports routinely exceed rumqttc's 10 KiB default.
const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Pause between polls after a connection error, before rumqttc reconnects.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Bambu printer connection configuration.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Printer host or IP.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Printer serial number.
    pub serial: String,
    /// Username (always `bblp` on current firmware).
    pub username: String,
    /// Access code (from printer's LAN mode settings).
    pub access_code: String,
    /// Connection timeout.
    pub timeout: Duration,
}

impl MqttConfig {
    /// Create a configuration with default port, username and timeout.
    pub fn new(
        host: impl Into<String>,
        serial: impl Into<String>,
        access_code: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_MQTT_PORT,
            serial: serial.into(),
            username: crate::DEFAULT_USERNAME.to_string(),
            access_code: access_code.into(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Connected telemetry and command channel.
pub struct PrinterClient {
    serial: String,
    client: AsyncClient,
    state: Arc<StateAggregator>,
    delivery: Option<JoinHandle<()>>,
}

impl PrinterClient {
    /// Connect to a printer and start the delivery task.
    ///
    /// Returns once the broker has accepted the connection.
    pub async fn connect(config: MqttConfig) -> Result<Self> {
        let client_id = format!("bambu_{}", uuid::Uuid::new_v4().simple());

        let mut mqtt_options = MqttOptions::new(client_id, config.host.clone(), config.port);
        mqtt_options.set_credentials(config.username.clone(), config.access_code.clone());
        mqtt_options.set_keep_alive(Duration::from_secs(30));
        mqtt_options.set_clean_session(true);
        mqtt_options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

        // Bambu uses self-signed certificates
        mqtt_options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
            tls::client_config(),
        )));

        let (client, event_loop) = AsyncClient::new(mqtt_options, 64);
        let state = Arc::new(StateAggregator::new());
        let (connected_tx, connected_rx) = oneshot::channel();

        let delivery = tokio::spawn(run_delivery(
            event_loop,
            client.clone(),
            Arc::clone(&state),
            commands::report_topic(&config.serial),
            connected_tx,
        ));

        let outcome = match tokio::time::timeout(config.timeout, connected_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BambuError::ConnectionFailed(
                "delivery task ended before connecting".into(),
            )),
            Err(_) => Err(BambuError::Timeout(format!(
                "connecting to {}:{}",
                config.host, config.port
            ))),
        };
        if let Err(e) = outcome {
            delivery.abort();
            return Err(e);
        }

        tracing::debug!(host = %config.host, serial = %config.serial, "MQTT connected");
        Ok(Self {
            serial: config.serial,
            client,
            state,
            delivery: Some(delivery),
        })
    }

    /// Send a command to the printer.
    pub async fn publish(&self, command: &PrinterCommand) -> Result<()> {
        self.publish_json(command.to_json()).await?;
        tracing::debug!(action = command.action(), "published command");
        Ok(())
    }

    /// Send a raw envelope to the request topic at QoS 0.
    pub async fn publish_json(&self, envelope: Value) -> Result<()> {
        let topic = commands::request_topic(&self.serial);
        let payload = serde_json::to_vec(&envelope)?;

        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| BambuError::MqttError(e.to_string()))
    }

    /// Request a full status push from the printer.
    pub async fn push_all(&self) -> Result<()> {
        self.publish(&PrinterCommand::PushAll).await
    }

    /// Shared device state.
    pub fn state(&self) -> &Arc<StateAggregator> {
        &self.state
    }

    /// Wait for the first report. `None` uses the aggregator default.
    pub async fn wait_for_ready(&self, timeout: Option<Duration>) -> Result<()> {
        self.state.wait_for_ready(timeout).await
    }

    /// Current status view.
    pub fn status(&self) -> Status {
        Status::from_state(&self.state)
    }

    /// Current AMS summary, if the printer reported one.
    pub fn ams(&self) -> Option<AmsStatus> {
        self.state
            .get(&["print", "ams"])
            .and_then(|ams| AmsStatus::from_report(&ams))
    }

    /// Printer serial number.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Send DISCONNECT and wait for the delivery task to finish.
    pub async fn close(mut self) -> Result<()> {
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| BambuError::MqttError(e.to_string()));

        if let Some(delivery) = self.delivery.take() {
            if tokio::time::timeout(Duration::from_secs(2), delivery).await.is_err() {
                tracing::warn!("delivery task did not stop after disconnect");
            }
        }
        result
    }
}

impl Drop for PrinterClient {
    fn drop(&mut self) {
        if let Some(delivery) = self.delivery.take() {
            delivery.abort();
        }
    }
}

/// Poll the event loop until DISCONNECT is sent or the first connection
/// attempt fails.
async fn run_delivery(
    mut event_loop: EventLoop,
    client: AsyncClient,
    state: Arc<StateAggregator>,
    report_topic: String,
    connected_tx: oneshot::Sender<Result<()>>,
) {
    let mut connected_tx = Some(connected_tx);

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                if let Err(e) = client.try_subscribe(report_topic.as_str(), QoS::AtMostOnce) {
                    tracing::warn!(error = %e, "failed to queue report subscription");
                }
                if let Some(tx) = connected_tx.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                handle_report(&state, &report_topic, &publish.topic, &publish.payload);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!("delivery task stopping");
                break;
            }
            Ok(_) => {}
            Err(e) => match connected_tx.take() {
                Some(tx) => {
                    let _ = tx.send(Err(BambuError::ConnectionFailed(e.to_string())));
                    break;
                }
                None => {
                    tracing::warn!(error = %e, "MQTT connection error, reconnecting");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            },
        }
    }
}

/// Decode one inbound message and merge it if it is a report.
fn handle_report(state: &StateAggregator, report_topic: &str, topic: &str, payload: &[u8]) -> bool {
    if topic != report_topic {
        tracing::debug!(topic, "ignoring message on unexpected topic");
        return false;
    }

    match serde_json::from_slice::<Value>(payload) {
        Ok(doc) => state.ingest_value(doc),
        Err(e) => {
            tracing::warn!(error = %e, bytes = payload.len(), "dropping undecodable report");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TOPIC: &str = "device/SERIAL/report";

    #[test]
    fn test_handle_report_merges() {
        let state = StateAggregator::new();
        let payload = br#"{"print":{"gcode_state":"RUNNING","mc_percent":12}}"#;

        assert!(handle_report(&state, TOPIC, TOPIC, payload));
        assert_eq!(state.get(&["print", "mc_percent"]), Some(json!(12)));
        assert!(state.is_ready());
    }

    #[test]
    fn test_handle_report_keeps_decimal_text() {
        let state = StateAggregator::new();
        assert!(handle_report(&state, TOPIC, TOPIC, br#"{"print":{"stg_cur":16.0}}"#));

        let status = Status::from_state(&state);
        assert_eq!(status.print_status.name(), "PAUSED_USER");
    }

    #[test]
    fn test_handle_report_drops_garbage() {
        let state = StateAggregator::new();
        assert!(!handle_report(&state, TOPIC, TOPIC, b"not json"));
        assert!(!handle_report(&state, TOPIC, TOPIC, b"[1,2]"));
        assert!(!handle_report(&state, TOPIC, "device/OTHER/report", b"{}"));
        assert!(!state.is_ready());
    }

    #[test]
    fn test_config_defaults() {
        let config = MqttConfig::new("192.168.1.20", "01S00A", "12345678");
        assert_eq!(config.port, 8883);
        assert_eq!(config.username, "bblp");
        assert_eq!(config.timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = MqttConfig::new("127.0.0.1", "SERIAL", "code");
        config.port = port;
        config.timeout = Duration::from_secs(2);

        let err = PrinterClient::connect(config).await.err().unwrap();
        assert!(matches!(
            err,
            BambuError::ConnectionFailed(_) | BambuError::Timeout(_)
        ));
    }
}
