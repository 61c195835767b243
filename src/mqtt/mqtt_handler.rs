use futures::future::BoxFuture;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{BrokerConfig, ButtonPublisher, PublishTopics, TopicKind, PAYLOAD_OFFLINE, PAYLOAD_ONLINE};

/// Notifications from the broker client, delivered on the event loop driver task
pub trait BrokerCallbacks: Send + Sync {
    fn on_connected(&self);
    fn on_connect_failed(&self, reason: &str);
    fn on_send_complete(&self);
    fn on_send_failed(&self, reason: &str);
    fn on_connection_lost(&self, reason: &str);
}

/// Connection flag and outstanding publish count shared with the driver task
#[derive(Debug)]
pub struct BridgeStatus {
    up: AtomicBool,
    outstanding: AtomicI64,
    max_outstanding: i64,
    // Set once the current connect attempt has an answer either way
    attempt_settled: AtomicBool,
    settled: Notify,
}

impl BridgeStatus {
    pub fn new(max_outstanding: i64) -> Self {
        Self {
            up: AtomicBool::new(false),
            outstanding: AtomicI64::new(0),
            max_outstanding,
            attempt_settled: AtomicBool::new(false),
            settled: Notify::new(),
        }
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    pub fn outstanding(&self) -> i64 {
        self.outstanding.load(Ordering::SeqCst)
    }

    fn begin_attempt(&self) {
        self.up.store(false, Ordering::SeqCst);
        self.attempt_settled.store(false, Ordering::SeqCst);
    }

    fn settle_attempt(&self) {
        self.attempt_settled.store(true, Ordering::SeqCst);
        self.settled.notify_waiters();
    }

    async fn wait_for_attempt(&self) {
        loop {
            // Register before checking so a concurrent notify is not lost
            let notified = self.settled.notified();
            if self.attempt_settled.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    fn check_outstanding(&self, outstanding: i64) {
        if outstanding > self.max_outstanding {
            self.up.store(false, Ordering::SeqCst);
            error!("Outstanding MQTT messages is high: {}", outstanding);
        }
    }

    // Count a publish about to be handed to the client
    fn begin_send(&self) {
        let outstanding = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.check_outstanding(outstanding);
    }
}

impl BrokerCallbacks for BridgeStatus {
    fn on_connected(&self) {
        self.outstanding.store(0, Ordering::SeqCst);
        self.up.store(true, Ordering::SeqCst);
        info!("MQTT connect complete");
        self.settle_attempt();
    }

    fn on_connect_failed(&self, reason: &str) {
        self.up.store(false, Ordering::SeqCst);
        error!("MQTT connect failed: {}", reason);
        self.settle_attempt();
    }

    fn on_send_complete(&self) {
        let outstanding = self.outstanding.fetch_sub(1, Ordering::SeqCst) - 1;
        self.check_outstanding(outstanding);
    }

    fn on_send_failed(&self, reason: &str) {
        self.up.store(false, Ordering::SeqCst);
        error!("MQTT send failed: {}", reason);
    }

    fn on_connection_lost(&self, reason: &str) {
        self.up.store(false, Ordering::SeqCst);
        error!("MQTT connection lost: {}", reason);
    }
}

// Polls the client event loop until the first error, translating events to callbacks
async fn drive_event_loop(mut eventloop: EventLoop, callbacks: Arc<dyn BrokerCallbacks>) {
    let mut connected = false;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    connected = true;
                    callbacks.on_connected();
                } else {
                    callbacks.on_connect_failed(&format!("{:?}", ack.code));
                    return;
                }
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                debug!("PubAck for packet {}", ack.pkid);
                callbacks.on_send_complete();
            }
            Ok(event) => debug!("MQTT event: {:?}", event),
            Err(e) => {
                if connected {
                    callbacks.on_connection_lost(&e.to_string());
                } else {
                    callbacks.on_connect_failed(&e.to_string());
                }
                return;
            }
        }
    }
}

/// Owns the broker client and publishes button state
pub struct PublishBridge {
    config: BrokerConfig,
    topics: PublishTopics,
    client: Option<AsyncClient>,
    driver: Option<JoinHandle<()>>,
    status: Arc<BridgeStatus>,
}

impl PublishBridge {
    pub fn new(config: BrokerConfig, topics: PublishTopics) -> Self {
        let status = Arc::new(BridgeStatus::new(config.max_outstanding));
        info!(
            "MQTT server {}:{}, LWT={}",
            config.host,
            config.port,
            topics.availability()
        );
        Self {
            config,
            topics,
            client: None,
            driver: None,
            status,
        }
    }

    /// First connection attempt; a failure leaves the bridge down
    pub async fn connect(&mut self) {
        self.reconnect_client().await;
    }

    pub fn status(&self) -> Arc<BridgeStatus> {
        self.status.clone()
    }

    fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.host.clone(),
            self.config.port,
        );
        options
            .set_keep_alive(self.config.keep_alive)
            .set_clean_session(true)
            .set_last_will(LastWill::new(
                self.topics.availability(),
                PAYLOAD_OFFLINE,
                QoS::AtLeastOnce,
                true,
            ));
        options
    }

    fn drop_client(&mut self) -> bool {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        self.client.take().is_some()
    }

    async fn reconnect_client(&mut self) {
        if self.drop_client() {
            debug!("Dropped previous MQTT client");
            tokio::time::sleep(self.config.reconnect_delay).await;
        }

        self.status.begin_attempt();
        let (client, eventloop) = AsyncClient::new(self.mqtt_options(), self.config.request_capacity);
        let callbacks: Arc<dyn BrokerCallbacks> = self.status.clone();
        self.driver = Some(tokio::spawn(drive_event_loop(eventloop, callbacks)));
        self.client = Some(client);

        let waited = tokio::time::timeout(self.config.connect_timeout, self.status.wait_for_attempt()).await;
        if self.status.is_up() {
            info!("Connected to MQTT broker {}:{}", self.config.host, self.config.port);
        } else if waited.is_err() {
            error!(
                "MQTT did not connect within {:?} to {}:{}",
                self.config.connect_timeout, self.config.host, self.config.port
            );
        } else {
            warn!("MQTT broker {}:{} rejected the connection", self.config.host, self.config.port);
        }
    }

    /// QoS 1 publish; failing to hand the message to the client takes the bridge down
    pub fn publish(&mut self, topic: &str, retained: bool, payload: &str) {
        debug!("Writing retain={} message '{}' to topic '{}'", retained, payload, topic);
        self.status.begin_send();

        let Some(client) = self.client.as_ref() else {
            self.status
                .on_send_failed(&format!("no client ({} : {})", topic, payload));
            return;
        };
        if let Err(e) = client.try_publish(topic, QoS::AtLeastOnce, retained, payload.as_bytes().to_vec()) {
            self.status
                .on_send_failed(&format!("{} ({} : {})", e, topic, payload));
        }
    }

    #[cfg(test)]
    pub(crate) fn install_client(&mut self, client: AsyncClient) {
        self.client = Some(client);
    }
}

impl ButtonPublisher for PublishBridge {
    fn is_up(&self) -> bool {
        self.status.is_up()
    }

    fn mark_available(&mut self, available: bool) {
        let payload = if available { PAYLOAD_ONLINE } else { PAYLOAD_OFFLINE };
        let topic = self.topics.availability().to_string();
        self.publish(&topic, true, payload);
    }

    fn write_state(&mut self, slot: u8, kind: TopicKind, payload: &str) {
        let Some(topic) = self.topics.topic(slot, kind).map(str::to_string) else {
            warn!("No {} topic for slot {}, dropping '{}'", kind, slot, payload);
            return;
        };
        self.publish(&topic, false, payload);
    }

    fn reconnect(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(self.reconnect_client())
    }
}

impl Drop for PublishBridge {
    fn drop(&mut self) {
        self.drop_client();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ButtonSlot, MAX_SLOTS};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    fn topics() -> PublishTopics {
        let mut buttons: [Option<ButtonSlot>; MAX_SLOTS] = Default::default();
        buttons[0] = Some(ButtonSlot {
            slot: 0,
            name: "door".to_string(),
            address: None,
        });
        PublishTopics::new("flic", &buttons)
    }

    // Bridge with a client whose event loop is never polled
    fn offline_bridge() -> (PublishBridge, EventLoop) {
        let config = BrokerConfig::new("127.0.0.1", 1, "test");
        let mut bridge = PublishBridge::new(config, topics());
        let (client, eventloop) = AsyncClient::new(MqttOptions::new("test", "127.0.0.1", 1), 64);
        bridge.install_client(client);
        (bridge, eventloop)
    }

    #[test]
    fn test_outstanding_threshold() {
        let status = BridgeStatus::new(16);
        status.on_connected();
        for _ in 0..16 {
            status.begin_send();
        }
        assert!(status.is_up());
        status.begin_send();
        assert!(!status.is_up());
        assert_eq!(status.outstanding(), 17);
    }

    #[test]
    fn test_connect_resets_outstanding() {
        let status = BridgeStatus::new(16);
        for _ in 0..20 {
            status.begin_send();
        }
        status.on_connected();
        assert!(status.is_up());
        assert_eq!(status.outstanding(), 0);

        status.begin_send();
        status.on_send_complete();
        assert!(status.is_up());
        assert_eq!(status.outstanding(), 0);
    }

    #[test]
    fn test_failures_take_bridge_down() {
        let status = BridgeStatus::new(16);
        status.on_connected();
        status.on_send_failed("test");
        assert!(!status.is_up());

        status.on_connected();
        status.on_connection_lost("test");
        assert!(!status.is_up());
    }

    #[tokio::test]
    async fn test_seventeen_unacknowledged_publishes() {
        let (mut bridge, _eventloop) = offline_bridge();
        bridge.status().on_connected();

        for _ in 0..16 {
            bridge.write_state(0, TopicKind::State, "On");
        }
        assert!(bridge.is_up());

        bridge.write_state(0, TopicKind::State, "Off");
        assert!(!bridge.is_up());
    }

    #[tokio::test]
    async fn test_publish_without_client_fails() {
        let mut bridge = PublishBridge::new(BrokerConfig::new("127.0.0.1", 1, "test"), topics());
        bridge.status().on_connected();
        bridge.mark_available(true);
        assert!(!bridge.is_up());
    }

    #[tokio::test]
    async fn test_unknown_slot_is_not_published() {
        let (mut bridge, _eventloop) = offline_bridge();
        bridge.status().on_connected();
        bridge.write_state(3, TopicKind::Click, "x");
        assert_eq!(bridge.status().outstanding(), 0);
        assert!(bridge.is_up());
    }

    // CONNACK, remaining length 2, no session present, then the return code
    const CONNACK_ACCEPTED: &[u8] = &[0x20, 0x02, 0x00, 0x00];
    const CONNACK_NOT_AUTHORIZED: &[u8] = &[0x20, 0x02, 0x00, 0x05];

    // Broker that accepts connections and optionally answers the CONNECT with `reply`
    async fn fake_broker(reply: Option<&'static [u8]>) -> (u16, mpsc::UnboundedReceiver<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                if let Some(reply) = reply {
                    let mut connect = [0u8; 256];
                    let _ = socket.read(&mut connect).await;
                    let _ = socket.write_all(reply).await;
                }
                // Held open by the test
                if accepted_tx.send(socket).is_err() {
                    return;
                }
            }
        });
        (port, accepted_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_broker_leaves_bridge_down() {
        let (port, mut accepted) = fake_broker(None).await;
        let mut bridge = PublishBridge::new(BrokerConfig::new("127.0.0.1", port, "test"), topics());

        bridge.connect().await;
        assert!(!bridge.is_up());
        let _first = accepted.recv().await.unwrap();

        // Second attempt tears down the old client and pauses before reconnecting
        let started = Instant::now();
        bridge.reconnect().await;
        assert!(started.elapsed() >= bridge.config.reconnect_delay);
        assert!(!bridge.is_up());
        assert!(bridge.client.is_some());
        let _second = accepted.recv().await.unwrap();
    }

    #[tokio::test]
    async fn test_refused_connack_settles_early() {
        let (port, _accepted) = fake_broker(Some(CONNACK_NOT_AUTHORIZED)).await;
        let mut bridge = PublishBridge::new(BrokerConfig::new("127.0.0.1", port, "test"), topics());

        let started = Instant::now();
        bridge.connect().await;
        assert!(!bridge.is_up());
        assert!(started.elapsed() < bridge.config.connect_timeout);
    }

    #[tokio::test]
    async fn test_accepted_connack_brings_bridge_up() {
        let (port, _accepted) = fake_broker(Some(CONNACK_ACCEPTED)).await;
        let mut bridge = PublishBridge::new(BrokerConfig::new("127.0.0.1", port, "test"), topics());

        bridge.connect().await;
        assert!(bridge.is_up());
        assert_eq!(bridge.status().outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_attempt_wakes_on_settle() {
        let status = Arc::new(BridgeStatus::new(16));
        status.begin_attempt();

        let waiter = {
            let status = status.clone();
            tokio::spawn(async move {
                tokio::time::timeout(Duration::from_secs(5), status.wait_for_attempt()).await
            })
        };
        tokio::task::yield_now().await;
        status.on_connected();

        assert!(waiter.await.unwrap().is_ok());
        assert!(status.is_up());
    }
}
