//! Control loop with statum state machine for epoch scheduling
//!
//! Owns the daemon write half, the publisher and the interaction state. Messages from
//! the reading task are dispatched one at a time; every epoch the daemon info is
//! re-requested and the broker connection is repaired if it went down.
//!
//! # State Machine
//!
//! ```text
//! Starting ──► Dispatching ──► EpochTimedOut
//!                  │  ▲              │
//!                  │  └──────────────┘
//!                  │     (refresh)
//!                  ▼
//!                Fatal
//! ```
//!
//! An epoch ends once its deadline has passed and no button is in the middle of a
//! hold, so a hold is never split across a refresh.

use chrono::Local;
use statum::{machine, state};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::interaction::{ButtonInteractions, Interaction};
use crate::config::{ButtonSlot, MAX_EPOCH_SECS, MAX_SLOTS};
use crate::daemon::{BridgeMessage, DaemonError, DaemonHandle, EventReceiver, Operation};
use crate::mqtt::ButtonPublisher;
use crate::protocol::{ClickType, Command, ConnectionStatus};

/// asctime() layout without the trailing newline
pub const TIMESTAMP_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Daemon command failed: {0}")]
    Daemon(#[from] DaemonError),
}

#[state]
#[derive(Debug, Clone)]
pub enum LoopState {
    Starting,      // Announcing offline, requesting channels
    Dispatching,   // Handling bridge messages until the epoch ends
    EpochTimedOut, // Deadline reached, refresh pending
    Fatal,         // Daemon connection is gone
}

#[machine]
pub struct ControlLoop<S: LoopState> {
    daemon: DaemonHandle,
    publisher: Box<dyn ButtonPublisher>,
    events: EventReceiver,
    interactions: ButtonInteractions,
    slots: [Option<ButtonSlot>; MAX_SLOTS],
    epoch_length: Duration,

    // Epoch bookkeeping
    epoch: u64,
    epoch_started: Instant,
    deadline: Instant,
    packets: u64,

    fatal_reason: String,
}

pub enum EpochOutcome {
    TimedOut(ControlLoop<EpochTimedOut>),
    Fatal(ControlLoop<Fatal>),
}

fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

impl<S: LoopState> ControlLoop<S> {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    async fn begin_epoch(&mut self) {
        if !self.publisher.is_up() {
            warn!("MQTT is down at epoch boundary, reconnecting");
            self.publisher.reconnect().await;
        }

        let now = Instant::now();
        self.epoch += 1;
        self.epoch_started = now;
        self.deadline = now + self.epoch_length.min(Duration::from_secs(MAX_EPOCH_SECS));
        self.packets = 0;
        info!(
            "Epoch {} started, next refresh in {}s",
            self.epoch,
            self.epoch_length.as_secs()
        );
    }

    fn log_epoch_stats(&self, status: &str) {
        info!(
            "Epoch {} ended ({}): {} messages in {:.1}s",
            self.epoch,
            status,
            self.packets,
            self.epoch_started.elapsed().as_secs_f64()
        );
    }
}

impl ControlLoop<Starting> {
    pub fn create(
        daemon: DaemonHandle,
        publisher: Box<dyn ButtonPublisher>,
        events: EventReceiver,
        slots: [Option<ButtonSlot>; MAX_SLOTS],
        epoch_length: Duration,
    ) -> Self {
        let now = Instant::now();
        Self::new(
            daemon,
            publisher,
            events,
            ButtonInteractions::new(),
            slots,
            epoch_length,
            0,   // epoch
            now, // epoch_started
            now, // deadline
            0,   // packets
            String::new(),
        )
    }

    /// Marks the gateway offline, asks for daemon info and opens a channel per button
    pub async fn start(mut self) -> Result<ControlLoop<Dispatching>, ControlError> {
        info!("Starting control loop");
        self.publisher.mark_available(false);
        self.daemon.send_command(Command::GetInfo).await?;

        for button in self.slots.iter().flatten() {
            match button.address {
                Some(addr) => {
                    info!("Connecting slot {} ({}) to {}", button.slot, button.name, addr);
                    self.daemon
                        .send_command(Command::connect_slot(button.slot, addr))
                        .await?;
                }
                None => debug!("Slot {} ({}) has no address", button.slot, button.name),
            }
        }

        self.begin_epoch().await;
        Ok(self.transition())
    }
}

impl ControlLoop<Dispatching> {
    /// Dispatches messages until the epoch ends or the connection dies
    pub async fn run_epoch(mut self) -> EpochOutcome {
        loop {
            let now = Instant::now();
            let past_deadline = now >= self.deadline;
            if past_deadline && !self.interactions.holds_pending() {
                self.log_epoch_stats("normal timeout");
                return EpochOutcome::TimedOut(self.transition());
            }

            let received = if past_deadline {
                debug!("Epoch {} overdue, waiting for pending hold", self.epoch);
                self.events.recv().await
            } else {
                match tokio::time::timeout_at(self.deadline, self.events.recv()).await {
                    Ok(received) => received,
                    Err(_) => continue,
                }
            };

            let Some(message) = received else {
                self.fatal_reason = "event channel closed".to_string();
                error!("Event channel closed unexpectedly");
                self.log_epoch_stats("unexpected");
                return EpochOutcome::Fatal(self.transition());
            };

            self.packets += 1;
            if message.is_fatal() {
                self.fatal_reason = message.text().into_owned();
                error!("Fatal message from reading task: {}", self.fatal_reason);
                self.log_epoch_stats("unexpected");
                return EpochOutcome::Fatal(self.transition());
            }
            self.dispatch(message);
        }
    }

    fn dispatch(&mut self, message: BridgeMessage) {
        match message.operation {
            Operation::Ping => debug!("Heartbeat: {}", message.text()),
            Operation::InfoGeneral => {
                info!("Daemon info: {} (state {})", message.text(), message.status);
                self.publisher.mark_available(true);
            }
            Operation::Connect => info!(
                "Connection channel for slot {}: {} (error {})",
                message.slot,
                message.text(),
                message.status
            ),
            Operation::Status => {
                info!(
                    "Slot {} status {}: {}",
                    message.slot,
                    message.status,
                    message.text()
                );
                if message.status == u8::from(ConnectionStatus::Disconnected)
                    && self.interactions.cancel_hold(message.slot)
                {
                    warn!("Slot {} disconnected mid-hold, dropping the hold", message.slot);
                }
            }
            Operation::UpDown => {
                let click_type = match ClickType::try_from(message.status) {
                    Ok(click_type) => click_type,
                    Err(e) => {
                        warn!("Dropping button message for slot {}: {}", message.slot, e);
                        return;
                    }
                };
                if let Some(interaction) = self.interactions.apply(message.slot, click_type) {
                    self.publish(message.slot, interaction);
                }
            }
        }
    }

    fn publish(&mut self, slot: u8, interaction: Interaction) {
        let payload = match interaction {
            Interaction::StateOn => "On".to_string(),
            Interaction::StateOff => "Off".to_string(),
            _ => timestamp(),
        };
        info!("Slot {}: {:?} -> {}", slot, interaction, payload);
        self.publisher
            .write_state(slot, interaction.topic(), &payload);
    }
}

impl ControlLoop<EpochTimedOut> {
    /// Re-requests daemon info and opens the next epoch
    pub async fn refresh(mut self) -> Result<ControlLoop<Dispatching>, ControlError> {
        self.daemon.send_command(Command::GetInfo).await?;
        self.begin_epoch().await;
        Ok(self.transition())
    }
}

impl ControlLoop<Fatal> {
    pub fn reason(&self) -> &str {
        &self.fatal_reason
    }

    /// Hands the publisher back for the next connection attempt
    pub fn into_publisher(self) -> Box<dyn ButtonPublisher> {
        self.publisher
    }
}

impl ControlLoop<Starting> {
    /// Runs epochs back to back until the daemon connection dies
    pub async fn run_until_fatal(self) -> Result<ControlLoop<Fatal>, ControlError> {
        let mut running = self.start().await?;
        loop {
            match running.run_epoch().await {
                EpochOutcome::TimedOut(timed_out) => running = timed_out.refresh().await?,
                EpochOutcome::Fatal(fatal) => return Ok(fatal),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::bridge_message::{event_channel, EventSender, SLOT_ALL};
    use crate::mqtt::TopicKind;
    use crate::protocol::BdAddr;
    use futures::future::BoxFuture;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, DuplexStream};

    #[derive(Debug, Clone, PartialEq)]
    enum Record {
        Available(bool),
        State(u8, TopicKind, String),
        Reconnect,
    }

    struct FakePublisher {
        up: bool,
        up_after_reconnect: bool,
        records: Arc<Mutex<Vec<Record>>>,
    }

    impl ButtonPublisher for FakePublisher {
        fn is_up(&self) -> bool {
            self.up
        }

        fn mark_available(&mut self, available: bool) {
            self.records.lock().unwrap().push(Record::Available(available));
        }

        fn write_state(&mut self, slot: u8, kind: TopicKind, payload: &str) {
            self.records
                .lock()
                .unwrap()
                .push(Record::State(slot, kind, payload.to_string()));
        }

        fn reconnect(&mut self) -> BoxFuture<'_, ()> {
            self.records.lock().unwrap().push(Record::Reconnect);
            self.up = self.up_after_reconnect;
            Box::pin(async {})
        }
    }

    struct Harness {
        control: ControlLoop<Starting>,
        events: EventSender,
        daemon: DuplexStream,
        records: Arc<Mutex<Vec<Record>>>,
    }

    fn harness(up: bool, up_after_reconnect: bool) -> Harness {
        let (gateway_side, daemon) = tokio::io::duplex(4096);
        let (events, receiver) = event_channel();
        let records = Arc::new(Mutex::new(Vec::new()));
        let publisher = FakePublisher {
            up,
            up_after_reconnect,
            records: records.clone(),
        };

        let mut slots: [Option<ButtonSlot>; MAX_SLOTS] = Default::default();
        slots[0] = Some(ButtonSlot {
            slot: 0,
            name: "door".to_string(),
            address: Some(BdAddr::from_wire([1, 2, 3, 4, 5, 6])),
        });
        slots[1] = Some(ButtonSlot {
            slot: 1,
            name: "spare".to_string(),
            address: None,
        });

        let control = ControlLoop::create(
            DaemonHandle::from_writer(Box::new(gateway_side)),
            Box::new(publisher),
            receiver,
            slots,
            Duration::from_secs(3600),
        );
        Harness {
            control,
            events,
            daemon,
            records,
        }
    }

    fn button(slot: u8, click_type: ClickType) -> BridgeMessage {
        BridgeMessage::new(Operation::UpDown, u8::from(click_type), slot, "")
    }

    fn count(records: &Arc<Mutex<Vec<Record>>>, wanted: &Record) -> usize {
        records.lock().unwrap().iter().filter(|r| *r == wanted).count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_requests_info_and_channels() {
        let mut h = harness(true, true);
        let running = h.control.start().await.unwrap();
        assert_eq!(running.epoch(), 1);

        // GetInfo, then one CreateConnectionChannel for the addressed slot
        let mut buf = [0u8; 3 + 16];
        h.daemon.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..3], &[0x01, 0x00, 0x00]);
        assert_eq!(&buf[3..6], &[0x0e, 0x00, 0x03]);
        assert_eq!(&buf[6..10], &[0x00, 0x00, 0x00, 0x00]);

        assert_eq!(h.records.lock().unwrap()[0], Record::Available(false));
        assert_eq!(count(&h.records, &Record::Reconnect), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_epoch_refresh_keeps_queued_messages() {
        let mut h = harness(true, true);
        let running = h.control.start().await.unwrap();
        let mut buf = [0u8; 19];
        h.daemon.read_exact(&mut buf).await.unwrap();

        h.events.send(button(0, ClickType::Down)).await.unwrap();
        tokio::time::advance(Duration::from_secs(3601)).await;

        let timed_out = match running.run_epoch().await {
            EpochOutcome::TimedOut(timed_out) => timed_out,
            EpochOutcome::Fatal(_) => panic!("Epoch ended fatally"),
        };
        assert_eq!(timed_out.packets(), 0);

        let running = timed_out.refresh().await.unwrap();
        assert_eq!(running.epoch(), 2);
        let mut info = [0u8; 3];
        h.daemon.read_exact(&mut info).await.unwrap();
        assert_eq!(info, [0x01, 0x00, 0x00]);

        h.events.send(BridgeMessage::fatal("gone")).await.unwrap();
        let fatal = match running.run_epoch().await {
            EpochOutcome::Fatal(fatal) => fatal,
            EpochOutcome::TimedOut(_) => panic!("Expected fatal"),
        };
        assert_eq!(fatal.reason(), "gone");
        assert_eq!(
            count(&h.records, &Record::State(0, TopicKind::State, "On".to_string())),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_once_per_boundary_while_down() {
        let h = harness(false, false);
        let running = h.control.start().await.unwrap();
        assert_eq!(count(&h.records, &Record::Reconnect), 1);

        tokio::time::advance(Duration::from_secs(3600)).await;
        let timed_out = match running.run_epoch().await {
            EpochOutcome::TimedOut(timed_out) => timed_out,
            EpochOutcome::Fatal(_) => panic!("Epoch ended fatally"),
        };
        assert_eq!(count(&h.records, &Record::Reconnect), 1);

        timed_out.refresh().await.unwrap();
        assert_eq!(count(&h.records, &Record::Reconnect), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reconnect_once_up() {
        let h = harness(false, true);
        let running = h.control.start().await.unwrap();
        tokio::time::advance(Duration::from_secs(3600)).await;
        let EpochOutcome::TimedOut(timed_out) = running.run_epoch().await else {
            panic!("Epoch ended fatally");
        };
        timed_out.refresh().await.unwrap();
        assert_eq!(count(&h.records, &Record::Reconnect), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_hold_extends_epoch() {
        let h = harness(true, true);
        let running = h.control.start().await.unwrap();
        let started = Instant::now();

        h.events.send(button(0, ClickType::Down)).await.unwrap();
        h.events.send(button(0, ClickType::Hold)).await.unwrap();
        let late = h.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7200)).await;
            late.send(button(0, ClickType::SingleClick)).await.unwrap();
        });

        let EpochOutcome::TimedOut(timed_out) = running.run_epoch().await else {
            panic!("Epoch ended fatally");
        };
        assert!(started.elapsed() >= Duration::from_secs(7200));
        assert_eq!(timed_out.packets(), 3);

        let records = h.records.lock().unwrap();
        let holds: Vec<_> = records
            .iter()
            .filter(|r| matches!(r, Record::State(0, TopicKind::Hold, _)))
            .collect();
        assert_eq!(holds.len(), 1);
        if let Record::State(_, _, payload) = holds[0] {
            assert_eq!(payload.len(), 24);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_mid_hold_lets_epoch_end() {
        let h = harness(true, true);
        let running = h.control.start().await.unwrap();
        let started = Instant::now();

        h.events.send(button(0, ClickType::Down)).await.unwrap();
        h.events.send(button(0, ClickType::Hold)).await.unwrap();
        h.events
            .send(BridgeMessage::new(
                Operation::Status,
                u8::from(ConnectionStatus::Disconnected),
                0,
                "Disconnected TimedOut",
            ))
            .await
            .unwrap();

        let EpochOutcome::TimedOut(timed_out) = running.run_epoch().await else {
            panic!("Epoch ended fatally");
        };
        assert_eq!(timed_out.packets(), 3);
        assert!(started.elapsed() < Duration::from_secs(3601));
        assert_eq!(
            count(&h.records, &Record::State(0, TopicKind::State, "On".to_string())),
            1
        );
        assert!(!h
            .records
            .lock()
            .unwrap()
            .iter()
            .any(|r| matches!(r, Record::State(0, TopicKind::Hold, _))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_epoch_is_capped() {
        let (gateway_side, _daemon) = tokio::io::duplex(4096);
        let (_events, receiver) = event_channel();
        let publisher = FakePublisher {
            up: true,
            up_after_reconnect: true,
            records: Arc::new(Mutex::new(Vec::new())),
        };
        let control = ControlLoop::create(
            DaemonHandle::from_writer(Box::new(gateway_side)),
            Box::new(publisher),
            receiver,
            Default::default(),
            Duration::MAX,
        );

        let running = control.start().await.unwrap();
        assert!(running.deadline() <= Instant::now() + Duration::from_secs(MAX_EPOCH_SECS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_info_marks_available_and_bookkeeping_is_silent() {
        let h = harness(true, true);
        let running = h.control.start().await.unwrap();

        h.events
            .send(BridgeMessage::new(Operation::InfoGeneral, 2, SLOT_ALL, "1 verified buttons"))
            .await
            .unwrap();
        h.events.send(BridgeMessage::ping("receive timeout")).await.unwrap();
        h.events
            .send(BridgeMessage::new(Operation::Connect, 0, 0, "Connected"))
            .await
            .unwrap();
        h.events
            .send(BridgeMessage::new(Operation::UpDown, 42, 0, "bogus"))
            .await
            .unwrap();
        drop(h.events);

        let EpochOutcome::Fatal(fatal) = running.run_epoch().await else {
            panic!("Expected fatal on closed channel");
        };
        assert_eq!(fatal.reason(), "event channel closed");

        let records = h.records.lock().unwrap();
        assert_eq!(
            *records,
            vec![Record::Available(false), Record::Available(true)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_is_fatal_to_start() {
        let h = harness(true, true);
        drop(h.daemon);
        assert!(matches!(
            h.control.start().await,
            Err(ControlError::Daemon(DaemonError::CommandWrite { opcode: 0, .. }))
        ));
    }

    #[test]
    fn test_timestamp_width() {
        assert_eq!(timestamp().len(), 24);
    }
}
