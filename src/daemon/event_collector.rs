use futures::StreamExt;
use serde::{Deserialize, Serialize};
use statum::{machine, state};
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};

use super::bridge_message::{BridgeMessage, EventSender, Operation, SLOT_ALL};
use crate::config::MAX_SLOTS;
use crate::protocol::{ButtonEventClass, ClickType, ConnectionStatus, DaemonCodec, Event};

/// Silence on the socket longer than this produces a heartbeat.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(60);

pub type DaemonReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

// Collector errors
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Daemon closed the connection")]
    StreamClosed,

    #[error("Failed to read from daemon: {0}")]
    ReadFailed(String),

    #[error("Event channel closed by the control loop")]
    ChannelClosed,
}

/// Which click types each button opcode forwards to the control loop
///
/// The daemon reports the same physical press through all four button opcodes. Each
/// list names the click types kept from that opcode; everything else is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ButtonEventFilter {
    pub up_or_down: Vec<ClickType>,
    pub click_or_hold: Vec<ClickType>,
    pub single_or_double_click: Vec<ClickType>,
    pub single_or_double_click_or_hold: Vec<ClickType>,
}

impl Default for ButtonEventFilter {
    fn default() -> Self {
        Self {
            up_or_down: vec![ClickType::Down, ClickType::Up],
            click_or_hold: vec![ClickType::Hold],
            single_or_double_click: vec![ClickType::SingleClick, ClickType::DoubleClick],
            single_or_double_click_or_hold: Vec::new(),
        }
    }
}

impl ButtonEventFilter {
    pub fn forwards(&self, class: ButtonEventClass, click_type: ClickType) -> bool {
        let allowed = match class {
            ButtonEventClass::UpOrDown => &self.up_or_down,
            ButtonEventClass::ClickOrHold => &self.click_or_hold,
            ButtonEventClass::SingleOrDoubleClick => &self.single_or_double_click,
            ButtonEventClass::SingleOrDoubleClickOrHold => &self.single_or_double_click_or_hold,
        };
        allowed.contains(&click_type)
    }
}

fn slot_of(conn_id: u32) -> Option<u8> {
    u8::try_from(conn_id)
        .ok()
        .filter(|slot| usize::from(*slot) < MAX_SLOTS)
}

/// Maps one decoded daemon event onto at most one bridge message
pub fn translate(event: &Event, filter: &ButtonEventFilter) -> Option<BridgeMessage> {
    match event {
        Event::GetInfoResponse(info) => Some(BridgeMessage::new(
            Operation::InfoGeneral,
            u8::from(info.bluetooth_controller_state),
            SLOT_ALL,
            &format!("{} verified buttons", info.verified_buttons.len()),
        )),
        Event::PingResponse { ping_id } => Some(BridgeMessage::new(
            Operation::Ping,
            0,
            SLOT_ALL,
            &format!("pong {}", ping_id),
        )),
        Event::CreateConnectionChannelResponse {
            conn_id,
            error,
            connection_status,
        } => Some(BridgeMessage::new(
            Operation::Connect,
            u8::from(*error),
            slot_of(*conn_id).unwrap_or(SLOT_ALL),
            &connection_status.to_string(),
        )),
        Event::ConnectionStatusChanged {
            conn_id,
            connection_status,
            disconnect_reason,
        } => {
            let text = if *connection_status == ConnectionStatus::Disconnected {
                format!("{} {}", connection_status, disconnect_reason)
            } else {
                connection_status.to_string()
            };
            Some(BridgeMessage::new(
                Operation::Status,
                u8::from(*connection_status),
                slot_of(*conn_id).unwrap_or(SLOT_ALL),
                &text,
            ))
        }
        Event::ConnectionChannelRemoved {
            conn_id,
            removed_reason,
        } => Some(BridgeMessage::new(
            Operation::Status,
            u8::from(ConnectionStatus::Disconnected),
            slot_of(*conn_id).unwrap_or(SLOT_ALL),
            &removed_reason.to_string(),
        )),
        Event::Button { class, event } => {
            if !filter.forwards(*class, event.click_type) {
                debug!("Filtered {} {} on conn {}", class, event.click_type, event.conn_id);
                return None;
            }
            let Some(slot) = slot_of(event.conn_id) else {
                warn!(
                    "Dropping {} {} for conn {} outside the slot table",
                    class, event.click_type, event.conn_id
                );
                return None;
            };
            if event.was_queued {
                debug!("Button event on slot {} was queued {}s ago", slot, event.time_diff);
            }
            Some(BridgeMessage::new(
                Operation::UpDown,
                u8::from(event.click_type),
                slot,
                &event.click_type.to_string(),
            ))
        }
        Event::Unknown { opcode } => {
            warn!("Unknown daemon packet opcode: {}", opcode);
            None
        }
        other => {
            info!("Daemon event: {:?}", other);
            None
        }
    }
}

// Define collector states using statum's state macro
#[state]
#[derive(Debug, Clone)]
pub enum CollectionState {
    Initializing,
    Collecting,
}

#[machine]
pub struct EventCollector<S: CollectionState> {
    // Read half of the daemon socket, split into packet bodies
    frames: FramedRead<DaemonReader, DaemonCodec>,

    // Per-opcode click type filter
    filter: ButtonEventFilter,

    // Channel towards the control loop
    event_sender: EventSender,

    receive_timeout: Duration,

    // Packets read since start, for stats
    packet_count: u64,
}

impl EventCollector<Initializing> {
    pub fn create(reader: DaemonReader, filter: ButtonEventFilter, event_sender: EventSender) -> Self {
        debug!("Creating Event Collector with filter: {:?}", filter);
        Self::new(
            FramedRead::new(reader, DaemonCodec),
            filter,
            event_sender,
            RECEIVE_TIMEOUT,
            0,
        )
    }

    pub fn with_receive_timeout(mut self, receive_timeout: Duration) -> Self {
        self.receive_timeout = receive_timeout;
        self
    }

    pub fn initialize(self) -> EventCollector<Collecting> {
        info!(
            "Event Collector ready, receive timeout {}s",
            self.receive_timeout.as_secs()
        );
        self.transition()
    }
}

impl EventCollector<Collecting> {
    async fn forward(&self, message: BridgeMessage) -> Result<(), CollectorError> {
        debug!("Forwarding {:?}", message);
        self.event_sender
            .send(message)
            .await
            .map_err(|_| CollectorError::ChannelClosed)
    }

    // Read one packet (or time out) and forward whatever it translates to
    pub async fn collect_next_event(&mut self) -> Result<(), CollectorError> {
        let next = match tokio::time::timeout(self.receive_timeout, self.frames.next()).await {
            Ok(next) => next,
            Err(_) => {
                debug!("No daemon traffic for {:?}", self.receive_timeout);
                return self.forward(BridgeMessage::ping("receive timeout")).await;
            }
        };

        let body = match next {
            None => return Err(CollectorError::StreamClosed),
            Some(Err(e)) => return Err(CollectorError::ReadFailed(e.to_string())),
            Some(Ok(body)) => body,
        };
        self.packet_count += 1;

        match Event::decode(&body) {
            Ok(event) => match translate(&event, &self.filter) {
                Some(message) => self.forward(message).await,
                None => Ok(()),
            },
            Err(e) => {
                warn!("Skipping undecodable packet of {} bytes: {}", body.len(), e);
                Ok(())
            }
        }
    }

    // Runs until the connection dies; a dead connection is reported as FATAL
    pub async fn run_collection_loop(&mut self) -> Result<(), CollectorError> {
        info!("Starting Event Collector loop");
        loop {
            if let Err(e) = self.collect_next_event().await {
                match e {
                    CollectorError::ChannelClosed => {
                        warn!("Control loop is gone, stopping collector");
                    }
                    _ => {
                        error!("Daemon connection lost after {} packets: {}", self.packet_count, e);
                        // Receiver may already be gone, nothing else to tell
                        let _ = self.event_sender.send(BridgeMessage::fatal(&e.to_string())).await;
                    }
                }
                return Err(e);
            }
        }
    }
}

// Handle to the spawned reading task
pub struct CollectorHandle {
    task: JoinHandle<()>,
}

impl CollectorHandle {
    pub fn spawn(reader: DaemonReader, filter: ButtonEventFilter, event_sender: EventSender) -> Self {
        let collector = EventCollector::create(reader, filter, event_sender);
        Self::spawn_collector(collector)
    }

    pub fn spawn_collector(collector: EventCollector<Initializing>) -> Self {
        info!("Spawning Event Collector task");
        let task = tokio::spawn(async move {
            let mut collecting = collector.initialize();
            if let Err(e) = collecting.run_collection_loop().await {
                info!("Event Collector task finished: {}", e);
            }
        });
        Self { task }
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

impl Drop for CollectorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
