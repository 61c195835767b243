use std::borrow::Cow;
use std::fmt;
use tokio::sync::mpsc;

use crate::protocol::ProtocolError;

/// Size of one record on the event channel.
pub const BRIDGE_MESSAGE_LEN: usize = 32;
/// Text area including the terminating NUL.
pub const TEXT_LEN: usize = BRIDGE_MESSAGE_LEN - 3;
/// Status marking the connection as dead.
pub const STATUS_FATAL: u8 = 255;
/// Slot value for messages not tied to one button.
pub const SLOT_ALL: u8 = 255;
/// Records buffered between the reading task and the control loop.
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

pub type EventSender = mpsc::Sender<BridgeMessage>;
pub type EventReceiver = mpsc::Receiver<BridgeMessage>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

// Bridge operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operation {
    Ping = 0,
    InfoGeneral = 1,
    Connect = 2,
    Status = 3,
    UpDown = 4,
}

impl TryFrom<u8> for Operation {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Operation::Ping),
            1 => Ok(Operation::InfoGeneral),
            2 => Ok(Operation::Connect),
            3 => Ok(Operation::Status),
            4 => Ok(Operation::UpDown),
            other => Err(ProtocolError::InvalidEnum {
                field: "Operation",
                value: other,
            }),
        }
    }
}

/// Fixed-size record handed from the reading task to the control loop
///
/// Layout: `operation, status, slot, text[29]`. The text is always NUL terminated at
/// or before offset 28, so at most 28 bytes of it are meaningful.
#[derive(Clone, PartialEq, Eq)]
pub struct BridgeMessage {
    pub operation: Operation,
    pub status: u8,
    pub slot: u8,
    text: [u8; TEXT_LEN],
}

impl BridgeMessage {
    pub fn new(operation: Operation, status: u8, slot: u8, text: &str) -> Self {
        let mut length = text.len().min(TEXT_LEN - 1);
        while !text.is_char_boundary(length) {
            length -= 1;
        }
        let mut raw = [0u8; TEXT_LEN];
        raw[..length].copy_from_slice(&text.as_bytes()[..length]);
        Self {
            operation,
            status,
            slot,
            text: raw,
        }
    }

    /// Heartbeat emitted when the daemon socket stays silent
    pub fn ping(text: &str) -> Self {
        Self::new(Operation::Ping, 0, SLOT_ALL, text)
    }

    pub fn fatal(reason: &str) -> Self {
        Self::new(Operation::Status, STATUS_FATAL, SLOT_ALL, reason)
    }

    pub fn is_fatal(&self) -> bool {
        self.status == STATUS_FATAL
    }

    pub fn text(&self) -> Cow<'_, str> {
        let end = self.text.iter().position(|b| *b == 0).unwrap_or(TEXT_LEN);
        String::from_utf8_lossy(&self.text[..end])
    }

    pub fn to_bytes(&self) -> [u8; BRIDGE_MESSAGE_LEN] {
        let mut out = [0u8; BRIDGE_MESSAGE_LEN];
        out[0] = self.operation as u8;
        out[1] = self.status;
        out[2] = self.slot;
        out[3..].copy_from_slice(&self.text);
        out
    }

    pub fn from_bytes(bytes: &[u8; BRIDGE_MESSAGE_LEN]) -> Result<Self, ProtocolError> {
        let mut text = [0u8; TEXT_LEN];
        text.copy_from_slice(&bytes[3..]);
        text[TEXT_LEN - 1] = 0;
        Ok(Self {
            operation: Operation::try_from(bytes[0])?,
            status: bytes[1],
            slot: bytes[2],
            text,
        })
    }
}

impl fmt::Debug for BridgeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeMessage")
            .field("operation", &self.operation)
            .field("status", &self.status)
            .field("slot", &self.slot)
            .field("text", &self.text())
            .finish()
    }
}
