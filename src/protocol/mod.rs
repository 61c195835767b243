//! Device daemon wire protocol
//!
//! Every packet on the daemon socket is a 16-bit little-endian length header followed
//! by an opcode byte and a fixed per-opcode layout:
//!
//! ```text
//! ┌──────────────┬────────┬─────────────────────────┐
//! │ length (u16) │ opcode │ payload (length - 1)    │
//! └──────────────┴────────┴─────────────────────────┘
//! ```
//!
//! - [`commands`] - outbound requests sent by the gateway
//! - [`events`] - inbound notifications sent by the daemon
//! - [`types`] - addresses and single-byte enumerations shared by both
//! - [`codec`] - cursor reader/writer and the stream framing codec
//!
//! Nothing in here performs I/O. The framing codec plugs into
//! `tokio_util::codec::{FramedRead, FramedWrite}` in the daemon module.

pub mod codec;
pub mod commands;
pub mod events;
pub mod types;

pub use codec::DaemonCodec;
pub use commands::Command;
pub use events::{Advertisement, ButtonEvent, ButtonEventClass, ButtonInfo, DaemonInfo, Event};
pub use types::{
    BdAddr, BdAddrType, BluetoothControllerState, ClickType, ConnectionStatus,
    CreateConnectionChannelError, DisconnectReason, LatencyMode, RemovedReason,
    ScanWizardResult,
};

/// Size of the little-endian length header in front of every packet.
pub const HEADER_LEN: usize = 2;

/// Outbound packet bodies must stay strictly below this size.
pub const MAX_COMMAND_BODY: usize = 4094;

/// Default TCP port of the device daemon.
pub const DEFAULT_DAEMON_PORT: u16 = 5551;

/// Errors produced while encoding or decoding daemon packets
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Command body of {length} bytes exceeds the {MAX_COMMAND_BODY} byte frame limit")]
    FrameTooLarge { length: usize },

    #[error("Packet truncated: needed {needed} more bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("Invalid value {value} for {field}")]
    InvalidEnum { field: &'static str, value: u8 },

    #[error("Invalid bluetooth address '{0}', expected xx:xx:xx:xx:xx:xx")]
    InvalidAddress(String),

    #[error("Empty packet without opcode")]
    EmptyPacket,

    #[error("Unknown command opcode {0}")]
    UnknownCommand(u8),

    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),
}
