//! Device daemon connection
//!
//! 1. [`connection`] - TCP socket setup and the command write half
//! 2. [`event_collector`] - Reading task that decodes events and filters button noise
//! 3. [`bridge_message`] - Fixed-size records passed to the control loop
//!
//! ```text
//! daemon ──► EventCollector ──► event channel ──► ControlLoop
//!    ▲                                               │
//!    └────────────── DaemonHandle ◄──────────────────┘
//! ```

pub mod bridge_message;
pub mod connection;
pub mod event_collector;

pub use bridge_message::{event_channel, BridgeMessage, EventReceiver, EventSender, Operation};
pub use connection::{connect, open_stream, ConnectError, DaemonError, DaemonHandle};
pub use event_collector::{ButtonEventFilter, CollectorHandle};
