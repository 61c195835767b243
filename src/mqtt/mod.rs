//! # MQTT Publishing
//!
//! Republishes button interactions to an MQTT broker and keeps a retained availability
//! flag on `<prefix>/LWT`.
//!
//! ```text
//! mqtt/
//! ├── config.rs        - Broker address and connection tuning
//! ├── topics.rs        - Topic names, computed once per run
//! └── mqtt_handler.rs  - Client lifecycle, callbacks and flow control
//! ```
//!
//! The control loop only sees the [`ButtonPublisher`] trait, so it can be driven
//! against a recording fake in tests.

pub mod config;
pub mod mqtt_handler;
pub mod topics;

use futures::future::BoxFuture;
use std::fmt;

pub use config::BrokerConfig;
pub use mqtt_handler::{BridgeStatus, BrokerCallbacks, PublishBridge};
pub use topics::PublishTopics;

pub const PAYLOAD_ONLINE: &str = "Online";
pub const PAYLOAD_OFFLINE: &str = "Offline";

#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("Invalid broker url '{0}', expected tcp://host[:port]")]
    InvalidUrl(String),
}

/// Per-button topic a payload is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    State,
    Click,
    Hold,
    ClickClick,
    ClickHold,
}

impl TopicKind {
    pub fn suffix(self) -> &'static str {
        match self {
            TopicKind::State => "STATE",
            TopicKind::Click => "CLICK",
            TopicKind::Hold => "HOLD",
            TopicKind::ClickClick => "CLICKCLICK",
            TopicKind::ClickHold => "CLICKHOLD",
        }
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// What the control loop needs from the broker side
pub trait ButtonPublisher: Send {
    fn is_up(&self) -> bool;

    /// Retained "Online"/"Offline" on the availability topic
    fn mark_available(&mut self, available: bool);

    /// Non-retained publish to one of the slot's topics
    fn write_state(&mut self, slot: u8, kind: TopicKind, payload: &str);

    /// Tear down the client and connect again, waiting a bounded time for the broker
    fn reconnect(&mut self) -> BoxFuture<'_, ()>;
}
