//! Control subsystem
//!
//! 1. [`interaction`] - Click/hold semantics derived from raw button transitions
//! 2. [`control_loop`] - Epoch-scheduled dispatch from the event channel to MQTT
//! 3. [`supervisor`] - Restart with backoff when the daemon connection dies
//!
//! # Architecture
//!
//! ```text
//! BridgeMessage ──► ControlLoop ──► ButtonInteractions ──► ButtonPublisher
//!                        │
//!                        └──► DaemonHandle (GetInfo each epoch)
//! ```

pub mod control_loop;
pub mod interaction;
pub mod supervisor;
