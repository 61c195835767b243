use futures::SinkExt;
use std::io;
use std::net::SocketAddr;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio_util::codec::FramedWrite;
use tracing::{debug, info};

use super::bridge_message::EventSender;
use super::event_collector::{ButtonEventFilter, CollectorHandle};
use crate::protocol::{Command, DaemonCodec, ProtocolError};

pub type DaemonWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("No such daemon host {host}: {reason}")]
    HostUnresolved { host: String, reason: String },

    #[error("Failed to connect to daemon at {addr}: {source}")]
    ConnectFailed { addr: SocketAddr, source: io::Error },

    #[error("Failed to configure daemon socket: {0}")]
    SocketConfigFailed(io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("Failed to write command opcode {opcode} to daemon: {source}")]
    CommandWrite { opcode: u8, source: ProtocolError },
}

/// Write half of the daemon connection
pub struct DaemonHandle {
    sink: FramedWrite<DaemonWriter, DaemonCodec>,
}

impl DaemonHandle {
    pub fn from_writer(writer: DaemonWriter) -> Self {
        Self {
            sink: FramedWrite::new(writer, DaemonCodec),
        }
    }

    /// Writes and flushes one complete frame
    pub async fn send_command(&mut self, command: Command) -> Result<(), DaemonError> {
        let opcode = command.opcode();
        debug!("Sending daemon command: {:?}", command);
        self.sink
            .send(command)
            .await
            .map_err(|source| DaemonError::CommandWrite { opcode, source })
    }
}

/// Resolves `host` and opens a TCP stream to the daemon
pub async fn open_stream(host: &str, port: u16) -> Result<TcpStream, ConnectError> {
    let unresolved = |reason: String| ConnectError::HostUnresolved {
        host: host.to_string(),
        reason,
    };
    let addr = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| unresolved(e.to_string()))?
        .next()
        .ok_or_else(|| unresolved("no addresses".to_string()))?;

    info!("Connecting to device daemon at {}", addr);
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| ConnectError::ConnectFailed { addr, source })?;
    stream
        .set_nodelay(true)
        .map_err(ConnectError::SocketConfigFailed)?;
    Ok(stream)
}

/// Opens the daemon socket and starts its reading task
pub async fn connect(
    host: &str,
    port: u16,
    filter: ButtonEventFilter,
    event_sender: EventSender,
) -> Result<(DaemonHandle, CollectorHandle), ConnectError> {
    let stream = open_stream(host, port).await?;
    let (reader, writer) = stream.into_split();
    let collector = CollectorHandle::spawn(Box::new(reader), filter, event_sender);
    info!("Connected to device daemon at {}:{}", host, port);
    Ok((DaemonHandle::from_writer(Box::new(writer)), collector))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::bridge_message::{event_channel, Operation};
    use crate::protocol::codec::frame;
    use crate::protocol::Event;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_exchanges_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (sender, mut receiver) = event_channel();

        let (connected, accepted) = tokio::join!(
            connect("127.0.0.1", port, ButtonEventFilter::default(), sender),
            listener.accept()
        );
        let (mut handle, _collector) = connected.unwrap();
        let (mut daemon, _) = accepted.unwrap();

        handle.send_command(Command::GetInfo).await.unwrap();
        let mut buf = [0u8; 3];
        daemon.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x01, 0x00, 0x00]);

        let pong = frame(&Event::PingResponse { ping_id: 4 }.encode()).unwrap();
        daemon.write_all(&pong).await.unwrap();
        let msg = receiver.recv().await.unwrap();
        assert_eq!(msg.operation, Operation::Ping);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (sender, _receiver) = event_channel();
        let result = connect("127.0.0.1", port, ButtonEventFilter::default(), sender).await;
        assert!(matches!(result, Err(ConnectError::ConnectFailed { .. })));
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let (gateway_side, daemon_side) = tokio::io::duplex(64);
        drop(daemon_side);

        let mut handle = DaemonHandle::from_writer(Box::new(gateway_side));
        let result = handle.send_command(Command::Ping { ping_id: 1 }).await;
        assert!(matches!(
            result,
            Err(DaemonError::CommandWrite { opcode: 7, .. })
        ));
    }
}
