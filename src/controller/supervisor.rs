use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::control_loop::{ControlError, ControlLoop};
use crate::config::Settings;
use crate::daemon::{connect, event_channel};
use crate::mqtt::ButtonPublisher;

pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// A connection that survived this long resets the backoff.
pub const HEALTHY_RUN: Duration = Duration::from_secs(60);

/// Delay before restart attempt `attempt` (1-based)
///
/// Exponential: 100ms * 2^(attempt - 1), capped at [`MAX_RETRY_DELAY`].
pub fn calculate_retry_delay(attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let shift = attempt.saturating_sub(1).min(30);
    let millis = 100u64.saturating_mul(1 << shift);
    Duration::from_millis(millis).min(MAX_RETRY_DELAY)
}

/// Keeps a control loop running against the daemon, restarting on connection loss
///
/// Only a failed command write ends the supervisor; that error is returned to the
/// caller and is fatal to the process.
pub struct Supervisor {
    settings: Settings,
    publisher: Box<dyn ButtonPublisher>,
}

impl Supervisor {
    pub fn new(settings: Settings, publisher: Box<dyn ButtonPublisher>) -> Self {
        Self {
            settings,
            publisher,
        }
    }

    pub async fn run(self) -> Result<(), ControlError> {
        let Supervisor {
            settings,
            mut publisher,
        } = self;
        let mut attempt: u32 = 0;

        loop {
            let (sender, receiver) = event_channel();
            let started = Instant::now();

            match connect(
                &settings.daemon.host,
                settings.daemon.port,
                settings.filter.clone(),
                sender,
            )
            .await
            {
                Ok((daemon, collector)) => {
                    let control = ControlLoop::create(
                        daemon,
                        publisher,
                        receiver,
                        settings.slot_table(),
                        settings.epoch_length(),
                    );
                    let fatal = control.run_until_fatal().await?;
                    collector.abort();
                    warn!(
                        "Daemon connection ended in epoch {}: {}",
                        fatal.epoch(),
                        fatal.reason()
                    );
                    publisher = fatal.into_publisher();

                    if started.elapsed() >= HEALTHY_RUN {
                        attempt = 0;
                    }
                }
                Err(e) => error!("Daemon connection failed: {}", e),
            }

            attempt = attempt.saturating_add(1);
            let delay = calculate_retry_delay(attempt);
            info!("Restarting control loop in {:?} (attempt {})", delay, attempt);
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ButtonSlot, DaemonSettings, MqttSettings};
    use crate::daemon::ButtonEventFilter;
    use crate::mqtt::TopicKind;
    use futures::future::BoxFuture;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    struct NullPublisher;

    impl ButtonPublisher for NullPublisher {
        fn is_up(&self) -> bool {
            true
        }

        fn mark_available(&mut self, _available: bool) {}

        fn write_state(&mut self, _slot: u8, _kind: TopicKind, _payload: &str) {}

        fn reconnect(&mut self) -> BoxFuture<'_, ()> {
            Box::pin(async {})
        }
    }

    fn settings(port: u16) -> Settings {
        Settings {
            daemon: DaemonSettings {
                host: "127.0.0.1".to_string(),
                port,
            },
            mqtt: MqttSettings {
                url: "tcp://127.0.0.1:1883".to_string(),
                topic_prefix: "flic".to_string(),
                client_id: "test".to_string(),
            },
            buttons: vec![ButtonSlot {
                slot: 0,
                name: "door".to_string(),
                address: None,
            }],
            filter: ButtonEventFilter::default(),
            epoch_secs: 3600,
        }
    }

    #[test]
    fn test_backoff_calculation() {
        assert_eq!(calculate_retry_delay(0), Duration::ZERO);
        assert_eq!(calculate_retry_delay(1), Duration::from_millis(100));
        assert_eq!(calculate_retry_delay(2), Duration::from_millis(200));
        assert_eq!(calculate_retry_delay(3), Duration::from_millis(400));
        assert_eq!(calculate_retry_delay(10), Duration::from_millis(51200));
        assert_eq!(calculate_retry_delay(11), MAX_RETRY_DELAY);
    }

    #[test]
    fn test_safety_overflow() {
        assert_eq!(calculate_retry_delay(u32::MAX), MAX_RETRY_DELAY);
    }

    #[tokio::test]
    async fn test_restarts_after_daemon_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let supervisor = tokio::spawn(Supervisor::new(settings(port), Box::new(NullPublisher)).run());

        for _ in 0..2 {
            let (mut daemon, _) = listener.accept().await.unwrap();
            let mut get_info = [0u8; 3];
            daemon.read_exact(&mut get_info).await.unwrap();
            assert_eq!(get_info, [0x01, 0x00, 0x00]);
            // Closing the socket kills this control loop
            drop(daemon);
        }

        supervisor.abort();
    }
}
