use std::time::Duration;

use super::MqttError;
use crate::config::MqttSettings;

pub const DEFAULT_MQTT_PORT: u16 = 1883;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    /// How long a reconnect waits for the broker to accept
    pub connect_timeout: Duration,
    /// Pause between dropping an old client and creating the next
    pub reconnect_delay: Duration,
    /// Unacknowledged publishes tolerated before the bridge counts as down
    pub max_outstanding: i64,
    /// Capacity of the client request queue
    pub request_capacity: usize,
}

impl BrokerConfig {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
            max_outstanding: 16,
            request_capacity: 64,
        }
    }

    pub fn from_settings(settings: &MqttSettings) -> Result<Self, MqttError> {
        let (host, port) = parse_broker_url(&settings.url)?;
        Ok(Self::new(host, port, settings.client_id.clone()))
    }
}

// tcp://host:port, mqtt://host, or plain host[:port]
fn parse_broker_url(url: &str) -> Result<(String, u16), MqttError> {
    let invalid = || MqttError::InvalidUrl(url.to_string());
    let rest = url
        .strip_prefix("tcp://")
        .or_else(|| url.strip_prefix("mqtt://"))
        .unwrap_or(url)
        .trim_end_matches('/');

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
        None => (rest, DEFAULT_MQTT_PORT),
    };
    if host.is_empty() || host.contains('/') {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker_url() {
        assert_eq!(
            parse_broker_url("tcp://broker.local:1884").unwrap(),
            ("broker.local".to_string(), 1884)
        );
        assert_eq!(
            parse_broker_url("mqtt://10.0.0.2").unwrap(),
            ("10.0.0.2".to_string(), 1883)
        );
        assert_eq!(parse_broker_url("localhost").unwrap(), ("localhost".to_string(), 1883));
    }

    #[test]
    fn test_parse_broker_url_rejects_garbage() {
        assert!(parse_broker_url("tcp://:1883").is_err());
        assert!(parse_broker_url("tcp://host:notaport").is_err());
        assert!(parse_broker_url("ssl://host:8883").is_err());
    }

    #[test]
    fn test_from_settings_uses_client_id() {
        let settings = MqttSettings {
            url: "tcp://broker:1883".to_string(),
            topic_prefix: "flic".to_string(),
            client_id: "Flic2MQTT/1.0".to_string(),
        };
        let config = BrokerConfig::from_settings(&settings).unwrap();
        assert_eq!(config.client_id, "Flic2MQTT/1.0");
        assert_eq!(config.keep_alive, Duration::from_secs(20));
        assert_eq!(config.max_outstanding, 16);
    }
}
