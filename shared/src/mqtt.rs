use serde::{Deserialize, Serialize};

/// Transport name requested from the platform when none is given.
pub const DEFAULT_TRANSPORT: &str = "mqtt";

// MQTT broker 连接配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    pub use_tls: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "mqtt.relayr.io".to_string(),
            port: 8883,
            keep_alive_secs: 60,
            use_tls: true,
        }
    }
}

impl BrokerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_broker() {
        let config = BrokerConfig::default();
        assert_eq!(config.address(), "mqtt.relayr.io:8883");
        assert_eq!(config.keep_alive_secs, 60);
        assert!(config.use_tls);
    }
}
