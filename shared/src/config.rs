use crate::mqtt::BrokerConfig;
use config::{Config, ConfigError, Environment, File};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

// SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SdkConfig {
    pub api: String,
    pub client_name: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_keep_alive_secs: u64,
    pub mqtt_tls: bool,
    pub request_timeout_secs: u64,
}

impl Default for SdkConfig {
    fn default() -> Self {
        let broker = BrokerConfig::default();
        Self {
            api: "https://api.relayr.io".to_string(),
            client_name: "io.relayr.sdk.rust".to_string(),
            mqtt_host: broker.host,
            mqtt_port: broker.port,
            mqtt_keep_alive_secs: broker.keep_alive_secs,
            mqtt_tls: broker.use_tls,
            request_timeout_secs: 30,
        }
    }
}

impl SdkConfig {
    pub fn broker(&self) -> BrokerConfig {
        BrokerConfig {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            keep_alive_secs: self.mqtt_keep_alive_secs,
            use_tls: self.mqtt_tls,
        }
    }
}

/// Loads configuration from defaults, `config/relayr.*` and `RELAYR_*`
/// environment variables, in increasing order of precedence.
pub fn load_config() -> Result<SdkConfig, ConfigError> {
    // 加载 .env 文件
    dotenv().ok();

    build_config(Path::new("config/relayr"), Environment::with_prefix("RELAYR"))
}

/// Same as [`load_config`] but reads the file layer from `path` and the
/// environment layer from `vars` instead of the process environment.
pub fn load_config_from(
    path: &Path,
    vars: HashMap<String, String>,
) -> Result<SdkConfig, ConfigError> {
    build_config(path, Environment::with_prefix("RELAYR").source(Some(vars)))
}

fn build_config(path: &Path, environment: Environment) -> Result<SdkConfig, ConfigError> {
    let defaults = SdkConfig::default();

    let settings = Config::builder()
        .set_default("api", defaults.api)?
        .set_default("client_name", defaults.client_name)?
        .set_default("mqtt_host", defaults.mqtt_host)?
        .set_default("mqtt_port", defaults.mqtt_port as i64)?
        .set_default("mqtt_keep_alive_secs", defaults.mqtt_keep_alive_secs as i64)?
        .set_default("mqtt_tls", defaults.mqtt_tls)?
        .set_default("request_timeout_secs", defaults.request_timeout_secs as i64)?
        // 可选配置文件
        .add_source(File::from(path).required(false))
        // 环境变量，RELAYR_ 前缀
        .add_source(environment.try_parsing(true))
        .build()?;

    let config: SdkConfig = settings.try_deserialize()?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &SdkConfig) -> Result<(), ConfigError> {
    if config.api.trim().is_empty() {
        return Err(ConfigError::Message("API url cannot be empty".to_string()));
    }

    if config.mqtt_host.trim().is_empty() {
        return Err(ConfigError::Message("MQTT host cannot be empty".to_string()));
    }

    if config.mqtt_port == 0 {
        return Err(ConfigError::Message("MQTT port cannot be 0".to_string()));
    }

    if config.mqtt_keep_alive_secs < 5 {
        return Err(ConfigError::Message(
            "MQTT keep alive must be at least 5 seconds".to_string(),
        ));
    }

    Ok(())
}
