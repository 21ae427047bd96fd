use anyhow::Error;
use confique::Config;
use serde::Deserialize;
use std::{path::Path, time::Duration};
use tracing::{info, warn};

use self::mqtt::MqttConfig;
pub mod mqtt;

pub const DEFAULT_PUBLISH_REGION: &str = "us-east-1";
pub const DEFAULT_PUBLISH_INTERVAL_SECONDS: u64 = 10;
pub const MAX_PUBLISH_INTERVAL_SECONDS: u64 = 900;
pub const DEFAULT_MAX_METRICS: usize = 5000;
pub const MIN_MAX_METRICS: usize = 2000;
pub const DEFAULT_INPUT_TOPIC: &str = "cloudwatch/metric/put";
pub const DEFAULT_OUTPUT_TOPIC: &str = "cloudwatch/metric/put/status";
pub const DEFAULT_DEVICE_NAME: &str = "edge-device";
pub const DEFAULT_PUBLISH_TIMEOUT_SECONDS: u64 = 10;

/// A setting as written by the operator. Numbers and flags may arrive as
/// strings (environment) or typed values (TOML), and bad values must not
/// abort startup, so they are interpreted later.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawSetting {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl RawSetting {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RawSetting::Integer(value) => Some(*value),
            RawSetting::Float(value) if value.is_finite() => Some(value.trunc() as i64),
            RawSetting::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            RawSetting::Bool(value) => value.to_string(),
            RawSetting::Integer(value) => value.to_string(),
            RawSetting::Float(value) => value.to_string(),
            RawSetting::Text(text) => text.clone(),
        }
    }

    /// Anything starting with `true`, ignoring case, enables the flag.
    pub fn is_true(&self) -> bool {
        match self {
            RawSetting::Bool(value) => *value,
            other => other.as_text().trim().to_ascii_lowercase().starts_with("true"),
        }
    }
}

#[derive(Debug, Config)]
pub struct EdgeMetricsConfig {
    #[config(env = "EDGEMETRICS_PUBLISH_REGION")]
    pub publish_region: Option<String>,

    #[config(env = "EDGEMETRICS_PUBLISH_INTERVAL")]
    pub publish_interval: Option<RawSetting>,

    #[config(env = "EDGEMETRICS_MAX_METRICS_TO_RETAIN")]
    pub max_metrics_to_retain: Option<RawSetting>,

    #[config(env = "EDGEMETRICS_INPUT_TOPIC")]
    pub input_topic: Option<String>,

    #[config(env = "EDGEMETRICS_OUTPUT_TOPIC")]
    pub output_topic: Option<String>,

    #[config(env = "EDGEMETRICS_PUBSUB_TO_IOT_CORE")]
    pub pubsub_to_iot_core: Option<RawSetting>,

    #[config(env = "EDGEMETRICS_DEVICE_NAME")]
    pub device_name: Option<String>,

    #[config(env = "EDGEMETRICS_BUS_URL", default = "mqtt://127.0.0.1:1883")]
    pub bus_url: String,
    #[config(env = "EDGEMETRICS_BUS_USERNAME")]
    pub bus_username: Option<String>,
    #[config(env = "EDGEMETRICS_BUS_PASSWORD")]
    pub bus_password: Option<String>,

    #[config(env = "EDGEMETRICS_SHADOW_URL")]
    pub shadow_url: Option<String>,
    #[config(env = "EDGEMETRICS_SHADOW_USERNAME")]
    pub shadow_username: Option<String>,
    #[config(env = "EDGEMETRICS_SHADOW_PASSWORD")]
    pub shadow_password: Option<String>,

    #[config(env = "EDGEMETRICS_BACKEND", default = "log")]
    pub backend: String,

    #[config(env = "EDGEMETRICS_BACKEND_TOPIC", default = "metrics/publish")]
    pub backend_topic: String,

    #[config(env = "EDGEMETRICS_PUBLISH_TIMEOUT")]
    pub publish_timeout: Option<RawSetting>,

    #[config(env = "EDGEMETRICS_SENTRY_DSN")]
    pub sentry_dsn: Option<String>,
}

impl EdgeMetricsConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<EdgeMetricsConfig, Error> {
        let c = EdgeMetricsConfig::builder()
            .env()
            .file(path.as_ref())
            .load()?;

        Ok(c)
    }

    /// Configuration problems are never fatal: a settings file that cannot
    /// be read is skipped and the environment alone is used.
    pub fn load_or_env(path: impl AsRef<Path>) -> Result<EdgeMetricsConfig, Error> {
        match Self::load(path.as_ref()) {
            Ok(config) => Ok(config),
            Err(err) => {
                warn!(
                    "Failed to load {}, using the environment only: {:#}",
                    path.as_ref().display(),
                    err
                );
                Ok(EdgeMetricsConfig::builder().env().load()?)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Logs every chunk, nothing leaves the device.
    Log,
    /// Publishes every chunk as JSON on the local bus.
    Mqtt,
}

/// Immutable process configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub publish_region: String,
    pub publish_interval: Duration,
    pub max_metrics_to_retain: usize,
    pub input_topic: String,
    pub output_topic: String,
    /// Mirror subscriptions and error notifications on the device-shadow
    /// connection.
    pub pubsub_to_iot_core: bool,
    pub device_name: String,
    pub bus: MqttConfig,
    pub shadow: Option<MqttConfig>,
    pub backend: BackendKind,
    pub backend_topic: String,
    pub publish_timeout: Duration,
    pub sentry_dsn: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn env_non_empty(key: &str) -> Option<String> {
    non_empty(&std::env::var(key).ok())
}

fn resolve_publish_interval(raw: &Option<RawSetting>) -> Duration {
    let seconds = match raw {
        None => DEFAULT_PUBLISH_INTERVAL_SECONDS,
        Some(setting) => match setting.as_i64() {
            None => {
                warn!(
                    "Invalid PublishInterval type. Using the default PublishInterval value: {}",
                    DEFAULT_PUBLISH_INTERVAL_SECONDS
                );
                DEFAULT_PUBLISH_INTERVAL_SECONDS
            }
            Some(seconds) if seconds <= 0 => {
                warn!(
                    "Invalid PublishInterval value. Using the default PublishInterval value: {}",
                    DEFAULT_PUBLISH_INTERVAL_SECONDS
                );
                DEFAULT_PUBLISH_INTERVAL_SECONDS
            }
            Some(seconds) if (seconds as u64) > MAX_PUBLISH_INTERVAL_SECONDS => {
                warn!(
                    "PublishInterval can not be more than {} seconds, setting it to max value",
                    MAX_PUBLISH_INTERVAL_SECONDS
                );
                MAX_PUBLISH_INTERVAL_SECONDS
            }
            Some(seconds) => seconds as u64,
        },
    };
    Duration::from_secs(seconds)
}

fn resolve_max_metrics(raw: &Option<RawSetting>) -> usize {
    match raw {
        None => DEFAULT_MAX_METRICS,
        Some(setting) => match setting.as_i64() {
            None => {
                warn!(
                    "Invalid MaxMetricsToRetain type. Using the default MaxMetricsToRetain value: {}",
                    DEFAULT_MAX_METRICS
                );
                DEFAULT_MAX_METRICS
            }
            Some(max) if max < MIN_MAX_METRICS as i64 => {
                warn!(
                    "MaxMetricsToRetain can not be less than {} metrics, setting it to least value",
                    MIN_MAX_METRICS
                );
                MIN_MAX_METRICS
            }
            Some(max) => max as usize,
        },
    }
}

fn resolve_publish_timeout(raw: &Option<RawSetting>) -> Duration {
    let seconds = match raw.as_ref().map(RawSetting::as_i64) {
        None => DEFAULT_PUBLISH_TIMEOUT_SECONDS,
        Some(Some(seconds)) if seconds > 0 => seconds as u64,
        Some(_) => {
            warn!(
                "Invalid PublishTimeout value. Using the default PublishTimeout value: {}",
                DEFAULT_PUBLISH_TIMEOUT_SECONDS
            );
            DEFAULT_PUBLISH_TIMEOUT_SECONDS
        }
    };
    Duration::from_secs(seconds)
}

fn resolve_backend(raw: &str) -> BackendKind {
    match raw.trim().to_ascii_lowercase().as_str() {
        "log" => BackendKind::Log,
        "mqtt" => BackendKind::Mqtt,
        other => {
            warn!("Unknown metrics backend ({}), using the log backend", other);
            BackendKind::Log
        }
    }
}

impl ConnectorConfig {
    pub fn resolve(raw: &EdgeMetricsConfig) -> ConnectorConfig {
        let publish_region = non_empty(&raw.publish_region)
            .or_else(|| env_non_empty("AWS_REGION"))
            .unwrap_or_else(|| DEFAULT_PUBLISH_REGION.to_string());

        let device_name = non_empty(&raw.device_name)
            .or_else(|| env_non_empty("AWS_IOT_THING_NAME"))
            .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string());

        let bus = MqttConfig {
            username: non_empty(&raw.bus_username),
            password: raw.bus_password.clone(),
            client_id: Some(format!("edgemetrics-{}", device_name)),
            ..MqttConfig::new(raw.bus_url.trim())
        };

        let shadow = non_empty(&raw.shadow_url).map(|url| MqttConfig {
            username: non_empty(&raw.shadow_username),
            password: raw.shadow_password.clone(),
            client_id: Some(device_name.clone()),
            ..MqttConfig::new(url)
        });

        let mut pubsub_to_iot_core = raw
            .pubsub_to_iot_core
            .as_ref()
            .map(RawSetting::is_true)
            .unwrap_or(false);
        if pubsub_to_iot_core && shadow.is_none() {
            warn!("PubSubToIoTCore is enabled but no shadow URL is configured, disabling it");
            pubsub_to_iot_core = false;
        }

        ConnectorConfig {
            publish_region,
            publish_interval: resolve_publish_interval(&raw.publish_interval),
            max_metrics_to_retain: resolve_max_metrics(&raw.max_metrics_to_retain),
            input_topic: non_empty(&raw.input_topic)
                .unwrap_or_else(|| DEFAULT_INPUT_TOPIC.to_string()),
            output_topic: non_empty(&raw.output_topic)
                .unwrap_or_else(|| DEFAULT_OUTPUT_TOPIC.to_string()),
            pubsub_to_iot_core,
            device_name,
            bus,
            shadow,
            backend: resolve_backend(&raw.backend),
            backend_topic: raw.backend_topic.clone(),
            publish_timeout: resolve_publish_timeout(&raw.publish_timeout),
            sentry_dsn: non_empty(&raw.sentry_dsn),
        }
    }

    pub fn log_summary(&self) {
        info!("Using Configuration:");
        info!("PublishRegion: {}", self.publish_region);
        info!("PublishInterval: {}", self.publish_interval.as_secs());
        info!("MaxMetricsToRetain: {}", self.max_metrics_to_retain);
        info!("InputTopic: {}", self.input_topic);
        info!("OutputTopic: {}", self.output_topic);
        info!("PubSubToIoTCore: {}", self.pubsub_to_iot_core);
        info!("DeviceName: {}", self.device_name);
        info!("Backend: {:?}", self.backend);
    }
}
