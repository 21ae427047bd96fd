use super::{MessageSink, TransportError};
use crate::config::mqtt::MqttConfig;
use crate::ingestors::MetricsIngestor;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use rand::Rng;
use rand::distr::Alphanumeric;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_CHANNEL_CAPACITY: usize = 64;

fn random_client_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(18)
        .map(char::from)
        .collect()
}

fn get_client_id(config: &MqttConfig) -> String {
    config.client_id.clone().unwrap_or_else(|| {
        let mut client_id = "edgemetrics-".to_string();
        client_id.push_str(&random_client_id());
        client_id
    })
}

fn make_websocket_client_options(config: &MqttConfig, tls: bool) -> Result<MqttOptions> {
    let url = &config.url;
    let parsed_url =
        url::Url::parse(url).context(format!("Failed to parse MQTT WS URL: {}", url))?;

    let port = parsed_url.port().unwrap_or(8000);

    let mut mqtt_options = MqttOptions::new(get_client_id(config), url, port);

    if tls {
        mqtt_options.set_transport(Transport::wss_with_default_config());
    } else {
        mqtt_options.set_transport(Transport::Ws);
    }

    configure_mqtt_options(config, mqtt_options)
}

fn make_client_options(config: &MqttConfig) -> Result<MqttOptions> {
    let ws = config.url.starts_with("ws://");
    let ws_tls = config.url.starts_with("wss://");
    if ws || ws_tls {
        return make_websocket_client_options(config, ws_tls);
    }

    let mut parsed_url = url::Url::parse(&config.url)
        .with_context(|| format!("Failed to parse MQTT URL: {}", config.url))?;

    // rumqttc only reads the client id from the URL query, so a configured
    // client id has to be injected there.
    let has_client_id = parsed_url.query_pairs().any(|(key, _)| key == "client_id");
    let url = if has_client_id {
        if config.client_id.is_some() {
            bail!("client_id is not allowed in `url` when it is set in MqttConfig");
        }
        config.url.clone()
    } else {
        let mut queries = parsed_url.query_pairs_mut();
        queries.append_pair("client_id", &get_client_id(config));
        queries.finish().to_string()
    };

    let mqtt_options = MqttOptions::parse_url(url).context("Failed to parse MQTT URL")?;

    configure_mqtt_options(config, mqtt_options)
}

fn configure_mqtt_options(
    config: &MqttConfig,
    mut mqtt_options: MqttOptions,
) -> Result<MqttOptions> {
    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_seconds));

    if let Some(username) = &config.username {
        let password = config.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    Ok(mqtt_options)
}

/// Publishing handle on an MQTT connection. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MqttSink {
    client: AsyncClient,
}

#[async_trait]
impl MessageSink for MqttSink {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        tokio::time::timeout(
            SEND_TIMEOUT,
            self.client.publish(topic, QoS::AtLeastOnce, false, payload),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;
        Ok(())
    }
}

/// One MQTT connection used both to receive raw metric messages and to
/// publish outbound messages.
pub struct MqttBus {
    name: String,
    client: AsyncClient,
    event_loop: EventLoop,
    subscriptions: Vec<String>,
}

impl MqttBus {
    /// Connects and waits for the broker acknowledgement. Any failure here
    /// means the bus is unusable.
    pub async fn connect(name: &str, config: &MqttConfig) -> Result<Self, TransportError> {
        let mqtt_options = make_client_options(config)
            .map_err(|err| TransportError::InvalidOptions(format!("{:#}", err)))?;

        let (client, mut event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        let initialization_error = |reason: String| TransportError::Initialization {
            name: name.to_string(),
            reason,
        };

        tokio::time::timeout(CONNECT_TIMEOUT, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => {}
                    Err(err) => return Err(initialization_error(format!("{:?}", err))),
                }
            }
        })
        .await
        .map_err(|_| initialization_error("timed out waiting for the broker".to_string()))??;

        info!("Connected to the {} bus at {}", name, config.url);

        Ok(Self {
            name: name.to_string(),
            client,
            event_loop,
            subscriptions: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sink(&self) -> MqttSink {
        MqttSink {
            client: self.client.clone(),
        }
    }

    pub async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.client.subscribe(topic, QoS::AtMostOnce).await?;
        self.subscriptions.push(topic.to_string());
        debug!("Subscribed to {} topic: {}", self.name, topic);
        Ok(())
    }

    /// Polls the connection until shutdown, feeding every received message
    /// to the ingestor. Connection errors after startup are not fatal:
    /// rumqttc reconnects on the next poll and subscriptions are renewed.
    pub async fn run(mut self, ingestor: Arc<MetricsIngestor>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.disconnect().await;
                    break;
                }
                notification = self.event_loop.poll() => match notification {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!(
                            "Received new message on {} topic {}: {} bytes",
                            self.name,
                            publish.topic,
                            publish.payload.len()
                        );
                        // Rejections are reported by the ingestor itself.
                        let _ = ingestor.ingest_bytes(&publish.payload).await;
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Reconnected to the {} bus", self.name);
                        self.renew_subscriptions();
                    }
                    Ok(_) => {}
                    Err(err) => {
                        error!("{} bus connection error: {:?}", self.name, err);
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        }
        info!("{} bus listener stopped", self.name);
    }

    /// Queues a disconnect behind any pending publishes and keeps the event
    /// loop going until it has been written out.
    async fn disconnect(&mut self) {
        if let Err(err) = self.client.try_disconnect() {
            warn!("Failed to disconnect from the {} bus: {}", self.name, err);
            return;
        }

        let flushed = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => return Ok(()),
                    Ok(_) => {}
                    Err(err) => return Err(err),
                }
            }
        })
        .await;

        match flushed {
            Ok(Ok(())) => debug!("Disconnected from the {} bus", self.name),
            Ok(Err(err)) => warn!(
                "{} bus connection error while disconnecting: {:?}",
                self.name, err
            ),
            Err(_) => warn!(
                "Timed out flushing pending messages to the {} bus",
                self.name
            ),
        }
    }

    fn renew_subscriptions(&self) {
        for topic in &self.subscriptions {
            if let Err(err) = self.client.try_subscribe(topic.clone(), QoS::AtMostOnce) {
                warn!(
                    "Failed to renew the {} subscription to {}: {}",
                    self.name, topic, err
                );
            }
        }
    }
}
