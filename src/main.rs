#![forbid(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use edgemetrics::buffer::MetricsBuffer;
use edgemetrics::bus::MessageSink;
use edgemetrics::bus::mqtt::MqttBus;
use edgemetrics::config::{ConnectorConfig, EdgeMetricsConfig};
use edgemetrics::ingestors::{MetricsIngestor, notification_channel, spawn_notification_worker};
use edgemetrics::publisher::{Publisher, create_backend};
use edgemetrics::scheduler::FlushScheduler;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    version,
    about = "Buffers metric data points from the edge bus and flushes them to a metrics backend"
)]
struct Cli {
    /// Settings file, read after the EDGEMETRICS_* environment variables
    #[arg(short, long, default_value = "settings.toml")]
    config: PathBuf,
}

fn main() -> Result<()> {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|e| anyhow::anyhow!("Failed to install CryptoProvider: {:?}", e))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let raw_config =
        EdgeMetricsConfig::load_or_env(&cli.config).context("Failed to load configuration")?;
    let config = Arc::new(ConnectorConfig::resolve(&raw_config));
    config.log_summary();

    let _sentry = config.sentry_dsn.as_ref().map(|dsn| {
        sentry::init((
            dsn.clone(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    // Exit the program if a panic occurs
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    // Nothing works without the bus, so connection failures end the process.
    let mut local_bus = MqttBus::connect("local", &config.bus)
        .await
        .context("Failed to connect to the local message bus")?;
    let mut shadow_bus = match (&config.shadow, config.pubsub_to_iot_core) {
        (Some(shadow), true) => Some(
            MqttBus::connect("shadow", shadow)
                .await
                .context("Failed to connect to the device shadow")?,
        ),
        _ => None,
    };

    let local_sink: Arc<dyn MessageSink> = Arc::new(local_bus.sink());
    let shadow_sink = shadow_bus
        .as_ref()
        .map(|bus| Arc::new(bus.sink()) as Arc<dyn MessageSink>);

    let buffer = Arc::new(MetricsBuffer::new(config.max_metrics_to_retain)?);

    let (notification_sender, notification_receiver) = notification_channel();
    let notification_worker = spawn_notification_worker(
        notification_receiver,
        config.output_topic.clone(),
        local_sink.clone(),
        shadow_sink,
    );

    let ingestor = Arc::new(MetricsIngestor::new(
        &config,
        buffer.clone(),
        notification_sender,
    ));
    let publisher = Arc::new(Publisher::new(&config, create_backend(&config, local_sink)));
    let scheduler = FlushScheduler::new(&config, buffer, publisher);

    local_bus
        .subscribe(&config.input_topic)
        .await
        .context("Failed to subscribe to the local input topic")?;
    if let Some(bus) = shadow_bus.as_mut() {
        bus.subscribe(&config.input_topic)
            .await
            .context("Failed to subscribe to the shadow input topic")?;
    }

    let flush_shutdown = CancellationToken::new();
    let listeners_shutdown = CancellationToken::new();

    let scheduler_handle = tokio::spawn(scheduler.run(flush_shutdown.clone()));
    let mut listeners = vec![tokio::spawn(
        local_bus.run(ingestor.clone(), listeners_shutdown.clone()),
    )];
    if let Some(bus) = shadow_bus {
        listeners.push(tokio::spawn(
            bus.run(ingestor.clone(), listeners_shutdown.clone()),
        ));
    }
    drop(ingestor);

    info!("Listening for metrics on {}", config.input_topic);
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for the shutdown signal")?;
    info!("Shutting down");

    // The final flush may publish through the bus, keep it polled until then.
    flush_shutdown.cancel();
    scheduler_handle
        .await
        .context("Flush scheduler task failed")?;
    listeners_shutdown.cancel();
    futures::future::join_all(listeners).await;

    // Listeners held the last notification senders, so the worker now stops.
    if tokio::time::timeout(Duration::from_secs(5), notification_worker)
        .await
        .is_err()
    {
        warn!("Error notification worker did not stop in time");
    }

    Ok(())
}
