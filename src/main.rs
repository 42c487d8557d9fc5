//! CLI for courier
//!
//! Subcommands:
//! - `demo`: publish the sample messages to an in-memory broker and consume them
//! - `publish`: send the sample task messages to the basic queue
//! - `topic-publish`: send the analytics/notification/event samples to the topic exchange
//! - `consume`: consume the basic queue until Ctrl-C or SIGTERM
//!
//! `publish`, `topic-publish` and `consume` talk to RabbitMQ and need the
//! `amqp` feature.

use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use courier::config::{Settings, load_config};
use courier::consumer::{Consumer, ConsumerOptions, ConsumerStats, json_handler};
use courier::publisher::Publisher;
use courier::routing::TopicPattern;
use courier::samples::{self, TaskMessage};
use courier::transport::{
    BrokerChannel, Connector, DEFAULT_EXCHANGE, ExchangeKind, ExchangeSpec, MemoryBroker, Topology,
};
use courier::utils::error::ConnectionError;
use courier::utils::logging;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "courier")]
enum Command {
    /// Run publisher and consumer against an in-memory broker
    Demo {
        /// Multiplier applied to the simulated processing time
        #[arg(long, default_value_t = 0.1)]
        work_scale: f64,
    },
    /// Send the sample task messages to the basic queue
    Publish {
        /// Pause between messages, in milliseconds
        #[arg(long, default_value_t = 500)]
        pause_ms: u64,
    },
    /// Send the sample analytics, notification and event messages to the topic exchange
    TopicPublish {
        /// Pause between messages, in milliseconds
        #[arg(long, default_value_t = 0)]
        pause_ms: u64,
    },
    /// Consume the basic queue until Ctrl-C or SIGTERM
    Consume {
        /// Topic pattern to bind the queue with on the topic exchange (repeatable)
        #[arg(long = "bind")]
        patterns: Vec<String>,
        /// Multiplier applied to the simulated processing time
        #[arg(long, default_value_t = 1.0)]
        work_scale: f64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cmd = Command::parse();

    dotenvy::dotenv().ok();
    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.log.level);

    let result = match cmd {
        Command::Demo { work_scale } => run_demo(&settings, work_scale).await,
        Command::Publish { pause_ms } => match live_connector() {
            Ok(connector) => run_publish(&connector, &settings, pause_ms).await,
            Err(e) => Err(e),
        },
        Command::TopicPublish { pause_ms } => match live_connector() {
            Ok(connector) => run_topic_publish(&connector, &settings, pause_ms).await,
            Err(e) => Err(e),
        },
        Command::Consume {
            patterns,
            work_scale,
        } => match live_connector() {
            Ok(connector) => run_consume(&connector, &settings, &patterns, work_scale).await,
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("courier failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(feature = "amqp")]
fn live_connector() -> Result<courier::transport::amqp::AmqpConnector, Box<dyn Error>> {
    Ok(courier::transport::amqp::AmqpConnector)
}

#[cfg(not(feature = "amqp"))]
fn live_connector() -> Result<MemoryBroker, Box<dyn Error>> {
    Err("this command needs a RabbitMQ broker; rebuild with `--features amqp`".into())
}

async fn connect<K: Connector>(
    connector: &K,
    settings: &Settings,
) -> Result<Arc<K::Channel>, ConnectionError> {
    let params = settings.connection_params();
    info!(host = %params.host, port = params.port, vhost = %params.vhost, "Connecting to broker");
    match connector.connect(&params).await {
        Ok(channel) => Ok(Arc::new(channel)),
        Err(e) => {
            error!(host = %params.host, port = params.port, "Connection failed: {}", e);
            Err(e)
        }
    }
}

async fn run_demo(settings: &Settings, work_scale: f64) -> Result<(), Box<dyn Error>> {
    let broker = MemoryBroker::new();
    let queue = settings.consumer.queue.clone();

    let producer = connect(&broker, settings).await?;
    Topology::basic(queue.as_str())
        .declare(producer.as_ref())
        .await?;
    let publisher = Publisher::new(producer, DEFAULT_EXCHANGE);
    let envelopes = samples::basic_envelopes(&queue, settings.publisher.persistent)?;
    let sent = publisher.publish_all(envelopes, Duration::ZERO).await?;
    info!(queue = %queue, sent, "Sample messages published");

    let handler = json_handler(move |task: TaskMessage| samples::process_task(task, work_scale));
    let options = ConsumerOptions::new(queue.as_str()).with_prefetch(settings.consumer.prefetch);
    let handle = Consumer::new(connect(&broker, settings).await?, handler, options).spawn();

    let drained = async {
        while broker.delivered_count() < sent as u64
            || broker.queue_depth(&queue) != Some(0)
            || broker.unacked_count() > 0
        {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    tokio::select! {
        _ = drained => info!(queue = %queue, "Queue drained"),
        _ = shutdown_signal() => {}
    }

    let stats = handle.stop().await?;
    log_stats(&queue, &stats);
    Ok(())
}

async fn run_publish<K: Connector>(
    connector: &K,
    settings: &Settings,
    pause_ms: u64,
) -> Result<(), Box<dyn Error>> {
    let queue = &settings.consumer.queue;
    let channel = connect(connector, settings).await?;
    Topology::basic(queue.as_str())
        .declare(channel.as_ref())
        .await?;

    let publisher = Publisher::new(Arc::clone(&channel), DEFAULT_EXCHANGE);
    let envelopes = samples::basic_envelopes(queue, settings.publisher.persistent)?;
    let result = publisher
        .publish_all(envelopes, Duration::from_millis(pause_ms))
        .await;
    close(channel.as_ref()).await;

    let sent = result?;
    info!(queue = %queue, sent, "All messages sent successfully");
    Ok(())
}

async fn run_topic_publish<K: Connector>(
    connector: &K,
    settings: &Settings,
    pause_ms: u64,
) -> Result<(), Box<dyn Error>> {
    let exchange = &settings.publisher.exchange;
    let channel = connect(connector, settings).await?;
    Topology::topic(exchange.as_str())
        .declare(channel.as_ref())
        .await?;

    let publisher = Publisher::new(Arc::clone(&channel), exchange.as_str());
    let envelopes = samples::topic_envelopes(settings.publisher.persistent)?;
    let result = publisher
        .publish_all(envelopes, Duration::from_millis(pause_ms))
        .await;
    close(channel.as_ref()).await;

    let sent = result?;
    info!(exchange = %exchange, sent, "All topic exchange messages sent successfully");
    Ok(())
}

async fn run_consume<K: Connector>(
    connector: &K,
    settings: &Settings,
    patterns: &[String],
    work_scale: f64,
) -> Result<(), Box<dyn Error>> {
    let queue = &settings.consumer.queue;
    let exchange = &settings.publisher.exchange;
    let channel = connect(connector, settings).await?;

    let mut topology = Topology::basic(queue.as_str());
    let mut options =
        ConsumerOptions::new(queue.as_str()).with_prefetch(settings.consumer.prefetch);
    if !patterns.is_empty() {
        topology = topology.exchange(ExchangeSpec::new(exchange.as_str(), ExchangeKind::Topic));
        for pattern in patterns {
            options = options.bind(exchange.as_str(), TopicPattern::parse(pattern)?);
        }
    }
    topology.declare(channel.as_ref()).await?;

    let handler = json_handler(move |task: TaskMessage| samples::process_task(task, work_scale));
    let handle = Consumer::new(channel, handler, options).spawn();
    info!(queue = %queue, "Waiting for messages, press Ctrl+C to exit");

    shutdown_signal().await;
    let stats = handle.stop().await?;
    log_stats(queue, &stats);
    Ok(())
}

async fn close<C: BrokerChannel>(channel: &C) {
    if let Err(e) = channel.close().await {
        error!("Error closing connection: {}", e);
    } else {
        info!("Connection closed successfully");
    }
}

fn log_stats(queue: &str, stats: &ConsumerStats) {
    info!(
        queue = %queue,
        received = stats.received,
        acked = stats.acked,
        requeued = stats.requeued,
        discarded = stats.discarded,
        "Consumer statistics"
    );
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received, shutting down gracefully");
}
