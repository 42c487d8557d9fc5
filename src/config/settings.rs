use std::time::Duration;

use serde::Deserialize;

use crate::transport::{ConnectionParams, Credentials};

/// Top-level configuration settings for the application.
///
/// Covers the broker connection, the consumer, the publisher and logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub rabbitmq: RabbitMqSettings,
    pub consumer: ConsumerSettings,
    pub publisher: PublisherSettings,
    pub log: LogSettings,
}

/// Where and how to reach the broker.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RabbitMqSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub vhost: String,
    /// Heartbeat interval in seconds.
    pub heartbeat: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ConsumerSettings {
    pub queue: String,
    pub prefetch: u16,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PublisherSettings {
    pub exchange: String,
    pub persistent: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub rabbitmq: Option<PartialRabbitMqSettings>,
    pub consumer: Option<PartialConsumerSettings>,
    pub publisher: Option<PartialPublisherSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialRabbitMqSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub vhost: Option<String>,
    pub heartbeat: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialConsumerSettings {
    pub queue: Option<String>,
    pub prefetch: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialPublisherSettings {
    pub exchange: Option<String>,
    pub persistent: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Settings {
    /// Arguments for `Connector::connect`.
    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            host: self.rabbitmq.host.clone(),
            port: self.rabbitmq.port,
            credentials: Credentials::new(&self.rabbitmq.username, &self.rabbitmq.password),
            vhost: self.rabbitmq.vhost.clone(),
            heartbeat: Duration::from_secs(self.rabbitmq.heartbeat),
        }
    }

    /// Fills every value missing from `partial` with the default.
    pub(crate) fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let rabbitmq = partial.rabbitmq.unwrap_or_default();
        let consumer = partial.consumer.unwrap_or_default();
        let publisher = partial.publisher.unwrap_or_default();
        let log = partial.log.unwrap_or_default();

        Settings {
            rabbitmq: RabbitMqSettings {
                host: rabbitmq.host.unwrap_or(default.rabbitmq.host),
                port: rabbitmq.port.unwrap_or(default.rabbitmq.port),
                username: rabbitmq.username.unwrap_or(default.rabbitmq.username),
                password: rabbitmq.password.unwrap_or(default.rabbitmq.password),
                vhost: rabbitmq.vhost.unwrap_or(default.rabbitmq.vhost),
                heartbeat: rabbitmq.heartbeat.unwrap_or(default.rabbitmq.heartbeat),
            },
            consumer: ConsumerSettings {
                queue: consumer.queue.unwrap_or(default.consumer.queue),
                // a zero prefetch would mean "unlimited" to the broker
                prefetch: consumer
                    .prefetch
                    .filter(|p| *p > 0)
                    .unwrap_or(default.consumer.prefetch),
            },
            publisher: PublisherSettings {
                exchange: publisher.exchange.unwrap_or(default.publisher.exchange),
                persistent: publisher.persistent.unwrap_or(default.publisher.persistent),
            },
            log: LogSettings {
                level: log.level.unwrap_or(default.log.level),
            },
        }
    }
}

/// Provides default values for `Settings`.
///
/// A local broker with the stock `guest` account, one delivery at a time.
impl Default for Settings {
    fn default() -> Self {
        Self {
            rabbitmq: RabbitMqSettings {
                host: "localhost".to_string(),
                port: 5672,
                username: "guest".to_string(),
                password: "guest".to_string(),
                vhost: "/".to_string(),
                heartbeat: 60,
            },
            consumer: ConsumerSettings {
                queue: "courier_basic_queue".to_string(),
                prefetch: 1,
            },
            publisher: PublisherSettings {
                exchange: "courier_topic_exchange".to_string(),
                persistent: true,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
