//! The `config` module loads `Settings` from `config/default.*` and the
//! environment.
//!
//! Environment variables are split on `_`, so `RABBITMQ_HOST` sets
//! `rabbitmq.host` and `CONSUMER_PREFETCH` sets `consumer.prefetch`.
//! Anything not given falls back to `Settings::default()`.

mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    ConsumerSettings, LogSettings, PublisherSettings, RabbitMqSettings, Settings,
};

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Returns a `Settings` struct with the broker, consumer, publisher and log configurations
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::default().separator("_"));

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(Settings::merge(partial))
}
