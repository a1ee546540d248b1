//! Broker connection configuration.

use std::sync::Arc;

use serde::Deserialize;

use crate::broker::{Broker, ChannelHub};

/// Broker type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerType {
    /// AMQP/RabbitMQ.
    #[default]
    Amqp,
    /// In-process broker. Only peers inside the same process can talk.
    Channel,
}

/// Broker connection configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    #[serde(rename = "type")]
    pub broker_type: BrokerType,
    /// Full AMQP URL. Takes precedence over the individual fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_type: BrokerType::Amqp,
            url: None,
            host: "127.0.0.1".to_string(),
            port: 5672,
            user: "guest".to_string(),
            password: "guest".to_string(),
        }
    }
}

impl BrokerConfig {
    /// AMQP URL for the default vhost.
    pub fn amqp_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "amqp://{}:{}@{}:{}/%2f",
                self.user, self.password, self.host, self.port
            ),
        }
    }

    /// Build an unconnected broker handle of the configured type.
    ///
    /// Channel brokers attach to `hub`; AMQP brokers ignore it.
    pub fn connect(&self, hub: &ChannelHub) -> Result<Arc<dyn Broker>, ::config::ConfigError> {
        match self.broker_type {
            #[cfg(feature = "amqp")]
            BrokerType::Amqp => Ok(Arc::new(crate::broker::AmqpBroker::new(self.amqp_url()))),
            #[cfg(not(feature = "amqp"))]
            BrokerType::Amqp => Err(::config::ConfigError::Message(
                "broker type 'amqp' requires the amqp feature".to_string(),
            )),
            BrokerType::Channel => Ok(Arc::new(hub.connect())),
        }
    }
}
