//! MidiClient builder.

use std::sync::Arc;

use crate::driver::MidiDriver;
use crate::error::Result;

use super::{ClientConfig, ClientInner, MidiClient};

#[derive(Default)]
pub struct MidiClientBuilder {
    config: ClientConfig,
    driver: Option<Arc<dyn MidiDriver>>,
}

impl MidiClientBuilder {
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.config.client_name = name.into();
        self
    }

    pub fn output_port_name(mut self, name: impl Into<String>) -> Self {
        self.config.output_port_name = name.into();
        self
    }

    /// Packet list size in bytes; a single send carries at most `capacity - 14` bytes.
    pub fn packet_capacity(mut self, capacity: usize) -> Self {
        self.config.packet_capacity = capacity;
        self
    }

    pub fn log_inventory(mut self, enabled: bool) -> Self {
        self.config.log_inventory = enabled;
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `driver` instead of the platform default.
    pub fn driver(mut self, driver: Arc<dyn MidiDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn build(self) -> Result<MidiClient> {
        self.config.validate()?;

        let driver = match self.driver {
            Some(driver) => driver,
            None => default_driver(&self.config.client_name)?,
        };

        let client = MidiClient {
            inner: Arc::new(ClientInner {
                driver,
                config: self.config,
            }),
        };
        tracing::debug!("Created MIDI client '{}'", client.config().client_name);

        if client.config().log_inventory {
            client.log_inventory();
        }
        Ok(client)
    }

    /// Build and register as the process-wide client, unless one already exists
    /// (in which case the existing client is returned and this builder is discarded).
    pub fn install_shared(self) -> Result<MidiClient> {
        MidiClient::shared_with(|| self.build())
    }
}

#[cfg(feature = "midi-io")]
fn default_driver(client_name: &str) -> Result<Arc<dyn MidiDriver>> {
    let driver = crate::driver::MidirDriver::new(client_name)
        .map_err(|e| crate::error::Error::DriverUnavailable(e.to_string()))?;
    Ok(Arc::new(driver))
}

#[cfg(not(feature = "midi-io"))]
fn default_driver(_client_name: &str) -> Result<Arc<dyn MidiDriver>> {
    Ok(Arc::new(crate::driver::LoopbackDriver::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::LoopbackDriver;
    use crate::error::Error;

    #[test]
    fn test_build_with_driver() {
        let client = MidiClient::builder()
            .client_name("Test Client")
            .output_port_name("Out")
            .driver(Arc::new(LoopbackDriver::new()))
            .build()
            .unwrap();

        assert_eq!(client.config().client_name, "Test Client");
        assert_eq!(client.config().output_port_name, "Out");
        assert_eq!(client.max_send_len(), 1110);
    }

    #[test]
    fn test_invalid_capacity_fails_build() {
        let result = MidiClient::builder()
            .packet_capacity(8)
            .driver(Arc::new(LoopbackDriver::new()))
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_oversized_capacity_fails_build() {
        let result = MidiClient::builder()
            .packet_capacity(usize::MAX)
            .driver(Arc::new(LoopbackDriver::new()))
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_config_replaces_fields() {
        let config = ClientConfig {
            client_name: "Rig".to_string(),
            packet_capacity: 64,
            ..Default::default()
        };
        let client = MidiClient::builder()
            .config(config.clone())
            .driver(Arc::new(LoopbackDriver::new()))
            .build()
            .unwrap();
        assert_eq!(*client.config(), config);
        assert_eq!(client.max_send_len(), 50);
    }
}
