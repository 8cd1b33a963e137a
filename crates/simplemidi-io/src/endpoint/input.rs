use crate::buffer::{buffer_reader, ReceiveBuffer};
use crate::client::MidiClient;
use crate::driver::{EndpointRef, PortRef};
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// An input port connected to an existing source. The source itself belongs to
/// someone else and is never disposed from here.
#[derive(Debug)]
pub struct InputPort {
    client: MidiClient,
    port: PortRef,
    source: EndpointRef,
    source_name: String,
    buffer: Arc<ReceiveBuffer>,
    released: bool,
}

impl InputPort {
    pub(crate) fn find(client: &MidiClient, source_name: &str) -> Result<Option<Self>> {
        let Some(source) = client.find_source(source_name)? else {
            debug!("No MIDI source named '{}'", source_name);
            return Ok(None);
        };
        debug!("Found MIDI input {}: {}", source.0, source_name);

        let driver = client.driver();
        let buffer = Arc::new(ReceiveBuffer::new());
        let port = driver
            .create_input_port(source_name, buffer_reader(&buffer))
            .map_err(|e| Error::PortCreateFailed {
                endpoint: source_name.to_string(),
                reason: e.to_string(),
            })?;

        if let Err(e) = driver.connect_source(port, source) {
            warn!("MIDI port connect to '{}' failed: {}", source_name, e);
            // Roll back: the port goes first, the buffer drops with this scope
            driver.dispose_port(port);
            return Err(Error::ConnectFailed {
                source_name: source_name.to_string(),
                reason: e.to_string(),
            });
        }

        Ok(Some(Self {
            client: client.clone(),
            port,
            source,
            source_name: source_name.to_string(),
            buffer,
            released: false,
        }))
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn source(&self) -> EndpointRef {
        self.source
    }

    pub fn port(&self) -> PortRef {
        self.port
    }

    /// Everything received since the last call, in arrival order. Never blocks.
    pub fn receive(&self) -> Vec<u8> {
        self.buffer.drain_all()
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        let driver = self.client.driver();
        if let Err(e) = driver.disconnect_source(self.port, self.source) {
            debug!("Disconnect from '{}' failed: {}", self.source_name, e);
        }
        driver.dispose_port(self.port);
        debug!("Disposed MIDI input for '{}'", self.source_name);
    }
}

impl Drop for InputPort {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::LoopbackDriver;

    fn setup() -> (Arc<LoopbackDriver>, MidiClient) {
        let driver = Arc::new(LoopbackDriver::new());
        let client = MidiClient::builder()
            .driver(driver.clone())
            .build()
            .unwrap();
        (driver, client)
    }

    #[test]
    fn test_find_missing_source_allocates_nothing() {
        let (driver, client) = setup();
        driver.add_source("Keyboard");

        assert!(client.find_input("Nonexistent Device").unwrap().is_none());
        assert_eq!(driver.open_ports(), 0);
    }

    #[test]
    fn test_find_connects_and_receives() {
        let (driver, client) = setup();
        let source = driver.add_source("Keyboard");

        let input = client.find_input("Keyboard").unwrap().unwrap();
        assert_eq!(input.source(), source);
        assert_eq!(driver.connections(input.port()), vec![source]);
        assert_eq!(driver.port_name(input.port()).as_deref(), Some("Keyboard"));

        driver.emit(source, &[0x90, 60, 100]).unwrap();
        driver.emit(source, &[0x80, 60, 0]).unwrap();
        assert_eq!(input.receive(), vec![0x90, 60, 100, 0x80, 60, 0]);
        assert!(input.receive().is_empty());
    }

    #[test]
    fn test_connect_failure_rolls_back() {
        let (driver, client) = setup();
        driver.add_source("Keyboard");
        driver.fail_connects(true);

        match client.find_input("Keyboard") {
            Err(Error::ConnectFailed { source_name, .. }) => assert_eq!(source_name, "Keyboard"),
            other => panic!("Expected ConnectFailed, got {:?}", other),
        }
        assert_eq!(driver.open_ports(), 0, "port must be released");
    }

    #[test]
    fn test_port_create_failure() {
        let (driver, client) = setup();
        driver.add_source("Keyboard");
        driver.fail_input_ports(true);

        assert!(matches!(
            client.find_input("Keyboard"),
            Err(Error::PortCreateFailed { .. })
        ));
        assert_eq!(driver.open_ports(), 0);
    }

    #[test]
    fn test_enumeration_failure_is_an_error() {
        let (driver, client) = setup();
        driver.add_source("Keyboard");
        driver.fail_enumeration(true);

        assert!(matches!(
            client.find_input("Keyboard"),
            Err(Error::DriverUnavailable(_))
        ));
        assert_eq!(driver.open_ports(), 0);
    }

    #[test]
    fn test_dispose_leaves_source_alone() {
        let (driver, client) = setup();
        let source = driver.add_source("Keyboard");
        let input = client.find_input("Keyboard").unwrap().unwrap();

        input.dispose();
        assert_eq!(driver.open_ports(), 0);
        assert!(driver.has_endpoint(source));
        assert_eq!(driver.emit(source, &[0xF8]).unwrap(), 0);
    }
}
