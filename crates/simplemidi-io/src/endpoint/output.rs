use super::encode_now;
use crate::client::MidiClient;
use crate::driver::{EndpointRef, PortRef};
use crate::error::{Error, Result};
use tracing::{debug, warn};

/// An output port bound to an existing destination.
///
/// From creation on the port owns its destination reference: disposing the port
/// also disposes the destination handle it was given.
#[derive(Debug)]
pub struct OutputPort {
    client: MidiClient,
    port: PortRef,
    destination: EndpointRef,
    destination_name: String,
    released: bool,
}

impl OutputPort {
    pub(crate) fn find(client: &MidiClient, destination_name: &str) -> Result<Option<Self>> {
        let Some(destination) = client.find_destination(destination_name)? else {
            debug!("No MIDI destination named '{}'", destination_name);
            return Ok(None);
        };
        debug!("Found MIDI output {}: {}", destination.0, destination_name);

        // On failure the destination reference is simply dropped; it was never ours.
        let port = client
            .driver()
            .create_output_port(&client.config().output_port_name)
            .map_err(|e| {
                warn!("MIDI output port for '{}' failed: {}", destination_name, e);
                Error::PortCreateFailed {
                    endpoint: destination_name.to_string(),
                    reason: e.to_string(),
                }
            })?;

        Ok(Some(Self {
            client: client.clone(),
            port,
            destination,
            destination_name: destination_name.to_string(),
            released: false,
        }))
    }

    pub fn destination_name(&self) -> &str {
        &self.destination_name
    }

    pub fn destination(&self) -> EndpointRef {
        self.destination
    }

    pub fn port(&self) -> PortRef {
        self.port
    }

    /// Send `data` to the destination as one packet timestamped now.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        let list = encode_now(&self.client, data)?;
        self.client
            .driver()
            .send(self.port, self.destination, &list)
            .map_err(|e| {
                warn!("MIDI send to '{}' failed: {}", self.destination_name, e);
                Error::SendFailed {
                    endpoint: self.destination_name.clone(),
                    reason: e.to_string(),
                }
            })
    }

    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        let driver = self.client.driver();
        driver.dispose_port(self.port);
        driver.dispose_endpoint(self.destination);
        debug!("Disposed MIDI output for '{}'", self.destination_name);
    }
}

impl Drop for OutputPort {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::LoopbackDriver;
    use std::sync::Arc;

    fn setup() -> (Arc<LoopbackDriver>, MidiClient) {
        let driver = Arc::new(LoopbackDriver::new());
        let client = MidiClient::builder()
            .driver(driver.clone())
            .build()
            .unwrap();
        (driver, client)
    }

    #[test]
    fn test_find_missing_destination() {
        let (driver, client) = setup();
        assert!(client.find_output("Nonexistent Device").unwrap().is_none());
        assert_eq!(driver.open_ports(), 0);
    }

    #[test]
    fn test_send_reaches_destination() {
        let (driver, client) = setup();
        let dest = driver.add_destination("Synth");
        let output = client.find_output("Synth").unwrap().unwrap();

        assert_eq!(output.destination(), dest);
        assert_eq!(driver.port_name(output.port()).as_deref(), Some("OuTpUt"));

        output.send(&[0x90, 60, 100]).unwrap();
        output.send(&[0x80, 60, 0]).unwrap();
        assert_eq!(driver.take_captured(dest), vec![0x90, 60, 100, 0x80, 60, 0]);
    }

    #[test]
    fn test_port_create_failure_leaves_destination() {
        let (driver, client) = setup();
        let dest = driver.add_destination("Synth");
        driver.fail_output_ports(true);

        match client.find_output("Synth") {
            Err(Error::PortCreateFailed { endpoint, .. }) => assert_eq!(endpoint, "Synth"),
            other => panic!("Expected PortCreateFailed, got {:?}", other),
        }
        assert_eq!(driver.open_ports(), 0);
        assert!(driver.has_endpoint(dest));
    }

    #[test]
    fn test_enumeration_failure_is_an_error() {
        let (driver, client) = setup();
        let dest = driver.add_destination("Synth");
        driver.fail_enumeration(true);

        assert!(matches!(
            client.find_output("Synth"),
            Err(Error::DriverUnavailable(_))
        ));
        assert_eq!(driver.open_ports(), 0);
        assert!(driver.has_endpoint(dest));
    }

    #[test]
    fn test_oversized_send() {
        let (driver, client) = setup();
        driver.add_destination("Synth");
        let output = client.find_output("Synth").unwrap().unwrap();

        assert!(matches!(
            output.send(&vec![0; 2000]),
            Err(Error::EncodingTooLarge { .. })
        ));
        assert_eq!(driver.send_count(), 0);
    }

    #[test]
    fn test_send_failure() {
        let (driver, client) = setup();
        driver.add_destination("Synth");
        let output = client.find_output("Synth").unwrap().unwrap();
        driver.fail_sends(true);

        assert!(matches!(
            output.send(&[0xFA]),
            Err(Error::SendFailed { .. })
        ));
    }

    #[test]
    fn test_dispose_releases_port_and_destination() {
        let (driver, client) = setup();
        let dest = driver.add_destination("Synth");
        let output = client.find_output("Synth").unwrap().unwrap();

        output.dispose();
        assert_eq!(driver.open_ports(), 0);
        assert!(!driver.has_endpoint(dest));
    }
}
