use super::{check_name, encode_now};
use crate::client::MidiClient;
use crate::driver::EndpointRef;
use crate::error::{Error, Result};
use tracing::{debug, warn};

/// A source published by this process. Everything sent through it goes to every
/// client listening to the source.
#[derive(Debug)]
pub struct VirtualSource {
    client: MidiClient,
    endpoint: EndpointRef,
    name: String,
    released: bool,
}

impl VirtualSource {
    pub(crate) fn create(client: &MidiClient, name: &str) -> Result<Self> {
        check_name(name)?;
        let endpoint = client
            .driver()
            .create_source(name)
            .map_err(|e| Error::DriverUnavailable(format!("cannot create source '{}': {}", name, e)))?;

        debug!("Created MIDI source {}: {}", endpoint.0, name);
        Ok(Self {
            client: client.clone(),
            endpoint,
            name: name.to_string(),
            released: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> EndpointRef {
        self.endpoint
    }

    /// Send `data` as one packet timestamped now.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        let list = encode_now(&self.client, data)?;
        self.client
            .driver()
            .received(self.endpoint, &list)
            .map_err(|e| {
                warn!("MIDI send via source '{}' failed: {}", self.name, e);
                Error::SendFailed {
                    endpoint: self.name.clone(),
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
        self.client.driver().dispose_endpoint(self.endpoint);
        debug!("Disposed MIDI source {}: {}", self.endpoint.0, self.name);
    }
}

impl Drop for VirtualSource {
    fn drop(&mut self) {
        self.release();
    }
}
