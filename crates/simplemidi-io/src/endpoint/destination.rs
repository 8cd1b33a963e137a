use super::check_name;
use crate::buffer::{buffer_reader, ReceiveBuffer};
use crate::client::MidiClient;
use crate::driver::EndpointRef;
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::debug;

/// A destination published by this process. Whatever other clients send to it
/// accumulates until [`receive`](Self::receive) drains it.
#[derive(Debug)]
pub struct VirtualDestination {
    client: MidiClient,
    endpoint: EndpointRef,
    name: String,
    buffer: Arc<ReceiveBuffer>,
    released: bool,
}

impl VirtualDestination {
    pub(crate) fn create(client: &MidiClient, name: &str) -> Result<Self> {
        check_name(name)?;

        // Buffer is bound into the callback before the driver can deliver anything
        let buffer = Arc::new(ReceiveBuffer::new());
        let endpoint = client
            .driver()
            .create_destination(name, buffer_reader(&buffer))
            .map_err(|e| {
                Error::DriverUnavailable(format!("cannot create destination '{}': {}", name, e))
            })?;

        debug!("Created MIDI destination {}: {}", endpoint.0, name);
        Ok(Self {
            client: client.clone(),
            endpoint,
            name: name.to_string(),
            buffer,
            released: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> EndpointRef {
        self.endpoint
    }

    /// Everything received since the last call, in arrival order. Never blocks.
    pub fn receive(&self) -> Vec<u8> {
        self.buffer.drain_all()
    }

    /// Buffered byte count.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Unregister from the driver; unread bytes are discarded.
    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        // Endpoint first: once this returns the read callback cannot fire again.
        self.client.driver().dispose_endpoint(self.endpoint);
        let discarded = self.buffer.len();
        debug!(
            "Disposed MIDI destination {}: {} ({} unread bytes)",
            self.endpoint.0, self.name, discarded
        );
    }
}

impl Drop for VirtualDestination {
    fn drop(&mut self) {
        self.release();
    }
}
