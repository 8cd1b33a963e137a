//! MIDI client: the connection to the driver that every endpoint is created through.
//!
//! ## Quick Start
//!
//! ```ignore
//! use simplemidi_io::MidiClient;
//!
//! // Process-wide client, created on first use
//! let client = MidiClient::shared()?;
//!
//! let dest = client.create_destination("Test Dest")?;
//! let bytes = dest.receive();
//!
//! if let Some(output) = client.find_output("IAC Driver Bus 1")? {
//!     output.send(&[0x90, 60, 100])?;
//! }
//! ```

mod builder;
mod config;

pub use builder::MidiClientBuilder;
pub use config::ClientConfig;

use crate::driver::{EndpointRef, MidiDriver};
use crate::endpoint::{InputPort, OutputPort, VirtualDestination, VirtualSource};
use crate::error::{DriverError, Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

static SHARED: Mutex<Option<MidiClient>> = parking_lot::const_mutex(None);

/// Handle to the MIDI driver connection.
///
/// Owns no endpoints; it only carries the driver and configuration endpoints are
/// created with. Clone is cheap (Arc internally).
#[derive(Clone)]
pub struct MidiClient {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub(crate) driver: Arc<dyn MidiDriver>,
    pub(crate) config: ClientConfig,
}

/// A driver endpoint and its display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub endpoint: EndpointRef,
    pub name: Option<String>,
}

/// Snapshot of every source and destination the driver knows about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub sources: Vec<EndpointInfo>,
    pub destinations: Vec<EndpointInfo>,
}

impl MidiClient {
    pub fn builder() -> MidiClientBuilder {
        MidiClientBuilder::default()
    }

    /// The process-wide client, created with default settings on first call.
    ///
    /// A failed creation is not remembered; the next call tries again.
    pub fn shared() -> Result<MidiClient> {
        Self::shared_with(|| MidiClientBuilder::default().build())
    }

    /// The process-wide client, created with `init` if it does not exist yet.
    pub fn shared_with(init: impl FnOnce() -> Result<MidiClient>) -> Result<MidiClient> {
        let mut slot = SHARED.lock();
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = init()?;
        *slot = Some(client.clone());
        Ok(client)
    }

    pub fn ptr_eq(&self, other: &MidiClient) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn driver(&self) -> &Arc<dyn MidiDriver> {
        &self.inner.driver
    }

    /// Largest payload a single `send` accepts.
    pub fn max_send_len(&self) -> usize {
        self.inner.config.max_send_len()
    }

    // ==================== Endpoint Creation ====================

    pub fn create_source(&self, name: &str) -> Result<VirtualSource> {
        VirtualSource::create(self, name)
    }

    pub fn create_destination(&self, name: &str) -> Result<VirtualDestination> {
        VirtualDestination::create(self, name)
    }

    /// Open an input port connected to the source called `source_name`.
    ///
    /// `Ok(None)` means no such source exists; nothing was allocated.
    pub fn find_input(&self, source_name: &str) -> Result<Option<InputPort>> {
        InputPort::find(self, source_name)
    }

    /// Open an output port bound to the destination called `destination_name`.
    ///
    /// `Ok(None)` means no such destination exists; nothing was allocated.
    pub fn find_output(&self, destination_name: &str) -> Result<Option<OutputPort>> {
        OutputPort::find(self, destination_name)
    }

    // ==================== Lookup & Inventory ====================

    /// First source whose name equals `name` exactly, in driver order.
    ///
    /// `Ok(None)` means no such source; `Err` means the driver could not enumerate.
    pub fn find_source(&self, name: &str) -> Result<Option<EndpointRef>> {
        let driver = &self.inner.driver;
        let sources = driver.sources().map_err(enumeration_failed)?;
        Ok(find_by_name(driver.as_ref(), sources, name))
    }

    /// First destination whose name equals `name` exactly, in driver order.
    pub fn find_destination(&self, name: &str) -> Result<Option<EndpointRef>> {
        let driver = &self.inner.driver;
        let destinations = driver.destinations().map_err(enumeration_failed)?;
        Ok(find_by_name(driver.as_ref(), destinations, name))
    }

    pub fn source_names(&self) -> Result<Vec<String>> {
        let driver = &self.inner.driver;
        let sources = driver.sources().map_err(enumeration_failed)?;
        Ok(sources
            .into_iter()
            .filter_map(|e| driver.endpoint_name(e))
            .collect())
    }

    pub fn destination_names(&self) -> Result<Vec<String>> {
        let driver = &self.inner.driver;
        let destinations = driver.destinations().map_err(enumeration_failed)?;
        Ok(destinations
            .into_iter()
            .filter_map(|e| driver.endpoint_name(e))
            .collect())
    }

    pub fn inventory(&self) -> Result<Inventory> {
        let driver = &self.inner.driver;
        let describe = |endpoint: EndpointRef| EndpointInfo {
            endpoint,
            name: driver.endpoint_name(endpoint),
        };
        let sources = driver.sources().map_err(enumeration_failed)?;
        let destinations = driver.destinations().map_err(enumeration_failed)?;
        Ok(Inventory {
            sources: sources.into_iter().map(describe).collect(),
            destinations: destinations.into_iter().map(describe).collect(),
        })
    }

    /// Log the inventory at debug level.
    pub fn log_inventory(&self) {
        let inventory = match self.inventory() {
            Ok(inventory) => inventory,
            Err(e) => {
                warn!("Cannot list MIDI endpoints: {}", e);
                return;
            }
        };
        debug!("MIDI sources: {}", inventory.sources.len());
        for info in &inventory.sources {
            match &info.name {
                Some(name) => debug!("  source {}: {}", info.endpoint.0, name),
                None => debug!("  source {}: no name", info.endpoint.0),
            }
        }
        debug!("MIDI destinations: {}", inventory.destinations.len());
        for info in &inventory.destinations {
            match &info.name {
                Some(name) => debug!("  destination {}: {}", info.endpoint.0, name),
                None => debug!("  destination {}: no name", info.endpoint.0),
            }
        }
    }
}

impl std::fmt::Debug for MidiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiClient")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

fn enumeration_failed(e: DriverError) -> Error {
    Error::DriverUnavailable(format!("cannot enumerate MIDI endpoints: {}", e))
}

/// Linear scan, case-sensitive exact match, first hit wins.
fn find_by_name(
    driver: &dyn MidiDriver,
    candidates: Vec<EndpointRef>,
    name: &str,
) -> Option<EndpointRef> {
    candidates
        .into_iter()
        .find(|e| driver.endpoint_name(*e).as_deref() == Some(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::LoopbackDriver;

    fn client_with(driver: &Arc<LoopbackDriver>) -> MidiClient {
        MidiClient::builder()
            .driver(driver.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn test_find_source_exact_match_only() {
        let driver = Arc::new(LoopbackDriver::new());
        driver.add_source("Keyboard MIDI 1");
        let exact = driver.add_source("Keyboard");
        let client = client_with(&driver);

        assert_eq!(client.find_source("Keyboard").unwrap(), Some(exact));
        assert_eq!(client.find_source("keyboard").unwrap(), None, "case-sensitive");
        assert_eq!(client.find_source("Key").unwrap(), None, "no partial match");
    }

    #[test]
    fn test_find_first_of_duplicates() {
        let driver = Arc::new(LoopbackDriver::new());
        let first = driver.add_destination("Synth");
        driver.add_destination("Synth");
        let client = client_with(&driver);

        assert_eq!(client.find_destination("Synth").unwrap(), Some(first));
    }

    #[test]
    fn test_sources_and_destinations_not_mixed() {
        let driver = Arc::new(LoopbackDriver::new());
        driver.add_destination("Only Dest");
        let client = client_with(&driver);

        assert_eq!(client.find_source("Only Dest").unwrap(), None);
        assert!(client.find_destination("Only Dest").unwrap().is_some());
    }

    #[test]
    fn test_inventory_lists_everything() {
        let driver = Arc::new(LoopbackDriver::new());
        let a = driver.add_source("A");
        let b = driver.add_destination("B");
        let client = client_with(&driver);

        let inventory = client.inventory().unwrap();
        assert_eq!(
            inventory.sources,
            vec![EndpointInfo {
                endpoint: a,
                name: Some("A".to_string())
            }]
        );
        assert_eq!(inventory.destinations[0].endpoint, b);
        assert_eq!(client.source_names().unwrap(), vec!["A".to_string()]);
        assert_eq!(client.destination_names().unwrap(), vec!["B".to_string()]);
    }

    #[test]
    fn test_enumeration_failure_is_not_empty() {
        let driver = Arc::new(LoopbackDriver::new());
        driver.add_source("Keyboard");
        let client = client_with(&driver);
        driver.fail_enumeration(true);

        assert!(matches!(
            client.find_source("Keyboard"),
            Err(Error::DriverUnavailable(_))
        ));
        assert!(client.find_destination("Synth").is_err());
        assert!(client.source_names().is_err());
        assert!(client.inventory().is_err());
        // Logging swallows the failure
        client.log_inventory();
    }

    #[test]
    fn test_clone_shares_inner() {
        let driver = Arc::new(LoopbackDriver::new());
        let client = client_with(&driver);
        let other = client.clone();
        assert!(client.ptr_eq(&other));
        assert!(!client.ptr_eq(&client_with(&driver)));
    }
}
