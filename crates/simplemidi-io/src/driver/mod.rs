//! MIDI driver abstraction.
//!
//! Everything below the endpoint layer goes through [`MidiDriver`]: creating and
//! disposing endpoints and ports, enumerating what already exists, and moving packet
//! lists. Two implementations ship with the crate:
//!
//! - `LoopbackDriver`: in-process bus, always available
//! - `MidirDriver`: system MIDI via midir (requires the `midi-io` feature)

mod loopback;
#[cfg(feature = "midi-io")]
mod hardware;

pub use loopback::LoopbackDriver;
#[cfg(feature = "midi-io")]
pub use hardware::MidirDriver;

use crate::error::DriverError;
use crate::packet::PacketList;
use std::sync::Arc;

/// Driver-level endpoint identity (a source or a destination).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointRef(pub u64);

/// Driver-level port identity (an input or an output port).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortRef(pub u64);

/// Invoked by the driver, on a driver thread, for every delivered packet list.
pub type ReadCallback = Arc<dyn Fn(&PacketList) + Send + Sync>;

pub type DriverResult<T> = std::result::Result<T, DriverError>;

pub trait MidiDriver: Send + Sync {
    /// Publish a new source other clients can receive from.
    fn create_source(&self, name: &str) -> DriverResult<EndpointRef>;

    /// Publish a new destination; `read` receives everything sent to it.
    fn create_destination(&self, name: &str, read: ReadCallback) -> DriverResult<EndpointRef>;

    /// Once this returns, the endpoint's read callback (if any) will not be invoked again.
    /// Disposing a ref obtained from enumeration releases only what this driver holds for it.
    fn dispose_endpoint(&self, endpoint: EndpointRef);

    /// Sources in driver enumeration order.
    ///
    /// An `Err` means enumeration itself failed, which is distinct from an empty list.
    /// Whether this process's own virtual sources are listed under the ref returned by
    /// [`create_source`](Self::create_source) is driver-specific: the loopback bus does,
    /// midir lists them as ordinary system ports under a separate ref, so disposing that
    /// ref only forgets the listing and leaves the virtual source alive.
    fn sources(&self) -> DriverResult<Vec<EndpointRef>>;

    /// Destinations in driver enumeration order. Same caveats as [`sources`](Self::sources).
    fn destinations(&self) -> DriverResult<Vec<EndpointRef>>;

    fn endpoint_name(&self, endpoint: EndpointRef) -> Option<String>;

    fn create_input_port(&self, name: &str, read: ReadCallback) -> DriverResult<PortRef>;

    fn create_output_port(&self, name: &str) -> DriverResult<PortRef>;

    fn connect_source(&self, port: PortRef, source: EndpointRef) -> DriverResult<()>;

    fn disconnect_source(&self, port: PortRef, source: EndpointRef) -> DriverResult<()>;

    /// Once this returns, the port's read callback (if any) will not be invoked again.
    fn dispose_port(&self, port: PortRef);

    /// Deliver `list` to every client of a source created by [`create_source`](Self::create_source).
    fn received(&self, source: EndpointRef, list: &PacketList) -> DriverResult<()>;

    /// Send `list` to `destination` through an output port.
    fn send(&self, port: PortRef, destination: EndpointRef, list: &PacketList)
        -> DriverResult<()>;

    /// Host clock used to timestamp outgoing packets.
    fn now(&self) -> u64;
}
