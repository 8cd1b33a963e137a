//! Host-side MIDI I/O.
//!
//! Creates virtual sources and destinations, opens ports on existing endpoints, buffers
//! inbound bytes delivered by driver callbacks, and packs outbound bytes into
//! timestamped packet lists.
//!
//! The free functions operate on the process-wide [`MidiClient`]; the same operations
//! exist as methods for explicitly built clients.
//!
//! Feature gates: `midi-io` (system MIDI through midir; without it the default driver is
//! the in-process [`LoopbackDriver`]).

pub mod error;
pub use error::{DriverError, Error, Result};

mod buffer;
pub use buffer::ReceiveBuffer;

pub mod packet;
pub use packet::{
    Packet, PacketList, MAX_PACKET_DATA, MAX_PACKET_LIST_CAPACITY, PACKET_LIST_CAPACITY,
};

pub mod driver;
pub use driver::{EndpointRef, LoopbackDriver, MidiDriver, PortRef, ReadCallback};

#[cfg(feature = "midi-io")]
pub use driver::MidirDriver;

mod client;
pub use client::{ClientConfig, EndpointInfo, Inventory, MidiClient, MidiClientBuilder};

mod endpoint;
pub use endpoint::{InputPort, OutputPort, VirtualDestination, VirtualSource};

/// Create a virtual source on the shared client.
pub fn create_source(name: &str) -> Result<VirtualSource> {
    MidiClient::shared()?.create_source(name)
}

/// Create a virtual destination on the shared client.
pub fn create_destination(name: &str) -> Result<VirtualDestination> {
    MidiClient::shared()?.create_destination(name)
}

/// Open an input port on the source named `source_name`; `Ok(None)` if there is none.
pub fn find_input(source_name: &str) -> Result<Option<InputPort>> {
    MidiClient::shared()?.find_input(source_name)
}

/// Open an output port to the destination named `destination_name`; `Ok(None)` if there is none.
pub fn find_output(destination_name: &str) -> Result<Option<OutputPort>> {
    MidiClient::shared()?.find_output(destination_name)
}
