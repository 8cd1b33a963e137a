//! # simplemidi - Host-side MIDI I/O
//!
//! Virtual MIDI endpoints, ports on existing devices, and the buffered handoff between
//! driver callbacks and the application.
//!
//! ## Architecture
//!
//! simplemidi is an umbrella crate over:
//! - **simplemidi-io** - Client context, receive buffers, packet lists, endpoints, drivers
//!
//! ## Quick Start
//!
//! ```ignore
//! use simplemidi::prelude::*;
//!
//! // Publish a destination other apps can send to
//! let dest = create_destination("Test Dest")?;
//!
//! // Talk to an existing device
//! if let Some(output) = find_output("IAC Driver Bus 1")? {
//!     output.send(&[0x90, 60, 100])?;
//! }
//!
//! // Later: poll what arrived
//! let bytes = dest.receive();
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - System MIDI driver
//! - `midi-io` - midir-backed driver (CoreMIDI, ALSA, WinMM); without it the default
//!   driver is the in-process loopback bus

/// Re-export of simplemidi-io for direct access
pub use simplemidi_io as io;

// Client
pub use simplemidi_io::{ClientConfig, EndpointInfo, Inventory, MidiClient, MidiClientBuilder};

// Endpoints
pub use simplemidi_io::{InputPort, OutputPort, VirtualDestination, VirtualSource};

// Packets and buffers
pub use simplemidi_io::{
    Packet, PacketList, ReceiveBuffer, MAX_PACKET_DATA, MAX_PACKET_LIST_CAPACITY,
    PACKET_LIST_CAPACITY,
};

// Drivers
pub use simplemidi_io::{EndpointRef, LoopbackDriver, MidiDriver, PortRef, ReadCallback};

#[cfg(feature = "midi-io")]
pub use simplemidi_io::MidirDriver;

// Error
pub use simplemidi_io::{DriverError, Error, Result};

// Shared-client operations
pub use simplemidi_io::{create_destination, create_source, find_input, find_output};

/// Convenience prelude for common imports
pub mod prelude {
    pub use crate::{
        create_destination, create_source, find_input, find_output, InputPort, MidiClient,
        OutputPort, VirtualDestination, VirtualSource,
    };

    pub use crate::{Error, Result};
}
