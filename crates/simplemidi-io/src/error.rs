//! Error types for the MIDI I/O subsystem.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("MIDI driver unavailable: {0}")]
    DriverUnavailable(String),

    #[error("Endpoint name {name:?} cannot be passed to the driver: {reason}")]
    NameEncoding { name: String, reason: String },

    #[error("Failed to connect input port to source '{source_name}': {reason}")]
    ConnectFailed { source_name: String, reason: String },

    #[error("Failed to create MIDI port for '{endpoint}': {reason}")]
    PortCreateFailed { endpoint: String, reason: String },

    #[error("MIDI payload of {len} bytes exceeds packet capacity of {max} bytes")]
    EncodingTooLarge { len: usize, max: usize },

    #[error("Unable to send MIDI data to '{endpoint}': {reason}")]
    SendFailed { endpoint: String, reason: String },

    #[error("Malformed packet list: {0}")]
    MalformedPacketList(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

/// Failure reported by a [`MidiDriver`](crate::MidiDriver) call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DriverError(pub String);

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[cfg(feature = "midi-io")]
impl From<midir::InitError> for DriverError {
    fn from(e: midir::InitError) -> Self {
        DriverError(e.to_string())
    }
}

#[cfg(feature = "midi-io")]
impl From<midir::ConnectError<midir::MidiOutput>> for DriverError {
    fn from(e: midir::ConnectError<midir::MidiOutput>) -> Self {
        DriverError(e.to_string())
    }
}

#[cfg(feature = "midi-io")]
impl From<midir::ConnectError<midir::MidiInput>> for DriverError {
    fn from(e: midir::ConnectError<midir::MidiInput>) -> Self {
        DriverError(e.to_string())
    }
}

#[cfg(feature = "midi-io")]
impl From<midir::SendError> for DriverError {
    fn from(e: midir::SendError) -> Self {
        DriverError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
