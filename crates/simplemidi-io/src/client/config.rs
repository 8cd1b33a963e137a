//! Client configuration.

use crate::error::{Error, Result};
use crate::packet::{max_packet_data, MAX_PACKET_LIST_CAPACITY, PACKET_LIST_CAPACITY};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Name the client registers with the MIDI driver.
    pub client_name: String,
    /// Name given to output ports opened by `find_output`.
    pub output_port_name: String,
    /// Size in bytes of outgoing packet lists; bounds a single send.
    pub packet_capacity: usize,
    /// Log every source and destination at debug level when the client is built.
    pub log_inventory: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: "simple core midi client".to_string(),
            output_port_name: "OuTpUt".to_string(),
            packet_capacity: PACKET_LIST_CAPACITY,
            log_inventory: false,
        }
    }
}

impl ClientConfig {
    /// Largest payload accepted by `send`.
    pub fn max_send_len(&self) -> usize {
        max_packet_data(self.packet_capacity)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_send_len() == 0 {
            return Err(Error::InvalidConfig(format!(
                "packet capacity {} leaves no room for MIDI data",
                self.packet_capacity
            )));
        }
        if self.packet_capacity > MAX_PACKET_LIST_CAPACITY {
            return Err(Error::InvalidConfig(format!(
                "packet capacity {} exceeds the largest usable capacity of {}",
                self.packet_capacity, MAX_PACKET_LIST_CAPACITY
            )));
        }
        if self.client_name.is_empty() {
            return Err(Error::InvalidConfig("client name is empty".to_string()));
        }
        Ok(())
    }
}
