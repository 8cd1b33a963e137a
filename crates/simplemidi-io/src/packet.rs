//! Packet lists: the driver's unit of delivery.
//!
//! A packet list is a bounded byte buffer laid out as
//!
//! ```text
//! u32 packet_count
//! repeat packet_count:
//!     u64 timestamp
//!     u16 length
//!     [u8; length] data
//! ```
//!
//! All integers are little-endian. The buffer never grows past the capacity it was
//! created with; adding a packet that would not fit is rejected with
//! [`Error::EncodingTooLarge`] instead of being truncated.

use crate::error::{Error, Result};

/// Default packet list capacity in bytes (1024 bytes of MIDI plus 100 bytes of headroom).
pub const PACKET_LIST_CAPACITY: usize = 1024 + 100;

pub(crate) const LIST_HEADER_LEN: usize = 4;
pub(crate) const PACKET_HEADER_LEN: usize = 8 + 2;

/// Largest capacity a one-packet list can make use of.
pub const MAX_PACKET_LIST_CAPACITY: usize = LIST_HEADER_LEN + PACKET_HEADER_LEN + u16::MAX as usize;

/// Largest payload a single send can carry with the default capacity.
pub const MAX_PACKET_DATA: usize = max_packet_data(PACKET_LIST_CAPACITY);

/// Largest payload one packet can carry in a list of `capacity` bytes.
pub const fn max_packet_data(capacity: usize) -> usize {
    let overhead = LIST_HEADER_LEN + PACKET_HEADER_LEN;
    let room = if capacity > overhead {
        capacity - overhead
    } else {
        0
    };
    if room > u16::MAX as usize {
        u16::MAX as usize
    } else {
        room
    }
}

/// One timestamped group of raw MIDI bytes inside a [`PacketList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    pub timestamp: u64,
    pub data: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketList {
    buf: Vec<u8>,
    capacity: usize,
}

impl PacketList {
    /// Empty list bounded to `capacity` bytes. Storage grows on demand up to the bound.
    pub fn new(capacity: usize) -> Self {
        let mut buf = Vec::with_capacity(capacity.clamp(LIST_HEADER_LEN, PACKET_LIST_CAPACITY));
        buf.extend_from_slice(&0u32.to_le_bytes());
        Self { buf, capacity }
    }

    /// Encode `data` as a single packet tagged with `timestamp`, using the default capacity.
    pub fn encode(data: &[u8], timestamp: u64) -> Result<Self> {
        Self::encode_with_capacity(data, timestamp, PACKET_LIST_CAPACITY)
    }

    pub fn encode_with_capacity(data: &[u8], timestamp: u64, capacity: usize) -> Result<Self> {
        let mut list = Self::new(capacity);
        list.push(timestamp, data)?;
        Ok(list)
    }

    /// Append one packet. Fails without modifying the list if it would not fit.
    pub fn push(&mut self, timestamp: u64, data: &[u8]) -> Result<()> {
        let needed = self.buf.len() + PACKET_HEADER_LEN + data.len();
        if needed > self.capacity || data.len() > u16::MAX as usize {
            return Err(Error::EncodingTooLarge {
                len: data.len(),
                max: self.remaining_data(),
            });
        }

        self.buf.extend_from_slice(&timestamp.to_le_bytes());
        self.buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
        self.buf.extend_from_slice(data);

        let count = self.len() as u32 + 1;
        self.buf[..LIST_HEADER_LEN].copy_from_slice(&count.to_le_bytes());
        Ok(())
    }

    /// Number of packets in the list.
    pub fn len(&self) -> usize {
        read_u32(&self.buf, 0).unwrap_or(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Payload bytes the next packet could still carry.
    pub fn remaining_data(&self) -> usize {
        self.capacity
            .saturating_sub(self.buf.len() + PACKET_HEADER_LEN)
            .min(u16::MAX as usize)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Parse a serialized list, validating every header against the buffer length.
    pub fn from_bytes(bytes: &[u8], capacity: usize) -> Result<Self> {
        if bytes.len() > capacity {
            return Err(Error::MalformedPacketList(format!(
                "{} bytes exceeds capacity {}",
                bytes.len(),
                capacity
            )));
        }
        let count = read_u32(bytes, 0)
            .ok_or_else(|| Error::MalformedPacketList("missing packet count".to_string()))?;

        let mut offset = LIST_HEADER_LEN;
        for index in 0..count {
            let (_, next) = read_packet(bytes, offset).ok_or_else(|| {
                Error::MalformedPacketList(format!("packet {} truncated at byte {}", index, offset))
            })?;
            offset = next;
        }
        if offset != bytes.len() {
            return Err(Error::MalformedPacketList(format!(
                "{} trailing bytes after {} packets",
                bytes.len() - offset,
                count
            )));
        }

        Ok(Self {
            buf: bytes.to_vec(),
            capacity,
        })
    }

    pub fn packets(&self) -> Packets<'_> {
        Packets {
            buf: &self.buf,
            offset: LIST_HEADER_LEN,
            remaining: self.len(),
        }
    }

    /// Append every packet's data, in list order, to `out`.
    pub fn decode_into(&self, out: &mut Vec<u8>) {
        for packet in self.packets() {
            out.extend_from_slice(packet.data);
        }
    }

    pub fn decode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.buf.len());
        self.decode_into(&mut out);
        out
    }
}

impl Default for PacketList {
    fn default() -> Self {
        Self::new(PACKET_LIST_CAPACITY)
    }
}

pub struct Packets<'a> {
    buf: &'a [u8],
    offset: usize,
    remaining: usize,
}

impl<'a> Iterator for Packets<'a> {
    type Item = Packet<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let (packet, next) = read_packet(self.buf, self.offset)?;
        self.offset = next;
        self.remaining -= 1;
        Some(packet)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes(raw.try_into().ok()?))
}

fn read_packet(bytes: &[u8], at: usize) -> Option<(Packet<'_>, usize)> {
    let ts = bytes.get(at..at + 8)?;
    let timestamp = u64::from_le_bytes(ts.try_into().ok()?);
    let len = bytes.get(at + 8..at + PACKET_HEADER_LEN)?;
    let len = u16::from_le_bytes(len.try_into().ok()?) as usize;
    let start = at + PACKET_HEADER_LEN;
    let data = bytes.get(start..start + len)?;
    Some((Packet { timestamp, data }, start + len))
}
