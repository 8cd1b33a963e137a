//! Receive buffer shared between a driver callback and the consumer.
//!
//! - Producer: driver read callback (any thread), appends whole packet lists
//! - Consumer: endpoint owner, drains everything on `receive()`

use crate::packet::PacketList;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ReceiveBuffer {
    bytes: Mutex<Vec<u8>>,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.bytes.lock().extend_from_slice(data);
    }

    /// Append every packet of `list` under a single lock acquisition, so a
    /// concurrent drain never observes half a delivery.
    pub fn append_list(&self, list: &PacketList) {
        let mut bytes = self.bytes.lock();
        list.decode_into(&mut bytes);
    }

    /// Take all buffered bytes, leaving the buffer empty.
    pub fn drain_all(&self) -> Vec<u8> {
        std::mem::take(&mut *self.bytes.lock())
    }

    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.lock().is_empty()
    }
}

/// Driver read callback that decodes into `buffer`.
pub(crate) fn buffer_reader(buffer: &Arc<ReceiveBuffer>) -> crate::driver::ReadCallback {
    let buffer = Arc::clone(buffer);
    Arc::new(move |list: &PacketList| buffer.append_list(list))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_drain_empty() {
        let buffer = ReceiveBuffer::new();
        assert!(buffer.drain_all().is_empty());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_append_then_drain_clears() {
        let buffer = ReceiveBuffer::new();
        buffer.append(&[0x90, 0x40]);
        buffer.append(&[0x7F]);
        assert_eq!(buffer.len(), 3);

        assert_eq!(buffer.drain_all(), vec![0x90, 0x40, 0x7F]);
        assert!(buffer.drain_all().is_empty());
    }

    #[test]
    fn test_append_list_keeps_packet_order() {
        let buffer = ReceiveBuffer::new();
        let mut list = PacketList::default();
        list.push(0, &[0x90, 60, 100]).unwrap();
        list.push(1, &[0x80, 60, 0]).unwrap();

        buffer.append(&[0xFE]);
        buffer.append_list(&list);
        assert_eq!(buffer.drain_all(), vec![0xFE, 0x90, 60, 100, 0x80, 60, 0]);
    }

    #[test]
    fn test_reader_callback_feeds_buffer() {
        let buffer = Arc::new(ReceiveBuffer::new());
        let reader = buffer_reader(&buffer);

        reader(&PacketList::encode(&[0xB0, 7, 127], 0).unwrap());
        assert_eq!(buffer.drain_all(), vec![0xB0, 7, 127]);
    }

    #[test]
    fn test_concurrent_append_and_drain_loses_nothing() {
        const BATCHES: usize = 2000;
        let buffer = Arc::new(ReceiveBuffer::new());

        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for i in 0..BATCHES {
                    let b = (i % 128) as u8;
                    buffer.append(&[0x90, b, 0x7F]);
                }
            })
        };

        let mut collected = Vec::new();
        while !producer.is_finished() {
            collected.extend(buffer.drain_all());
        }
        producer.join().unwrap();
        collected.extend(buffer.drain_all());

        let expected: Vec<u8> = (0..BATCHES)
            .flat_map(|i| [0x90, (i % 128) as u8, 0x7F])
            .collect();
        assert_eq!(collected, expected);
    }
}
