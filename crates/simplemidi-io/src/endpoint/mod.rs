//! The four endpoint kinds.
//!
//! Each kind has exactly one `release` routine; both `dispose(self)` and `Drop` go
//! through it, so driver resources are torn down once and always in the same order
//! (driver endpoint/port first, local buffer last).

mod destination;
mod input;
mod output;
mod source;

pub use destination::VirtualDestination;
pub use input::InputPort;
pub use output::OutputPort;
pub use source::VirtualSource;

use crate::client::MidiClient;
use crate::error::{Error, Result};
use crate::packet::PacketList;

/// Names are handed to the driver as C strings.
pub(crate) fn check_name(name: &str) -> Result<()> {
    if name.contains('\0') {
        return Err(Error::NameEncoding {
            name: name.to_string(),
            reason: "contains a NUL character".to_string(),
        });
    }
    Ok(())
}

/// Build a one-packet list stamped with the driver clock.
///
/// The size check runs before the driver is touched.
pub(crate) fn encode_now(client: &MidiClient, data: &[u8]) -> Result<PacketList> {
    let max = client.max_send_len();
    if data.len() > max {
        return Err(Error::EncodingTooLarge {
            len: data.len(),
            max,
        });
    }
    PacketList::encode_with_capacity(data, client.driver().now(), client.config().packet_capacity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::LoopbackDriver;
    use std::sync::Arc;

    #[test]
    fn test_check_name() {
        assert!(check_name("Test Dest").is_ok());
        assert!(check_name("").is_ok());
        assert!(check_name("Gerät ♪").is_ok());
        assert!(matches!(
            check_name("bad\0name"),
            Err(Error::NameEncoding { .. })
        ));
    }

    #[test]
    fn test_encode_now_respects_client_capacity() {
        let client = MidiClient::builder()
            .packet_capacity(20)
            .driver(Arc::new(LoopbackDriver::new()))
            .build()
            .unwrap();

        assert!(encode_now(&client, &[1, 2, 3, 4, 5, 6]).is_ok());
        match encode_now(&client, &[0; 7]) {
            Err(Error::EncodingTooLarge { len, max }) => {
                assert_eq!(len, 7);
                assert_eq!(max, 6);
            }
            other => panic!("Expected EncodingTooLarge, got {:?}", other),
        }
    }
}
