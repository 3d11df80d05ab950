//! BLE GATT notify transport (trouble-host on esp-hal, Bluedroid on ESP-IDF).
//!
//! The report goes out as notifications on a fixed-size characteristic, so
//! a chunk never exceeds the characteristic value size even after an MTU
//! exchange. Clients reassemble until they see the footer line.

use super::{PeerHandle, PeerLink, PeerWriter, ScanRequestSink, Transport, DEFAULT_ATT_MTU};
use crate::error::TransportError;
use crate::protocol::HostCommand;

/// BLE advertising name
pub const GATT_DEVICE_NAME: &str = "ESP32C3_WIFI_SCANNER";

/// Scan service, 16-bit UUID
pub const SERVICE_UUID16: u16 = 0x00FF;
/// Report characteristic (read, notify)
pub const REPORT_CHAR_UUID16: u16 = 0xFF01;
/// Command characteristic (write)
pub const COMMAND_CHAR_UUID16: u16 = 0xFF02;

/// Report characteristic value size, and so the largest notification
pub const GATT_NOTIFY_MAX: usize = 20;

/// GATT transport over any notify-capable stack.
pub struct BleGattTransport<W, S> {
    link: PeerLink<W, S>,
}

impl<W: PeerWriter, S: ScanRequestSink> BleGattTransport<W, S> {
    pub const fn new(writer: W, requests: S) -> Self {
        Self {
            link: PeerLink::new(writer, requests, DEFAULT_ATT_MTU, GATT_NOTIFY_MAX),
        }
    }

    pub fn link(&self) -> &PeerLink<W, S> {
        &self.link
    }
}

impl<W: PeerWriter, S: ScanRequestSink> Transport for BleGattTransport<W, S> {
    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.link.send(payload).await
    }

    fn on_peer_connected(&self, handle: PeerHandle) {
        self.link.connect(handle);
        log::info!("BLE client connected (conn {})", handle.0);
    }

    fn on_peer_disconnected(&self) {
        if let Some(handle) = self.link.disconnect() {
            log::info!("BLE client disconnected (conn {})", handle.0);
        }
    }

    fn on_mtu_changed(&self, mtu: u16) {
        self.link.set_mtu(mtu);
        log::debug!("ATT MTU now {}", mtu);
    }

    fn on_command_received(&self, data: &[u8]) -> Option<HostCommand> {
        let command = self.link.handle_command(data);
        if command.is_some() {
            log::info!("Scan requested over BLE");
        }
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{CountingSink, RecordingWriter};
    use embassy_futures::block_on;

    fn transport() -> BleGattTransport<RecordingWriter, CountingSink> {
        BleGattTransport::new(RecordingWriter::default(), CountingSink::default())
    }

    #[test]
    fn notifications_are_twenty_bytes() {
        let t = transport();
        t.on_peer_connected(PeerHandle(1));
        block_on(t.send(&[b'a'; 45])).unwrap();
        let sizes: std::vec::Vec<usize> = t.link().writer().writes.borrow().iter().map(|(_, c)| c.len()).collect();
        assert_eq!(sizes, [20, 20, 5]);
    }

    #[test]
    fn larger_mtu_stays_capped_by_characteristic() {
        let t = transport();
        t.on_peer_connected(PeerHandle(1));
        t.on_mtu_changed(185);
        assert_eq!(t.link().chunk_len(PeerHandle(1)), GATT_NOTIFY_MAX);
    }

    #[test]
    fn disconnect_clears_connection() {
        let t = transport();
        t.on_peer_connected(PeerHandle(1));
        assert!(t.is_connected());
        t.on_peer_disconnected();
        assert!(!t.is_connected());
        assert_eq!(block_on(t.send(b"x")), Err(TransportError::NotConnected));
    }

    #[test]
    fn command_write_requests_scan() {
        let t = transport();
        assert_eq!(t.on_command_received(b"SCAN"), Some(HostCommand::Scan));
        assert_eq!(t.on_command_received(b"SCAN!"), None);
    }
}
