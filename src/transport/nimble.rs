//! NimBLE GATT notify transport (`esp32-nimble` on ESP-IDF).
//!
//! Same service layout as [`super::gatt`], but NimBLE characteristics grow
//! to the negotiated MTU, so notifications use the full `MTU - 3` payload.

use super::{PeerHandle, PeerLink, PeerWriter, ScanRequestSink, Transport, DEFAULT_ATT_MTU};
use crate::error::TransportError;
use crate::protocol::HostCommand;

pub use super::gatt::{COMMAND_CHAR_UUID16, REPORT_CHAR_UUID16, SERVICE_UUID16};

/// BLE advertising name
pub const NIMBLE_DEVICE_NAME: &str = "ESP32C3_WIFI";

/// Largest notification payload (MTU 247 - ATT header)
pub const NIMBLE_NOTIFY_MAX: usize = 244;

pub struct NimbleGattTransport<W, S> {
    link: PeerLink<W, S>,
}

impl<W: PeerWriter, S: ScanRequestSink> NimbleGattTransport<W, S> {
    pub const fn new(writer: W, requests: S) -> Self {
        Self {
            link: PeerLink::new(writer, requests, DEFAULT_ATT_MTU, NIMBLE_NOTIFY_MAX),
        }
    }

    pub fn link(&self) -> &PeerLink<W, S> {
        &self.link
    }
}

impl<W: PeerWriter, S: ScanRequestSink> Transport for NimbleGattTransport<W, S> {
    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.link.send(payload).await
    }

    fn on_peer_connected(&self, handle: PeerHandle) {
        self.link.connect(handle);
        log::info!("NimBLE client connected (conn {})", handle.0);
    }

    fn on_peer_disconnected(&self) {
        if let Some(handle) = self.link.disconnect() {
            log::info!("NimBLE client disconnected (conn {})", handle.0);
        }
    }

    fn on_mtu_changed(&self, mtu: u16) {
        self.link.set_mtu(mtu);
        log::info!("NimBLE MTU {}", mtu);
    }

    fn on_command_received(&self, data: &[u8]) -> Option<HostCommand> {
        let command = self.link.handle_command(data);
        if command.is_some() {
            log::info!("Scan requested over NimBLE");
        }
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{CountingSink, RecordingWriter};
    use embassy_futures::block_on;

    fn transport() -> NimbleGattTransport<RecordingWriter, CountingSink> {
        NimbleGattTransport::new(RecordingWriter::default(), CountingSink::default())
    }

    #[test]
    fn default_mtu_gives_twenty_byte_chunks() {
        let t = transport();
        t.on_peer_connected(PeerHandle(0));
        assert_eq!(t.link().chunk_len(PeerHandle(0)), 20);
    }

    #[test]
    fn negotiated_mtu_widens_chunks() {
        let t = transport();
        t.on_peer_connected(PeerHandle(0));
        t.on_mtu_changed(247);
        block_on(t.send(&[b'z'; 500])).unwrap();
        let sizes: std::vec::Vec<usize> = t.link().writer().writes.borrow().iter().map(|(_, c)| c.len()).collect();
        assert_eq!(sizes, [244, 244, 12]);
    }

    #[test]
    fn host_reported_mtu_used_without_exchange_event() {
        let mut writer = RecordingWriter::default();
        writer.stack_limit = Some(244);
        let t = NimbleGattTransport::new(writer, CountingSink::default());
        t.on_peer_connected(PeerHandle(0));

        assert_eq!(t.link().chunk_len(PeerHandle(0)), 244);
        block_on(t.send(&[b'z'; 300])).unwrap();
        let sizes: std::vec::Vec<usize> = t.link().writer().writes.borrow().iter().map(|(_, c)| c.len()).collect();
        assert_eq!(sizes, [244, 56]);
    }

    #[test]
    fn oversized_mtu_capped() {
        let t = transport();
        t.on_peer_connected(PeerHandle(0));
        t.on_mtu_changed(517);
        assert_eq!(t.link().chunk_len(PeerHandle(0)), NIMBLE_NOTIFY_MAX);
    }

    #[test]
    fn shares_gatt_service_layout() {
        assert_eq!(SERVICE_UUID16, 0x00FF);
        assert_eq!(REPORT_CHAR_UUID16, 0xFF01);
        assert_eq!(COMMAND_CHAR_UUID16, 0xFF02);
    }
}
