//! Classic Bluetooth SPP transport (Bluedroid on ESP32).
//!
//! SPP is a byte stream: no MTU, just the stack's per-write limit. Terminal
//! apps on the other end usually send `SCAN` followed by CR/LF.

use super::{PeerHandle, PeerLink, PeerWriter, ScanRequestSink, Transport};
use crate::error::TransportError;
use crate::protocol::HostCommand;

/// Bluetooth device name and SPP server name
pub const SPP_SERVER_NAME: &str = "ESP32-WIFI-Scanner";

/// Largest single `esp_spp_write` payload (L2CAP MTU 990)
pub const SPP_MAX_WRITE: usize = 990;

pub struct ClassicSppTransport<W, S> {
    link: PeerLink<W, S>,
}

impl<W: PeerWriter, S: ScanRequestSink> ClassicSppTransport<W, S> {
    pub const fn new(writer: W, requests: S) -> Self {
        Self {
            link: PeerLink::new(writer, requests, 0, SPP_MAX_WRITE),
        }
    }

    pub fn link(&self) -> &PeerLink<W, S> {
        &self.link
    }
}

impl<W: PeerWriter, S: ScanRequestSink> Transport for ClassicSppTransport<W, S> {
    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.link.send(payload).await
    }

    fn on_peer_connected(&self, handle: PeerHandle) {
        self.link.connect(handle);
        log::info!("SPP client connected (handle {})", handle.0);
    }

    fn on_peer_disconnected(&self) {
        if let Some(handle) = self.link.disconnect() {
            log::info!("SPP client disconnected (handle {})", handle.0);
        }
    }

    fn on_command_received(&self, data: &[u8]) -> Option<HostCommand> {
        let command = self.link.handle_command(data);
        match command {
            Some(_) => log::info!("Scan requested over SPP"),
            None => log::debug!("Ignoring {} bytes of SPP data", data.len()),
        }
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{CountingSink, RecordingWriter};
    use embassy_futures::block_on;

    fn transport() -> ClassicSppTransport<RecordingWriter, CountingSink> {
        ClassicSppTransport::new(RecordingWriter::default(), CountingSink::default())
    }

    #[test]
    fn full_report_fits_one_write() {
        let t = transport();
        t.on_peer_connected(PeerHandle(0x81));
        block_on(t.send(&[b'r'; 512])).unwrap();
        assert_eq!(t.link().writer().count(), 1);
        assert_eq!(t.link().writer().writes.borrow()[0].0, PeerHandle(0x81));
    }

    #[test]
    fn mtu_events_are_ignored() {
        let t = transport();
        t.on_peer_connected(PeerHandle(1));
        t.on_mtu_changed(23);
        assert_eq!(t.link().chunk_len(PeerHandle(1)), SPP_MAX_WRITE);
    }

    #[test]
    fn terminal_line_endings_accepted() {
        let t = transport();
        assert_eq!(t.on_command_received(b"SCAN\r\n"), Some(HostCommand::Scan));
        assert_eq!(t.on_command_received(b"help\r\n"), None);
    }

    #[test]
    fn send_without_peer_fails_fast() {
        let t = transport();
        assert_eq!(block_on(t.send(b"report")), Err(TransportError::NotConnected));
        assert_eq!(t.link().writer().count(), 0);
    }
}
