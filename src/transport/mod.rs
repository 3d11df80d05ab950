//! Bluetooth transport abstraction.
//!
//! Three stack variants (classic SPP, BLE GATT on trouble-host / Bluedroid,
//! NimBLE GATT) share one contract: report whether a peer is connected,
//! send a byte payload to it in order, and turn inbound writes into
//! [`HostCommand`]s.
//!
//! Stack callbacks drive the `on_*` methods from their own context (a BT
//! task or an ISR-adjacent callback), so every method takes `&self` and the
//! connection state lives in a `critical_section::Mutex`. The scheduler only
//! reads it.

pub mod gatt;
pub mod nimble;
pub mod spp;

use core::cell::Cell;

use critical_section::Mutex;

use crate::comm::parse_command;
use crate::error::{DriverError, TransportError};
use crate::protocol::HostCommand;

/// ATT header bytes subtracted from the MTU for a notification payload
pub const ATT_HEADER_LEN: usize = 3;

/// ATT MTU before any exchange (Bluetooth Core, Vol 3 Part F 3.2.8)
pub const DEFAULT_ATT_MTU: u16 = 23;

/// Stack-specific connection handle (GATT `conn_handle`, SPP `handle`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerHandle(pub u32);

/// Connection state. The handle only exists while connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected(PeerHandle),
}

/// Stack write port: deliver one chunk to a peer.
#[allow(async_fn_in_trait)]
pub trait PeerWriter {
    async fn write(&self, peer: PeerHandle, chunk: &[u8]) -> Result<(), DriverError>;

    /// Payload limit the stack reports for this peer, if it tracks one
    /// itself (e.g. a negotiated ATT MTU the callbacks never saw). When
    /// present it replaces the link's own MTU bookkeeping.
    fn max_payload(&self, _peer: PeerHandle) -> Option<usize> {
        None
    }
}

/// Where a recognized `SCAN` command is forwarded.
pub trait ScanRequestSink {
    fn request_scan(&self);
}

/// Uniform transport contract used by the cycle scheduler.
#[allow(async_fn_in_trait)]
pub trait Transport {
    fn is_connected(&self) -> bool;

    /// Send `payload` to the connected peer as in-order chunks.
    ///
    /// Fails with [`TransportError::NotConnected`] without touching the
    /// radio when no peer is connected, or when the peer leaves mid-send.
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError>;

    fn on_peer_connected(&self, handle: PeerHandle);

    fn on_peer_disconnected(&self);

    /// ATT MTU exchange result. Ignored by stream transports.
    fn on_mtu_changed(&self, _mtu: u16) {}

    /// Inbound data from the peer. Returns the command it carried, if any.
    fn on_command_received(&self, data: &[u8]) -> Option<HostCommand>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        (**self).send(payload).await
    }

    fn on_peer_connected(&self, handle: PeerHandle) {
        (**self).on_peer_connected(handle)
    }

    fn on_peer_disconnected(&self) {
        (**self).on_peer_disconnected()
    }

    fn on_mtu_changed(&self, mtu: u16) {
        (**self).on_mtu_changed(mtu)
    }

    fn on_command_received(&self, data: &[u8]) -> Option<HostCommand> {
        (**self).on_command_received(data)
    }
}

#[derive(Debug, Clone, Copy)]
struct LinkState {
    conn: ConnectionState,
    /// 0 when the link has no ATT MTU (stream transports)
    mtu: u16,
}

/// Connection bookkeeping and chunked delivery shared by every variant.
pub struct PeerLink<W, S> {
    state: Mutex<Cell<LinkState>>,
    initial_mtu: u16,
    max_chunk: usize,
    writer: W,
    requests: S,
}

impl<W: PeerWriter, S: ScanRequestSink> PeerLink<W, S> {
    /// `initial_mtu` is restored on every new connection; pass 0 for links
    /// without an ATT MTU. `max_chunk` caps every write.
    pub const fn new(writer: W, requests: S, initial_mtu: u16, max_chunk: usize) -> Self {
        Self {
            state: Mutex::new(Cell::new(LinkState {
                conn: ConnectionState::Disconnected,
                mtu: initial_mtu,
            })),
            initial_mtu,
            max_chunk,
            writer,
            requests,
        }
    }

    fn load(&self) -> LinkState {
        critical_section::with(|cs| self.state.borrow(cs).get())
    }

    pub fn state(&self) -> ConnectionState {
        self.load().conn
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ConnectionState::Connected(_))
    }

    pub fn connect(&self, handle: PeerHandle) {
        critical_section::with(|cs| {
            self.state.borrow(cs).set(LinkState {
                conn: ConnectionState::Connected(handle),
                mtu: self.initial_mtu,
            })
        });
    }

    /// Returns the handle that was dropped, if any.
    pub fn disconnect(&self) -> Option<PeerHandle> {
        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let prev = cell.get();
            cell.set(LinkState {
                conn: ConnectionState::Disconnected,
                mtu: self.initial_mtu,
            });
            match prev.conn {
                ConnectionState::Connected(handle) => Some(handle),
                ConnectionState::Disconnected => None,
            }
        })
    }

    pub fn set_mtu(&self, mtu: u16) {
        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let mut state = cell.get();
            state.mtu = mtu;
            cell.set(state);
        });
    }

    /// Largest write for `peer` right now.
    ///
    /// The stack's own payload limit wins over the tracked MTU; either way
    /// `max_chunk` caps the result.
    pub fn chunk_len(&self, peer: PeerHandle) -> usize {
        let payload = match self.writer.max_payload(peer) {
            Some(limit) => limit,
            None => match self.load().mtu {
                0 => self.max_chunk,
                mtu => usize::from(mtu).saturating_sub(ATT_HEADER_LEN),
            },
        };
        payload.min(self.max_chunk).max(1)
    }

    pub async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        let ConnectionState::Connected(peer) = self.state() else {
            return Err(TransportError::NotConnected);
        };
        let chunk_len = self.chunk_len(peer);
        for chunk in payload.chunks(chunk_len) {
            // The peer may have gone (or been replaced) while the last write was queued
            match self.state() {
                ConnectionState::Connected(current) if current == peer => {}
                ConnectionState::Connected(_) => return Err(TransportError::StaleHandle),
                ConnectionState::Disconnected => return Err(TransportError::NotConnected),
            }
            self.writer
                .write(peer, chunk)
                .await
                .map_err(TransportError::SendFailed)?;
        }
        Ok(())
    }

    pub fn handle_command(&self, data: &[u8]) -> Option<HostCommand> {
        let command = parse_command(data)?;
        match command {
            HostCommand::Scan => self.requests.request_scan(),
        }
        Some(command)
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fakes shared by the variant and scheduler tests.

    use super::*;
    use core::cell::RefCell;
    use embassy_futures::yield_now;
    use std::vec::Vec;

    /// Records every chunk written. Optionally yields after each write so a
    /// concurrent future can change the connection state mid-send.
    #[derive(Default)]
    pub struct RecordingWriter {
        pub writes: RefCell<Vec<(PeerHandle, Vec<u8>)>>,
        pub fail_with: Cell<Option<DriverError>>,
        pub yield_after_write: bool,
        pub stack_limit: Option<usize>,
    }

    impl RecordingWriter {
        pub fn joined(&self) -> Vec<u8> {
            self.writes.borrow().iter().flat_map(|(_, c)| c.iter().copied()).collect()
        }

        pub fn count(&self) -> usize {
            self.writes.borrow().len()
        }
    }

    impl PeerWriter for RecordingWriter {
        async fn write(&self, peer: PeerHandle, chunk: &[u8]) -> Result<(), DriverError> {
            if let Some(e) = self.fail_with.get() {
                return Err(e);
            }
            self.writes.borrow_mut().push((peer, chunk.to_vec()));
            if self.yield_after_write {
                yield_now().await;
            }
            Ok(())
        }

        fn max_payload(&self, _peer: PeerHandle) -> Option<usize> {
            self.stack_limit
        }
    }

    #[derive(Default)]
    pub struct CountingSink {
        pub requests: Cell<u32>,
    }

    impl ScanRequestSink for CountingSink {
        fn request_scan(&self) {
            self.requests.set(self.requests.get() + 1);
        }
    }
}
