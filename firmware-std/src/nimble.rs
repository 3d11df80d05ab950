//! NimBLE GATT server (`esp32-nimble`).
//!
//! NimBLE callbacks run on the host task and feed the transport directly.
//! Advertising restarts after a disconnect only while it is allowed, so a
//! serialized scan is never raced by the stack.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use esp32_nimble::utilities::mutex::Mutex;
use esp32_nimble::utilities::BleUuid;
use esp32_nimble::{BLEAdvertisementData, BLECharacteristic, BLEDevice, BLEError, NimbleProperties};

use scanlink::error::DriverError;
use scanlink::radio::BluetoothRadio;
use scanlink::transport::nimble::{
    NimbleGattTransport, COMMAND_CHAR_UUID16, NIMBLE_DEVICE_NAME, REPORT_CHAR_UUID16, SERVICE_UUID16,
};
use scanlink::transport::{PeerHandle, PeerWriter, Transport, ATT_HEADER_LEN};

use crate::ScanRequestSender;

pub type NimbleTransport = NimbleGattTransport<CharacteristicNotifier, ScanRequestSender>;

/// Whether advertising may run
static ADVERTISING_ALLOWED: AtomicBool = AtomicBool::new(true);

fn nimble_failure(e: BLEError) -> anyhow::Error {
    anyhow::anyhow!("NimBLE setup failed: {:?}", e)
}

fn ble_error(e: BLEError) -> DriverError {
    log::debug!("NimBLE: {:?}", e);
    DriverError::FAIL
}

/// Notifies one connection on the report characteristic.
pub struct CharacteristicNotifier {
    characteristic: Arc<Mutex<BLECharacteristic>>,
}

impl PeerWriter for CharacteristicNotifier {
    async fn write(&self, peer: PeerHandle, chunk: &[u8]) -> Result<(), DriverError> {
        self.characteristic
            .lock()
            .notify_with(chunk, peer.0 as u16)
            .map_err(ble_error)
    }

    fn max_payload(&self, peer: PeerHandle) -> Option<usize> {
        // 0 when the connection is unknown to the host
        let mtu = unsafe { esp_idf_svc::sys::ble_att_mtu(peer.0 as u16) } as usize;
        (mtu > ATT_HEADER_LEN).then(|| mtu - ATT_HEADER_LEN)
    }
}

fn start_advertising() -> Result<(), DriverError> {
    BLEDevice::take().get_advertising().lock().start().map_err(ble_error)
}

/// Bring up the GATT server and return the transport it feeds.
///
/// Advertising starts right away when `advertise` is set; otherwise it
/// waits for the first `resume_advertising`.
pub fn start(requests: ScanRequestSender, advertise: bool) -> anyhow::Result<&'static NimbleTransport> {
    ADVERTISING_ALLOWED.store(advertise, Ordering::Release);

    let ble_device = BLEDevice::take();
    BLEDevice::set_device_name(NIMBLE_DEVICE_NAME).map_err(nimble_failure)?;
    let server = ble_device.get_server();
    server.advertise_on_disconnect(false);

    let service_uuid = BleUuid::from_uuid16(SERVICE_UUID16);
    let service = server.create_service(service_uuid);
    let report_char = service.lock().create_characteristic(
        BleUuid::from_uuid16(REPORT_CHAR_UUID16),
        NimbleProperties::READ | NimbleProperties::NOTIFY,
    );
    let command_char = service
        .lock()
        .create_characteristic(BleUuid::from_uuid16(COMMAND_CHAR_UUID16), NimbleProperties::WRITE);

    let transport: &'static NimbleTransport = Box::leak(Box::new(NimbleGattTransport::new(
        CharacteristicNotifier {
            characteristic: report_char,
        },
        requests,
    )));

    server.on_connect(move |_server, desc| {
        transport.on_peer_connected(PeerHandle(desc.conn_handle() as u32));
    });
    server.on_disconnect(move |_desc, _reason| {
        transport.on_peer_disconnected();
        if ADVERTISING_ALLOWED.load(Ordering::Acquire) {
            if let Err(e) = start_advertising() {
                log::error!("BLE re-advertise failed: {}", e);
            }
        }
    });
    command_char.lock().on_write(move |args| {
        transport.on_command_received(args.recv_data());
    });

    let mut adv_data = BLEAdvertisementData::new();
    adv_data.name(NIMBLE_DEVICE_NAME).add_service_uuid(service_uuid);
    ble_device
        .get_advertising()
        .lock()
        .set_data(&mut adv_data)
        .map_err(nimble_failure)?;

    if advertise {
        ble_device.get_advertising().lock().start().map_err(nimble_failure)?;
        log::info!("BLE advertising as '{}'", NIMBLE_DEVICE_NAME);
    }
    Ok(transport)
}

/// Advertising control for the radio manager.
pub struct NimbleAdvertising {
    transport: &'static NimbleTransport,
}

impl NimbleAdvertising {
    pub fn new(transport: &'static NimbleTransport) -> Self {
        Self { transport }
    }
}

impl BluetoothRadio for NimbleAdvertising {
    async fn pause_advertising(&mut self) -> Result<(), DriverError> {
        ADVERTISING_ALLOWED.store(false, Ordering::Release);
        let advertising = BLEDevice::take().get_advertising();
        let mut advertising = advertising.lock();
        if advertising.is_advertising() {
            advertising.stop().map_err(ble_error)?;
        }
        Ok(())
    }

    async fn resume_advertising(&mut self) -> Result<(), DriverError> {
        ADVERTISING_ALLOWED.store(true, Ordering::Release);
        // A connected central keeps the only slot; disconnect restarts it
        if self.transport.is_connected() {
            return Ok(());
        }
        start_advertising()?;
        log::info!("BLE advertising as '{}'", NIMBLE_DEVICE_NAME);
        Ok(())
    }
}
