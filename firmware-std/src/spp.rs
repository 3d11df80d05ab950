//! Classic Bluetooth SPP server on Bluedroid (ESP32 only).
//!
//! `esp-idf-svc` brings up the controller and Bluedroid in classic mode;
//! SPP itself goes through the raw `esp_spp_*` API. Bluedroid runs the
//! callback on its own task, which is the only writer of the transport's
//! connection state.

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use esp_idf_svc::bt::{BtClassic, BtDriver};
use esp_idf_svc::hal::modem::BluetoothModem;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sys::*;

use scanlink::error::DriverError;
use scanlink::radio::BluetoothRadio;
use scanlink::transport::spp::{ClassicSppTransport, SPP_SERVER_NAME};
use scanlink::transport::{PeerHandle, PeerWriter, Transport};

use crate::wifi::esp_code;
use crate::ScanRequestSender;

pub type SppTransport = ClassicSppTransport<SppWriter, ScanRequestSender>;

/// Longest wait for the link to leave congestion before a write
const CONGESTION_TIMEOUT: Duration = Duration::from_secs(2);

static TRANSPORT: OnceLock<&'static SppTransport> = OnceLock::new();
static SERVER_NAME: OnceLock<CString> = OnceLock::new();

/// Whether the device may be discoverable
static DISCOVERABLE_ALLOWED: AtomicBool = AtomicBool::new(true);

/// Set while L2CAP reports congestion on the open channel
static CONGESTED: AtomicBool = AtomicBool::new(false);

/// Writes to an open SPP channel.
pub struct SppWriter;

impl PeerWriter for SppWriter {
    async fn write(&self, peer: PeerHandle, chunk: &[u8]) -> Result<(), DriverError> {
        let started = Instant::now();
        while CONGESTED.load(Ordering::Acquire) {
            if started.elapsed() > CONGESTION_TIMEOUT {
                return Err(DriverError::TIMEOUT);
            }
            thread::sleep(Duration::from_millis(10));
        }
        // esp_spp_write copies the data before returning
        esp!(unsafe { esp_spp_write(peer.0, chunk.len() as i32, chunk.as_ptr() as *mut u8) }).map_err(esp_code)
    }
}

fn set_discoverable(discoverable: bool) -> Result<(), DriverError> {
    let (connection, discovery) = if discoverable {
        (
            esp_bt_connection_mode_t_ESP_BT_CONNECTABLE,
            esp_bt_discovery_mode_t_ESP_BT_GENERAL_DISCOVERABLE,
        )
    } else {
        (
            esp_bt_connection_mode_t_ESP_BT_NON_CONNECTABLE,
            esp_bt_discovery_mode_t_ESP_BT_NON_DISCOVERABLE,
        )
    };
    esp!(unsafe { esp_bt_gap_set_scan_mode(connection, discovery) }).map_err(esp_code)
}

unsafe extern "C" fn spp_callback(event: esp_spp_cb_event_t, param: *mut esp_spp_cb_param_t) {
    let Some(transport) = TRANSPORT.get() else {
        return;
    };
    let param = unsafe { &*param };

    #[allow(non_upper_case_globals)]
    match event {
        esp_spp_cb_event_t_ESP_SPP_INIT_EVT => {
            let status = unsafe { param.init.status };
            if status != esp_spp_status_t_ESP_SPP_SUCCESS {
                log::error!("SPP init failed: status {}", status);
                return;
            }
            let Some(name) = SERVER_NAME.get() else {
                return;
            };
            let started = unsafe {
                esp_spp_start_srv(
                    ESP_SPP_SEC_NONE as esp_spp_sec_t,
                    esp_spp_role_t_ESP_SPP_ROLE_SLAVE,
                    0,
                    name.as_ptr(),
                )
            };
            if let Err(e) = esp!(started) {
                log::error!("SPP server start failed: {}", e);
            }
        }
        esp_spp_cb_event_t_ESP_SPP_START_EVT => {
            if let Some(name) = SERVER_NAME.get() {
                unsafe { esp_bt_dev_set_device_name(name.as_ptr()) };
            }
            if DISCOVERABLE_ALLOWED.load(Ordering::Acquire) {
                if let Err(e) = set_discoverable(true) {
                    log::error!("SPP discoverable failed: {}", e);
                }
            }
            log::info!("SPP server '{}' started", SPP_SERVER_NAME);
        }
        esp_spp_cb_event_t_ESP_SPP_SRV_OPEN_EVT => {
            CONGESTED.store(false, Ordering::Release);
            transport.on_peer_connected(PeerHandle(unsafe { param.srv_open.handle }));
        }
        esp_spp_cb_event_t_ESP_SPP_CLOSE_EVT => {
            transport.on_peer_disconnected();
            CONGESTED.store(false, Ordering::Release);
        }
        esp_spp_cb_event_t_ESP_SPP_DATA_IND_EVT => {
            let data_ind = unsafe { param.data_ind };
            if data_ind.data.is_null() {
                return;
            }
            let data = unsafe { std::slice::from_raw_parts(data_ind.data, data_ind.len as usize) };
            transport.on_command_received(data);
        }
        esp_spp_cb_event_t_ESP_SPP_CONG_EVT => {
            CONGESTED.store(unsafe { param.cong.cong }, Ordering::Release);
        }
        esp_spp_cb_event_t_ESP_SPP_WRITE_EVT => {
            CONGESTED.store(unsafe { param.write.cong }, Ordering::Release);
        }
        _ => {}
    }
}

/// Start Bluedroid in classic mode with an SPP server.
///
/// The returned driver must be kept alive. The device turns discoverable
/// once the server starts if `discoverable` is set, otherwise on the first
/// `resume_advertising`.
pub fn start(
    modem: BluetoothModem,
    nvs: EspDefaultNvsPartition,
    requests: ScanRequestSender,
    discoverable: bool,
) -> anyhow::Result<(&'static SppTransport, BtDriver<'static, BtClassic>)> {
    DISCOVERABLE_ALLOWED.store(discoverable, Ordering::Release);
    let _ = SERVER_NAME.set(CString::new(SPP_SERVER_NAME)?);

    let transport: &'static SppTransport = Box::leak(Box::new(ClassicSppTransport::new(SppWriter, requests)));
    if TRANSPORT.set(transport).is_err() {
        anyhow::bail!("SPP already started");
    }

    let driver = BtDriver::<BtClassic>::new(modem, Some(nvs))?;

    let config = esp_spp_cfg_t {
        mode: esp_spp_mode_t_ESP_SPP_MODE_CB,
        enable_l2cap_ertm: true,
        ..Default::default()
    };
    esp!(unsafe { esp_spp_register_callback(Some(spp_callback)) })?;
    esp!(unsafe { esp_spp_enhanced_init(&config) })?;

    Ok((transport, driver))
}

/// Discoverability control for the radio manager.
pub struct SppDiscoverability;

impl BluetoothRadio for SppDiscoverability {
    async fn pause_advertising(&mut self) -> Result<(), DriverError> {
        DISCOVERABLE_ALLOWED.store(false, Ordering::Release);
        set_discoverable(false)
    }

    async fn resume_advertising(&mut self) -> Result<(), DriverError> {
        DISCOVERABLE_ALLOWED.store(true, Ordering::Release);
        set_discoverable(true)?;
        log::info!("SPP discoverable as '{}'", SPP_SERVER_NAME);
        Ok(())
    }
}
