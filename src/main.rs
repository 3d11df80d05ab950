//! ScanLink: WiFi scan relay over BLE GATT (esp-hal / Embassy firmware)
//!
//! Scans for WiFi access points with `esp-radio`, renders the result into a
//! bounded text report and notifies it to a connected BLE central over a
//! trouble-host GATT server. A write of `SCAN` to the command
//! characteristic triggers an immediate scan.

#![no_std]
#![no_main]

extern crate alloc;

use esp_backtrace as _;

esp_bootloader_esp_idf::esp_app_desc!();

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Delay, Duration, Timer};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::peripherals::WIFI;
use esp_hal::timer::timg::TimerGroup;
use esp_radio::wifi::{AccessPointInfo, AuthMethod, ClientConfig, ModeConfig, ScanTypeConfig, WifiController, WifiError};
use static_cell::StaticCell;

use trouble_host::prelude::*;

use scanlink::board;
use scanlink::config::{CycleConfig, TransportVariant};
use scanlink::cycle::{ScanCycleScheduler, Trigger, TriggerSource};
use scanlink::error::{DriverError, ScanError};
use scanlink::protocol::VERSION;
use scanlink::radio::{BluetoothRadio, CoexPolicy, WifiDriver};
use scanlink::scan::{AccessPointRecord, AuthMode, ScanDriver};
use scanlink::transport::gatt::{BleGattTransport, GATT_DEVICE_NAME, GATT_NOTIFY_MAX};
use scanlink::transport::{PeerHandle, PeerWriter, ScanRequestSink, Transport};

// ── BLE GATT server definition ──────────────────────────────────────
//
// Proc macros need string literals; these are the 16-bit UUIDs in
// `transport::gatt` expanded onto the Bluetooth base UUID.

#[gatt_service(uuid = "000000ff-0000-1000-8000-00805f9b34fb")]
struct ScanGattService {
    /// Report, pushed as 20-byte notifications. Clients reassemble until
    /// the footer line.
    #[characteristic(uuid = "0000ff01-0000-1000-8000-00805f9b34fb", read, notify)]
    report: [u8; 20],

    /// Command, write-only. `SCAN` requests an immediate scan.
    #[characteristic(uuid = "0000ff02-0000-1000-8000-00805f9b34fb", write)]
    command: [u8; 20],
}

#[gatt_server]
struct ScanServer {
    scan_service: ScanGattService,
}

// ── Shared state ─────────────────────────────────────────────────────

/// How long a report chunk may wait for the connection task
const NOTIFY_TIMEOUT_MS: u64 = 2_000;

/// Time given to the advertise loop to drop its advertiser
const ADVERTISING_HANDOFF_MS: u64 = 50;

struct Notification {
    peer: PeerHandle,
    chunk: heapless::Vec<u8, GATT_NOTIFY_MAX>,
}

/// Report chunks from the scheduler to the connection task
static NOTIFY_CHANNEL: Channel<CriticalSectionRawMutex, Notification, 4> = Channel::new();

/// Set by a `SCAN` write, consumed by the trigger source
static SCAN_REQUEST: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Whether the advertise loop may advertise
static ADVERTISING_ALLOWED: AtomicBool = AtomicBool::new(true);

/// Pulsed on every change of `ADVERTISING_ALLOWED`
static ADVERTISING_CHANGED: Signal<CriticalSectionRawMutex, ()> = Signal::new();

static TRANSPORT: BleGattTransport<NotifyQueue, ScanRequestSignal> =
    BleGattTransport::new(NotifyQueue, ScanRequestSignal);

// ── Transport ports ──────────────────────────────────────────────────

/// Hands chunks to the connection task, which owns the GATT connection.
struct NotifyQueue;

impl PeerWriter for NotifyQueue {
    async fn write(&self, peer: PeerHandle, chunk: &[u8]) -> Result<(), DriverError> {
        let chunk = heapless::Vec::from_slice(chunk).map_err(|_| DriverError::FAIL)?;
        with_timeout(
            Duration::from_millis(NOTIFY_TIMEOUT_MS),
            NOTIFY_CHANNEL.send(Notification { peer, chunk }),
        )
        .await
        .map_err(|_| DriverError::TIMEOUT)
    }
}

struct ScanRequestSignal;

impl ScanRequestSink for ScanRequestSignal {
    fn request_scan(&self) {
        SCAN_REQUEST.signal(());
    }
}

/// Period timer raced against `SCAN` requests.
struct TimerOrCommand;

impl TriggerSource for TimerOrCommand {
    async fn next_trigger(&mut self, period_ms: u32) -> Trigger {
        match select(Timer::after_millis(period_ms as u64), SCAN_REQUEST.wait()).await {
            Either::First(()) => Trigger::Timer,
            Either::Second(()) => Trigger::Command,
        }
    }
}

// ── Radio ports ──────────────────────────────────────────────────────

/// WiFi station on esp-radio. Dropping the controller deinitializes the
/// driver, so the peripheral is kept to build a fresh one on every init.
struct RadioWifi {
    peripheral: WIFI<'static>,
    controller: Option<WifiController<'static>>,
}

impl RadioWifi {
    fn new(peripheral: WIFI<'static>) -> Self {
        Self {
            peripheral,
            controller: None,
        }
    }

    fn controller(&mut self) -> Result<&mut WifiController<'static>, DriverError> {
        self.controller.as_mut().ok_or(DriverError::WIFI_NOT_INIT)
    }
}

fn driver_error(e: WifiError) -> DriverError {
    log::debug!("esp-radio: {:?}", e);
    DriverError::FAIL
}

impl WifiDriver for RadioWifi {
    async fn bring_up(&mut self) -> Result<(), DriverError> {
        // esp-radio owns its event handling; nothing process-wide to start
        Ok(())
    }

    async fn init_station(&mut self) -> Result<(), DriverError> {
        // SAFETY: at most one controller exists at a time; the previous one
        // was dropped by `deinit` before the manager calls this again.
        let peripheral = unsafe { self.peripheral.clone_unchecked() };
        let (mut controller, _interfaces) =
            esp_radio::wifi::new(peripheral, Default::default()).map_err(driver_error)?;
        controller
            .set_config(&ModeConfig::Client(ClientConfig::default()))
            .map_err(driver_error)?;
        self.controller = Some(controller);
        Ok(())
    }

    async fn start(&mut self) -> Result<(), DriverError> {
        self.controller()?.start_async().await.map_err(driver_error)
    }

    async fn stop(&mut self) -> Result<(), DriverError> {
        let controller = self.controller()?;
        if matches!(controller.is_started(), Ok(true)) {
            controller.stop_async().await.map_err(driver_error)?;
        }
        Ok(())
    }

    async fn deinit(&mut self) -> Result<(), DriverError> {
        self.controller.take().ok_or(DriverError::WIFI_NOT_INIT)?;
        Ok(())
    }
}

impl ScanDriver for RadioWifi {
    async fn scan<const N: usize>(
        &mut self,
        config: &scanlink::scan::ScanConfig,
        out: &mut heapless::Vec<AccessPointRecord, N>,
    ) -> Result<usize, ScanError> {
        let mut request = esp_radio::wifi::ScanConfig::default()
            .with_show_hidden(config.show_hidden)
            .with_scan_type(ScanTypeConfig::Active {
                min: core::time::Duration::from_millis(config.dwell_min_ms as u64),
                max: core::time::Duration::from_millis(config.dwell_max_ms as u64),
            });
        if let Some(channel) = config.channel {
            request = request.with_channel(channel);
        }

        let controller = self.controller().map_err(ScanError::Start)?;
        let mut found = controller
            .scan_with_config_async(request)
            .await
            .map_err(|e| ScanError::Start(driver_error(e)))?;

        // Keep the strongest when there are more than fit
        found.sort_unstable_by(|a, b| b.signal_strength.cmp(&a.signal_strength));
        for ap in found.iter().take(N) {
            let _ = out.push(record(ap));
        }
        Ok(found.len())
    }
}

fn record(ap: &AccessPointInfo) -> AccessPointRecord {
    AccessPointRecord::new(ap.ssid.as_bytes(), ap.signal_strength, ap.channel, auth_mode(ap.auth_method))
}

fn auth_mode(method: Option<AuthMethod>) -> AuthMode {
    match method {
        None | Some(AuthMethod::None) => AuthMode::Open,
        Some(AuthMethod::Wep) => AuthMode::Wep,
        Some(AuthMethod::Wpa) => AuthMode::WpaPsk,
        Some(AuthMethod::Wpa2Personal) => AuthMode::Wpa2Psk,
        Some(AuthMethod::WpaWpa2Personal) => AuthMode::WpaWpa2Psk,
        Some(AuthMethod::Wpa2Enterprise) => AuthMode::Wpa2Enterprise,
        Some(AuthMethod::Wpa3Personal) => AuthMode::Wpa3Psk,
        Some(AuthMethod::Wpa2Wpa3Personal) => AuthMode::Wpa2Wpa3Psk,
        Some(AuthMethod::WapiPersonal) => AuthMode::WapiPsk,
        #[allow(unreachable_patterns)]
        Some(_) => AuthMode::UNMAPPED,
    }
}

/// Gates the advertise loop. Pausing drops the advertiser; an open
/// connection is left alone.
struct AdvertisingGate;

impl AdvertisingGate {
    fn set(allowed: bool) {
        ADVERTISING_ALLOWED.store(allowed, Ordering::Release);
        ADVERTISING_CHANGED.signal(());
    }
}

impl BluetoothRadio for AdvertisingGate {
    async fn pause_advertising(&mut self) -> Result<(), DriverError> {
        Self::set(false);
        Timer::after_millis(ADVERTISING_HANDOFF_MS).await;
        Ok(())
    }

    async fn resume_advertising(&mut self) -> Result<(), DriverError> {
        Self::set(true);
        Ok(())
    }
}

async fn advertising_paused() {
    loop {
        ADVERTISING_CHANGED.wait().await;
        if !ADVERTISING_ALLOWED.load(Ordering::Acquire) {
            return;
        }
    }
}

// ── Entry point ──────────────────────────────────────────────────────

#[esp_rtos::main]
async fn main(_spawner: embassy_executor::Spawner) {
    esp_println::logger::init_logger_from_env();

    let peripherals = esp_hal::init(esp_hal::Config::default());

    // Heap for the radio stacks and scan result lists.
    // ESP32 is tighter on DRAM.
    #[cfg(feature = "esp32")]
    {
        esp_alloc::heap_allocator!(size: 64 * 1024);
    }
    #[cfg(not(feature = "esp32"))]
    {
        esp_alloc::heap_allocator!(size: 128 * 1024);
    }

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    log::info!("ScanLink v{} starting on {} ({})", VERSION, board::BOARD_NAME, board::CHIP);

    // Hold power on (M5StickC Plus2 needs GPIO4 HIGH to stay powered)
    #[cfg(feature = "m5stickc")]
    let _power_hold = esp_hal::gpio::Output::new(
        peripherals.GPIO4,
        esp_hal::gpio::Level::High,
        esp_hal::gpio::OutputConfig::default(),
    );

    // ── BLE ──────────────────────────────────────────────────────────
    // BLE must be initialized BEFORE WiFi for coexistence to work.

    let connector = esp_radio::ble::controller::BleConnector::new(peripherals.BT, Default::default())
        .expect("BLE connector init failed");
    let controller: ExternalController<_, 20> = ExternalController::new(connector);

    static HOST_RESOURCES: StaticCell<HostResources<DefaultPacketPool, 1, 2>> = StaticCell::new();
    let resources = HOST_RESOURCES.init(HostResources::new());

    let address = Address::random([0xff, 0x8f, 0x1a, 0x05, 0xe4, 0xac]);
    let stack = trouble_host::new(controller, resources).set_random_address(address);
    let Host {
        mut peripheral,
        mut runner,
        ..
    } = stack.build();

    let server = ScanServer::new_with_config(GapConfig::Peripheral(PeripheralConfig {
        name: GATT_DEVICE_NAME,
        appearance: &appearance::UNKNOWN,
    }))
    .expect("GATT server init failed");

    // ── Scan cycle ───────────────────────────────────────────────────

    let config = CycleConfig::for_variant(TransportVariant::BleGatt, board::DEFAULT_COEX);
    // Serialized boards scan first; the first cooldown opens advertising
    ADVERTISING_ALLOWED.store(config.coex == CoexPolicy::Concurrent, Ordering::Release);

    let mut scheduler: ScanCycleScheduler<_, _, _, _, _> = ScanCycleScheduler::new(
        RadioWifi::new(peripherals.WIFI),
        AdvertisingGate,
        &TRANSPORT,
        TimerOrCommand,
        Delay,
        config,
    );

    log::info!("BLE GATT transport ready as '{}'", GATT_DEVICE_NAME);

    // Three concurrent futures:
    //   1. BLE stack runner (drives HCI)
    //   2. GATT server (advertise while allowed, serve one central)
    //   3. Scan cycle scheduler
    embassy_futures::join::join3(
        async {
            loop {
                if let Err(e) = runner.run().await {
                    log::error!("BLE runner error: {:?}", e);
                    Timer::after(Duration::from_secs(1)).await;
                }
            }
        },
        async {
            loop {
                if !ADVERTISING_ALLOWED.load(Ordering::Acquire) {
                    ADVERTISING_CHANGED.wait().await;
                    continue;
                }

                let mut adv_data = [0u8; 31];
                let adv_len = match AdStructure::encode_slice(
                    &[
                        AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED),
                        AdStructure::CompleteLocalName(GATT_DEVICE_NAME.as_bytes()),
                    ],
                    &mut adv_data[..],
                ) {
                    Ok(len) => len,
                    Err(e) => {
                        log::error!("Ad encode error: {:?}", e);
                        Timer::after(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let advertiser = match peripheral
                    .advertise(
                        &Default::default(),
                        Advertisement::ConnectableScannableUndirected {
                            adv_data: &adv_data[..adv_len],
                            scan_data: &[],
                        },
                    )
                    .await
                {
                    Ok(adv) => adv,
                    Err(e) => {
                        log::error!("BLE advertise error: {:?}", e);
                        Timer::after(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                log::info!("BLE advertising as '{}'", GATT_DEVICE_NAME);

                let conn = match select(advertiser.accept(), advertising_paused()).await {
                    Either::First(Ok(conn)) => conn,
                    Either::First(Err(e)) => {
                        log::error!("BLE accept error: {:?}", e);
                        continue;
                    }
                    Either::Second(()) => {
                        log::info!("BLE advertising paused");
                        continue;
                    }
                };

                let gatt_conn = match conn.with_attribute_server(&server) {
                    Ok(gc) => gc,
                    Err(e) => {
                        log::error!("GATT setup error: {:?}", e);
                        continue;
                    }
                };

                serve_peer(&gatt_conn, &server).await;
            }
        },
        scheduler.run(),
    )
    .await;
}

/// Serve one central until it disconnects: forward report chunks as
/// notifications and hand command writes to the transport.
async fn serve_peer<'s, P: PacketPool>(conn: &GattConnection<'_, 's, P>, server: &'s ScanServer<'_>) {
    let peer = PeerHandle(conn.raw().handle().raw() as u32);
    NOTIFY_CHANNEL.clear();
    TRANSPORT.on_peer_connected(peer);
    TRANSPORT.on_mtu_changed(conn.raw().att_mtu());

    let notifications = NOTIFY_CHANNEL.receiver();
    loop {
        match select(notifications.receive(), conn.next()).await {
            Either::First(note) => {
                if note.peer != peer {
                    log::debug!("Dropping chunk for stale conn {}", note.peer.0);
                    continue;
                }
                // Fixed-size characteristic: pad the last chunk with
                // newlines, which line-oriented clients skip.
                let mut padded = [b'\n'; GATT_NOTIFY_MAX];
                padded[..note.chunk.len()].copy_from_slice(&note.chunk);
                if let Err(e) = server.scan_service.report.notify(conn, &padded).await {
                    log::warn!("Notify failed: {:?}", e);
                    break;
                }
            }
            Either::Second(GattConnectionEvent::Disconnected { .. }) => break,
            Either::Second(GattConnectionEvent::Gatt { event }) => {
                if let GattEvent::Write(ref write) = event {
                    if write.handle() == server.scan_service.command.handle {
                        TRANSPORT.on_command_received(write.data());
                    }
                }
                // Must accept/reply to all GATT events
                if let Ok(reply) = event.accept() {
                    reply.send().await;
                }
                TRANSPORT.on_mtu_changed(conn.raw().att_mtu());
            }
            Either::Second(_) => {}
        }
    }

    TRANSPORT.on_peer_disconnected();
    NOTIFY_CHANNEL.clear();
}
