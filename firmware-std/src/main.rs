//! ScanLink ESP-IDF std firmware
//!
//! The scan cycle runs on the main thread, driven by `block_on`. Bluetooth
//! callbacks run on the stack's own task and reach the scheduler through
//! the transport (connection state) and an mpsc channel (`SCAN` requests).
//! Transport variant by feature: `nimble` (default) or `spp` (ESP32).

#[cfg(all(feature = "nimble", feature = "spp"))]
compile_error!("Select one transport variant: `nimble` or `spp`");

#[cfg(not(any(feature = "nimble", feature = "spp")))]
compile_error!("Select a transport variant: `nimble` or `spp`");

#[cfg(feature = "nimble")]
mod nimble;
#[cfg(feature = "spp")]
mod spp;
mod wifi;

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::Duration;

use embedded_hal_async::delay::DelayNs;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::task::block_on;
use esp_idf_svc::nvs::EspDefaultNvsPartition;

use scanlink::board;
use scanlink::config::{CycleConfig, TransportVariant};
use scanlink::cycle::{ScanCycleScheduler, Trigger, TriggerSource};
use scanlink::protocol::VERSION;
use scanlink::radio::{BluetoothRadio, CoexPolicy, WifiDriver};
use scanlink::scan::ScanDriver;
use scanlink::transport::{ScanRequestSink, Transport};

use wifi::EspWifiDriver;

// ── Scheduler ports ──────────────────────────────────────────────────

/// Forwards `SCAN` from Bluetooth callbacks to the scan thread.
pub struct ScanRequestSender(SyncSender<()>);

impl ScanRequestSink for ScanRequestSender {
    fn request_scan(&self) {
        // A full channel already holds a pending request
        let _ = self.0.try_send(());
    }
}

/// Period timeout raced against `SCAN` requests.
struct CommandTriggers {
    requests: Receiver<()>,
}

impl TriggerSource for CommandTriggers {
    async fn next_trigger(&mut self, period_ms: u32) -> Trigger {
        let period = Duration::from_millis(period_ms as u64);
        match self.requests.recv_timeout(period) {
            Ok(()) => Trigger::Command,
            Err(RecvTimeoutError::Timeout) => Trigger::Timer,
            Err(RecvTimeoutError::Disconnected) => {
                thread::sleep(period);
                Trigger::Timer
            }
        }
    }
}

/// Blocks the scan thread; nothing else runs on it.
#[derive(Clone)]
struct ThreadDelay;

impl DelayNs for ThreadDelay {
    async fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(ns as u64));
    }

    async fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(ms as u64));
    }
}

fn run_cycles<W, B, T>(wifi: W, bluetooth: B, transport: T, requests: Receiver<()>, config: CycleConfig) -> !
where
    W: WifiDriver + ScanDriver,
    B: BluetoothRadio,
    T: Transport,
{
    let mut scheduler: ScanCycleScheduler<_, _, _, _, _> = ScanCycleScheduler::new(
        wifi,
        bluetooth,
        transport,
        CommandTriggers { requests },
        ThreadDelay,
        config,
    );
    block_on(scheduler.run());
    unreachable!("scan cycle returned");
}

fn main() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    // Bind the ESP-IDF logger to the `log` facade
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("ScanLink v{} starting on {} ({}, std)", VERSION, board::BOARD_NAME, board::CHIP);

    let peripherals = Peripherals::take()?;
    // Erases and retries on no-free-pages / new-version; anything else is fatal
    let nvs = EspDefaultNvsPartition::take()?;

    // Hold power on (M5StickC Plus2)
    #[cfg(feature = "m5stickc")]
    let _power_hold = {
        use esp_idf_svc::hal::gpio::PinDriver;
        let mut p = PinDriver::output(peripherals.pins.gpio4)?;
        p.set_high()?;
        p
    };

    let (request_tx, request_rx) = mpsc::sync_channel::<()>(1);
    let requests = ScanRequestSender(request_tx);

    #[cfg(feature = "nimble")]
    {
        let config = CycleConfig::for_variant(TransportVariant::NimbleGatt, board::DEFAULT_COEX);
        let transport = nimble::start(requests, config.coex == CoexPolicy::Concurrent)?;
        log::info!("NimBLE GATT transport ready");
        run_cycles(
            EspWifiDriver::new(peripherals.modem, nvs),
            nimble::NimbleAdvertising::new(transport),
            transport,
            request_rx,
            config,
        )
    }

    #[cfg(feature = "spp")]
    {
        if !board::HAS_CLASSIC_BT {
            anyhow::bail!("{} has no classic Bluetooth; build with `nimble`", board::BOARD_NAME);
        }
        let config = CycleConfig::for_variant(TransportVariant::ClassicSpp, board::DEFAULT_COEX);
        let (wifi_modem, bt_modem) = peripherals.modem.split();
        let (transport, _bt_driver) =
            spp::start(bt_modem, nvs.clone(), requests, config.coex == CoexPolicy::Concurrent)?;
        log::info!("Classic SPP transport ready");
        run_cycles(
            EspWifiDriver::new(wifi_modem, nvs),
            spp::SppDiscoverability,
            transport,
            request_rx,
            config,
        )
    }
}
