//! Shared radio ownership between WiFi scanning and Bluetooth.
//!
//! The ESP32 family has one 2.4 GHz front end. [`RadioLifecycleManager`]
//! owns it and sequences the hand-over:
//!
//! ```text
//!   None ──acquire_wifi──► WifiScanning ──release_wifi──► None
//!    ▲                                                      │
//!    └──────(Serialized) BluetoothActive ◄─resume_bluetooth─┘
//! ```
//!
//! Under [`CoexPolicy::Serialized`] Bluetooth advertising is paused before the
//! WiFi driver is touched and only resumed once WiFi is fully deinitialized.
//! Under [`CoexPolicy::Concurrent`] the chip's coexistence arbiter shares the
//! antenna, WiFi stays up between scans and advertising is left alone.
//!
//! Connected peers are unaffected by pausing advertising: only
//! discoverability goes away while WiFi holds the radio.

use core::fmt;

use embedded_hal_async::delay::DelayNs;

use crate::error::{DriverError, RadioError, RadioStage};

/// Wait after releasing WiFi before the radio is handed back
pub const RELEASE_SETTLE_MS: u32 = 100;

/// Who currently holds the shared radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioRole {
    None,
    WifiScanning,
    BluetoothActive,
}

impl RadioRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RadioRole::None => "none",
            RadioRole::WifiScanning => "wifi",
            RadioRole::BluetoothActive => "bluetooth",
        }
    }
}

impl fmt::Display for RadioRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether WiFi and Bluetooth advertising may run at the same time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoexPolicy {
    /// One role at a time; WiFi is torn down after every scan
    Serialized,
    /// Both roles coexist; WiFi stays initialized between scans
    Concurrent,
}

/// Platform WiFi driver port.
///
/// Implementations wrap `esp-radio` or `esp-idf-svc`. Each method maps to a
/// single driver step so the manager can roll back exactly what completed.
#[allow(async_fn_in_trait)]
pub trait WifiDriver {
    /// One-time network-interface layer and default event loop bring-up.
    /// Called at most once per process.
    async fn bring_up(&mut self) -> Result<(), DriverError>;

    /// Create the station interface and initialize the driver in station mode.
    async fn init_station(&mut self) -> Result<(), DriverError>;

    async fn start(&mut self) -> Result<(), DriverError>;

    async fn stop(&mut self) -> Result<(), DriverError>;

    /// Deinitialize the driver and destroy the station interface.
    async fn deinit(&mut self) -> Result<(), DriverError>;
}

/// Bluetooth advertising / discoverability control port.
#[allow(async_fn_in_trait)]
pub trait BluetoothRadio {
    async fn pause_advertising(&mut self) -> Result<(), DriverError>;
    async fn resume_advertising(&mut self) -> Result<(), DriverError>;
}

/// Progress of the WiFi driver through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Station {
    Down,
    Initialized,
    Running,
}

/// Owns the shared radio and the WiFi driver.
pub struct RadioLifecycleManager<W, B, D> {
    wifi: W,
    bluetooth: B,
    delay: D,
    policy: CoexPolicy,
    settle_ms: u32,
    owner: RadioRole,
    station: Station,
    stack_ready: bool,
}

impl<W, B, D> RadioLifecycleManager<W, B, D>
where
    W: WifiDriver,
    B: BluetoothRadio,
    D: DelayNs,
{
    /// Ownership starts at [`RadioRole::None`]. Under `Serialized` the
    /// firmware must not advertise until [`Self::resume_bluetooth`] grants it.
    pub fn new(wifi: W, bluetooth: B, delay: D, policy: CoexPolicy, settle_ms: u32) -> Self {
        Self {
            wifi,
            bluetooth,
            delay,
            policy,
            settle_ms,
            owner: RadioRole::None,
            station: Station::Down,
            stack_ready: false,
        }
    }

    pub fn owner(&self) -> RadioRole {
        self.owner
    }

    pub fn policy(&self) -> CoexPolicy {
        self.policy
    }

    /// The WiFi driver, only while WiFi holds the radio.
    pub fn wifi(&mut self) -> Option<&mut W> {
        match self.owner {
            RadioRole::WifiScanning => Some(&mut self.wifi),
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn driver_mut(&mut self) -> &mut W {
        &mut self.wifi
    }

    /// Take the radio for WiFi scanning. No-op if WiFi already holds it.
    ///
    /// On failure every completed step is rolled back and ownership is
    /// [`RadioRole::None`], except when advertising could not be paused:
    /// Bluetooth then keeps the radio. Nothing is retried here.
    pub async fn acquire_wifi(&mut self) -> Result<(), RadioError> {
        if self.owner == RadioRole::WifiScanning {
            log::debug!("WiFi already holds the radio");
            return Ok(());
        }

        if self.owner == RadioRole::BluetoothActive {
            self.bluetooth
                .pause_advertising()
                .await
                .map_err(|code| RadioError::driver(RadioStage::AdvertisingPause, code))?;
            self.owner = RadioRole::None;
            log::info!("Bluetooth advertising paused for WiFi scan");
        }

        // Leftovers from a previous cycle that failed half-way
        if let Err(e) = self.teardown_station().await {
            log::debug!("Ignoring stale WiFi teardown error: {}", e);
        }

        if !self.stack_ready {
            self.wifi
                .bring_up()
                .await
                .map_err(|code| RadioError::driver(RadioStage::StackInit, code))?;
            self.stack_ready = true;
            log::info!("Network interface layer and event loop ready");
        }

        if let Err(code) = self.wifi.init_station().await {
            return Err(self.roll_back(RadioStage::Init, code).await);
        }
        self.station = Station::Initialized;

        if let Err(code) = self.wifi.start().await {
            return Err(self.roll_back(RadioStage::Start, code).await);
        }
        self.station = Station::Running;
        self.owner = RadioRole::WifiScanning;

        self.delay.delay_ms(self.settle_ms).await;
        log::info!("WiFi station started");
        Ok(())
    }

    /// Stop and deinitialize WiFi. No-op if WiFi does not hold the radio.
    ///
    /// Teardown is best-effort: every step is attempted and the first
    /// failure is returned. Ownership is [`RadioRole::None`] either way.
    pub async fn release_wifi(&mut self) -> Result<(), RadioError> {
        if self.owner != RadioRole::WifiScanning && self.station == Station::Down {
            log::debug!("WiFi already released");
            return Ok(());
        }

        let result = self.teardown_station().await;
        if self.owner == RadioRole::WifiScanning {
            self.owner = RadioRole::None;
        }
        self.delay.delay_ms(RELEASE_SETTLE_MS).await;

        match result {
            Ok(()) => log::info!("WiFi released"),
            Err(e) => log::warn!("WiFi released with errors: {}", e),
        }
        result
    }

    /// Hand the radio back to Bluetooth advertising.
    ///
    /// Only meaningful under `Serialized`; a no-op under `Concurrent` or
    /// when Bluetooth already holds the radio. Fails with
    /// [`RadioError::Busy`] while WiFi is held.
    pub async fn resume_bluetooth(&mut self) -> Result<(), RadioError> {
        if self.policy == CoexPolicy::Concurrent {
            return Ok(());
        }
        match self.owner {
            RadioRole::BluetoothActive => Ok(()),
            RadioRole::WifiScanning => Err(RadioError::Busy {
                held_by: RadioRole::WifiScanning,
            }),
            RadioRole::None => {
                self.bluetooth
                    .resume_advertising()
                    .await
                    .map_err(|code| RadioError::driver(RadioStage::AdvertisingResume, code))?;
                self.owner = RadioRole::BluetoothActive;
                log::info!("Bluetooth advertising resumed");
                Ok(())
            }
        }
    }

    async fn roll_back(&mut self, stage: RadioStage, code: DriverError) -> RadioError {
        let error = RadioError::driver(stage, code);
        log::error!("WiFi acquisition failed: {}", error);
        if let Err(e) = self.teardown_station().await {
            log::warn!("Rollback incomplete: {}", e);
        }
        self.owner = RadioRole::None;
        error
    }

    async fn teardown_station(&mut self) -> Result<(), RadioError> {
        let mut first = None;
        if self.station == Station::Running {
            if let Err(code) = self.wifi.stop().await {
                first.get_or_insert(RadioError::driver(RadioStage::Stop, code));
            }
        }
        if self.station != Station::Down {
            if let Err(code) = self.wifi.deinit().await {
                first.get_or_insert(RadioError::driver(RadioStage::Deinit, code));
            }
        }
        self.station = Station::Down;
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;
    use embassy_futures::block_on;
    use std::rc::Rc;
    use std::vec::Vec;

    type CallLog = Rc<RefCell<Vec<&'static str>>>;

    #[derive(Default)]
    struct FakeWifi {
        log: CallLog,
        fail_bring_up: bool,
        fail_init: bool,
        fail_start: bool,
        fail_stop: bool,
    }

    impl WifiDriver for FakeWifi {
        async fn bring_up(&mut self) -> Result<(), DriverError> {
            self.log.borrow_mut().push("bring_up");
            if self.fail_bring_up { Err(DriverError::FAIL) } else { Ok(()) }
        }
        async fn init_station(&mut self) -> Result<(), DriverError> {
            self.log.borrow_mut().push("init");
            if self.fail_init { Err(DriverError(0x101)) } else { Ok(()) }
        }
        async fn start(&mut self) -> Result<(), DriverError> {
            self.log.borrow_mut().push("start");
            if self.fail_start { Err(DriverError(0x3002)) } else { Ok(()) }
        }
        async fn stop(&mut self) -> Result<(), DriverError> {
            self.log.borrow_mut().push("stop");
            if self.fail_stop { Err(DriverError::FAIL) } else { Ok(()) }
        }
        async fn deinit(&mut self) -> Result<(), DriverError> {
            self.log.borrow_mut().push("deinit");
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeBluetooth {
        log: CallLog,
        fail_pause: bool,
    }

    impl BluetoothRadio for FakeBluetooth {
        async fn pause_advertising(&mut self) -> Result<(), DriverError> {
            self.log.borrow_mut().push("adv_pause");
            if self.fail_pause { Err(DriverError::FAIL) } else { Ok(()) }
        }
        async fn resume_advertising(&mut self) -> Result<(), DriverError> {
            self.log.borrow_mut().push("adv_resume");
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeDelay {
        log: CallLog,
        total_ms: Rc<RefCell<u64>>,
    }

    impl DelayNs for FakeDelay {
        async fn delay_ns(&mut self, ns: u32) {
            *self.total_ms.borrow_mut() += u64::from(ns) / 1_000_000;
        }
        async fn delay_ms(&mut self, ms: u32) {
            self.log.borrow_mut().push("delay");
            *self.total_ms.borrow_mut() += u64::from(ms);
        }
    }

    fn manager(policy: CoexPolicy, wifi: FakeWifi) -> (RadioLifecycleManager<FakeWifi, FakeBluetooth, FakeDelay>, CallLog) {
        let log = wifi.log.clone();
        let bluetooth = FakeBluetooth { log: log.clone(), ..Default::default() };
        let delay = FakeDelay { log: log.clone(), ..Default::default() };
        (RadioLifecycleManager::new(wifi, bluetooth, delay, policy, 2000), log)
    }

    fn calls(log: &CallLog) -> Vec<&'static str> {
        log.borrow_mut().drain(..).collect()
    }

    // ── Acquire ─────────────────────────────────────────────────────

    #[test]
    fn acquire_runs_full_bring_up_once() {
        let (mut radio, log) = manager(CoexPolicy::Concurrent, FakeWifi::default());
        block_on(radio.acquire_wifi()).unwrap();
        assert_eq!(radio.owner(), RadioRole::WifiScanning);
        assert_eq!(calls(&log), ["bring_up", "init", "start", "delay"]);
        assert!(radio.wifi().is_some());
    }

    #[test]
    fn acquire_is_noop_when_held() {
        let (mut radio, log) = manager(CoexPolicy::Concurrent, FakeWifi::default());
        block_on(radio.acquire_wifi()).unwrap();
        calls(&log);
        block_on(radio.acquire_wifi()).unwrap();
        assert!(calls(&log).is_empty());
    }

    #[test]
    fn stack_bring_up_happens_once_across_cycles() {
        let (mut radio, log) = manager(CoexPolicy::Serialized, FakeWifi::default());
        for _ in 0..5 {
            block_on(radio.acquire_wifi()).unwrap();
            block_on(radio.release_wifi()).unwrap();
            block_on(radio.resume_bluetooth()).unwrap();
        }
        let bring_ups = calls(&log).iter().filter(|c| **c == "bring_up").count();
        assert_eq!(bring_ups, 1);
    }

    #[test]
    fn serialized_pauses_advertising_before_wifi_init() {
        let (mut radio, log) = manager(CoexPolicy::Serialized, FakeWifi::default());
        block_on(radio.resume_bluetooth()).unwrap();
        assert_eq!(radio.owner(), RadioRole::BluetoothActive);
        calls(&log);

        block_on(radio.acquire_wifi()).unwrap();
        assert_eq!(calls(&log), ["adv_pause", "bring_up", "init", "start", "delay"]);
    }

    #[test]
    fn concurrent_never_touches_advertising() {
        let (mut radio, log) = manager(CoexPolicy::Concurrent, FakeWifi::default());
        block_on(radio.resume_bluetooth()).unwrap();
        block_on(radio.acquire_wifi()).unwrap();
        block_on(radio.release_wifi()).unwrap();
        block_on(radio.resume_bluetooth()).unwrap();
        let log = calls(&log);
        assert!(!log.contains(&"adv_pause"));
        assert!(!log.contains(&"adv_resume"));
    }

    // ── Failure rollback ────────────────────────────────────────────

    #[test]
    fn init_failure_leaves_ownership_none() {
        let wifi = FakeWifi { fail_init: true, ..Default::default() };
        let (mut radio, log) = manager(CoexPolicy::Concurrent, wifi);
        let err = block_on(radio.acquire_wifi()).unwrap_err();
        assert_eq!(err.stage(), Some(RadioStage::Init));
        assert_eq!(radio.owner(), RadioRole::None);
        assert!(radio.wifi().is_none());
        // Nothing was initialized, so nothing to tear down
        assert_eq!(calls(&log), ["bring_up", "init"]);
    }

    #[test]
    fn start_failure_rolls_back_init() {
        let wifi = FakeWifi { fail_start: true, ..Default::default() };
        let (mut radio, log) = manager(CoexPolicy::Concurrent, wifi);
        let err = block_on(radio.acquire_wifi()).unwrap_err();
        assert_eq!(
            err,
            RadioError::Driver { stage: RadioStage::Start, code: DriverError(0x3002) }
        );
        assert_eq!(radio.owner(), RadioRole::None);
        assert_eq!(calls(&log), ["bring_up", "init", "start", "deinit"]);
    }

    #[test]
    fn stack_failure_is_retried_next_acquire() {
        let wifi = FakeWifi { fail_bring_up: true, ..Default::default() };
        let (mut radio, log) = manager(CoexPolicy::Concurrent, wifi);
        let err = block_on(radio.acquire_wifi()).unwrap_err();
        assert_eq!(err.stage(), Some(RadioStage::StackInit));
        assert_eq!(radio.owner(), RadioRole::None);

        radio.wifi.fail_bring_up = false;
        calls(&log);
        block_on(radio.acquire_wifi()).unwrap();
        assert_eq!(calls(&log)[0], "bring_up");
    }

    #[test]
    fn pause_failure_keeps_wifi_untouched() {
        let (mut radio, log) = manager(CoexPolicy::Serialized, FakeWifi::default());
        radio.bluetooth.fail_pause = true;
        block_on(radio.resume_bluetooth()).unwrap();
        calls(&log);

        let err = block_on(radio.acquire_wifi()).unwrap_err();
        assert_eq!(err.stage(), Some(RadioStage::AdvertisingPause));
        assert_eq!(calls(&log), ["adv_pause"]);
        assert_eq!(radio.owner(), RadioRole::BluetoothActive);
    }

    // ── Release / resume ────────────────────────────────────────────

    #[test]
    fn release_tears_down_and_is_idempotent() {
        let (mut radio, log) = manager(CoexPolicy::Serialized, FakeWifi::default());
        block_on(radio.acquire_wifi()).unwrap();
        calls(&log);

        block_on(radio.release_wifi()).unwrap();
        assert_eq!(radio.owner(), RadioRole::None);
        assert_eq!(calls(&log), ["stop", "deinit", "delay"]);

        block_on(radio.release_wifi()).unwrap();
        assert!(calls(&log).is_empty());
    }

    #[test]
    fn release_continues_past_stop_failure() {
        let wifi = FakeWifi { fail_stop: true, ..Default::default() };
        let (mut radio, log) = manager(CoexPolicy::Serialized, wifi);
        block_on(radio.acquire_wifi()).unwrap();
        calls(&log);

        let err = block_on(radio.release_wifi()).unwrap_err();
        assert_eq!(err.stage(), Some(RadioStage::Stop));
        assert_eq!(radio.owner(), RadioRole::None);
        assert_eq!(calls(&log), ["stop", "deinit", "delay"]);
    }

    #[test]
    fn resume_refused_while_wifi_held() {
        let (mut radio, log) = manager(CoexPolicy::Serialized, FakeWifi::default());
        block_on(radio.acquire_wifi()).unwrap();
        calls(&log);
        let err = block_on(radio.resume_bluetooth()).unwrap_err();
        assert_eq!(err, RadioError::Busy { held_by: RadioRole::WifiScanning });
        assert!(calls(&log).is_empty());
    }

    #[test]
    fn serialized_roles_never_overlap() {
        let (mut radio, log) = manager(CoexPolicy::Serialized, FakeWifi::default());
        block_on(radio.resume_bluetooth()).unwrap();
        for _ in 0..3 {
            block_on(radio.acquire_wifi()).unwrap();
            block_on(radio.release_wifi()).unwrap();
            block_on(radio.resume_bluetooth()).unwrap();
        }
        // Advertising is only resumed after deinit and paused before init
        let mut advertising = false;
        let mut wifi_up = false;
        for call in calls(&log) {
            match call {
                "adv_resume" => {
                    assert!(!wifi_up);
                    advertising = true;
                }
                "adv_pause" => advertising = false,
                "init" => {
                    assert!(!advertising);
                    wifi_up = true;
                }
                "deinit" => wifi_up = false,
                _ => {}
            }
        }
    }

    #[test]
    fn settle_delay_uses_configured_value() {
        let (mut radio, _log) = manager(CoexPolicy::Concurrent, FakeWifi::default());
        let total = radio.delay.total_ms.clone();
        block_on(radio.acquire_wifi()).unwrap();
        assert_eq!(*total.borrow(), 2000);
    }
}
