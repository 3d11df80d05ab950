//! WiFi station on ESP-IDF (`esp-idf-svc`).
//!
//! `EspWifi::new` creates the default station netif and runs
//! `esp_wifi_init`; dropping it deinitializes the driver and destroys the
//! netif. The modem is kept so a fresh `EspWifi` can be built every cycle.

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::modem::WifiModemPeripheral;
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sys::EspError;
use esp_idf_svc::wifi::{
    AccessPointInfo, AuthMethod, ClientConfiguration, Configuration, EspWifi, ScanConfig as EspScanConfig, ScanType,
};
use std::time::Duration;

use scanlink::error::{DriverError, ScanError};
use scanlink::radio::WifiDriver;
use scanlink::scan::{AccessPointRecord, AuthMode, ScanConfig, ScanDriver};

pub(crate) fn esp_code(e: EspError) -> DriverError {
    DriverError(e.code())
}

pub struct EspWifiDriver<M> {
    modem: M,
    nvs: Option<EspDefaultNvsPartition>,
    sys_loop: Option<EspSystemEventLoop>,
    wifi: Option<EspWifi<'static>>,
}

impl<M> EspWifiDriver<M>
where
    M: WifiModemPeripheral + Peripheral<P = M> + 'static,
{
    pub fn new(modem: M, nvs: EspDefaultNvsPartition) -> Self {
        Self {
            modem,
            nvs: Some(nvs),
            sys_loop: None,
            wifi: None,
        }
    }

    fn wifi(&mut self) -> Result<&mut EspWifi<'static>, DriverError> {
        self.wifi.as_mut().ok_or(DriverError::WIFI_NOT_INIT)
    }
}

impl<M> WifiDriver for EspWifiDriver<M>
where
    M: WifiModemPeripheral + Peripheral<P = M> + 'static,
{
    async fn bring_up(&mut self) -> Result<(), DriverError> {
        // Creates the default event loop; netif init follows with the first EspWifi
        self.sys_loop = Some(EspSystemEventLoop::take().map_err(esp_code)?);
        log::info!("Event loop initialized");
        Ok(())
    }

    async fn init_station(&mut self) -> Result<(), DriverError> {
        let sys_loop = self.sys_loop.clone().ok_or(DriverError::INVALID_STATE)?;
        // SAFETY: the previous EspWifi, the only other user of the modem,
        // was dropped by `deinit` before the manager calls this again.
        let modem = unsafe { self.modem.clone_unchecked() };
        let mut wifi = EspWifi::new(modem, sys_loop, self.nvs.clone()).map_err(esp_code)?;
        wifi.set_configuration(&Configuration::Client(ClientConfiguration::default()))
            .map_err(esp_code)?;
        self.wifi = Some(wifi);
        Ok(())
    }

    async fn start(&mut self) -> Result<(), DriverError> {
        self.wifi()?.start().map_err(esp_code)
    }

    async fn stop(&mut self) -> Result<(), DriverError> {
        self.wifi()?.stop().map_err(esp_code)
    }

    async fn deinit(&mut self) -> Result<(), DriverError> {
        self.wifi.take().ok_or(DriverError::WIFI_NOT_INIT)?;
        Ok(())
    }
}

impl<M> ScanDriver for EspWifiDriver<M>
where
    M: WifiModemPeripheral + Peripheral<P = M> + 'static,
{
    async fn scan<const N: usize>(
        &mut self,
        config: &ScanConfig,
        out: &mut heapless::Vec<AccessPointRecord, N>,
    ) -> Result<usize, ScanError> {
        let request = EspScanConfig {
            channel: config.channel,
            show_hidden: config.show_hidden,
            scan_type: ScanType::Active {
                min: Duration::from_millis(config.dwell_min_ms as u64),
                max: Duration::from_millis(config.dwell_max_ms as u64),
            },
            ..Default::default()
        };

        let wifi = self.wifi().map_err(ScanError::Start)?;
        // Blocking: returns once every channel has been visited
        wifi.start_scan(&request, true)
            .map_err(|e| ScanError::Start(esp_code(e)))?;
        let (found, total) = wifi
            .get_scan_result_n::<N>()
            .map_err(|e| ScanError::Fetch(esp_code(e)))?;

        for ap in found.iter() {
            let _ = out.push(record(ap));
        }
        Ok(total)
    }
}

fn record(ap: &AccessPointInfo) -> AccessPointRecord {
    AccessPointRecord::new(ap.ssid.as_bytes(), ap.signal_strength, ap.channel, auth_mode(ap.auth_method))
}

fn auth_mode(method: Option<AuthMethod>) -> AuthMode {
    match method {
        None | Some(AuthMethod::None) => AuthMode::Open,
        Some(AuthMethod::WEP) => AuthMode::Wep,
        Some(AuthMethod::WPA) => AuthMode::WpaPsk,
        Some(AuthMethod::WPA2Personal) => AuthMode::Wpa2Psk,
        Some(AuthMethod::WPAWPA2Personal) => AuthMode::WpaWpa2Psk,
        Some(AuthMethod::WPA2Enterprise) => AuthMode::Wpa2Enterprise,
        Some(AuthMethod::WPA3Personal) => AuthMode::Wpa3Psk,
        Some(AuthMethod::WPA2WPA3Personal) => AuthMode::Wpa2Wpa3Psk,
        Some(AuthMethod::WAPIPersonal) => AuthMode::WapiPsk,
        #[allow(unreachable_patterns)]
        Some(_) => AuthMode::UNMAPPED,
    }
}
