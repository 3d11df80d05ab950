/// WiFi access-point scan engine.
///
/// One active sweep over all channels with bounded per-channel dwell, run
/// through the [`ScanDriver`] port so the same engine drives `esp-radio` on
/// Embassy and `EspWifi` on ESP-IDF. Results come back bounded to `N`
/// records, with the true number of access points seen kept alongside.

use core::cmp::Ordering;

use heapless::Vec;

use crate::error::ScanError;

/// Maximum access points kept per scan
pub const MAX_APS: usize = 20;

/// Maximum SSID length in bytes (802.11)
pub const SSID_MAX_LEN: usize = 32;

/// Minimum active-scan dwell per channel in milliseconds
pub const DEFAULT_DWELL_MIN_MS: u32 = 100;

/// Maximum active-scan dwell per channel in milliseconds.
/// A full 13-channel sweep takes at most 13 × 300 ms ≈ 3.9 s.
pub const DEFAULT_DWELL_MAX_MS: u32 = 300;

/// Raw SSID bytes. Not guaranteed to be UTF-8 or printable.
pub type Ssid = Vec<u8, SSID_MAX_LEN>;

/// WiFi authentication mode, numbered like ESP-IDF `wifi_auth_mode_t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Open,
    Wep,
    WpaPsk,
    Wpa2Psk,
    WpaWpa2Psk,
    Wpa2Enterprise,
    Wpa3Psk,
    Wpa2Wpa3Psk,
    WapiPsk,
    Owe,
    Wpa3Ent192,
    /// A code this firmware has no name for
    Other(u8),
}

impl AuthMode {
    /// Reported when the driver names a method but hides its numeric code.
    /// `wifi_auth_mode_t` never reaches 255, so the value is unambiguous.
    pub const UNMAPPED: AuthMode = AuthMode::Other(u8::MAX);

    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => AuthMode::Open,
            1 => AuthMode::Wep,
            2 => AuthMode::WpaPsk,
            3 => AuthMode::Wpa2Psk,
            4 => AuthMode::WpaWpa2Psk,
            5 => AuthMode::Wpa2Enterprise,
            6 => AuthMode::Wpa3Psk,
            7 => AuthMode::Wpa2Wpa3Psk,
            8 => AuthMode::WapiPsk,
            9 => AuthMode::Owe,
            10 => AuthMode::Wpa3Ent192,
            other => AuthMode::Other(other),
        }
    }

    /// Numeric code, as printed in the report
    pub const fn code(self) -> u8 {
        match self {
            AuthMode::Open => 0,
            AuthMode::Wep => 1,
            AuthMode::WpaPsk => 2,
            AuthMode::Wpa2Psk => 3,
            AuthMode::WpaWpa2Psk => 4,
            AuthMode::Wpa2Enterprise => 5,
            AuthMode::Wpa3Psk => 6,
            AuthMode::Wpa2Wpa3Psk => 7,
            AuthMode::WapiPsk => 8,
            AuthMode::Owe => 9,
            AuthMode::Wpa3Ent192 => 10,
            AuthMode::Other(code) => code,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Open => "open",
            AuthMode::Wep => "wep",
            AuthMode::WpaPsk => "wpa",
            AuthMode::Wpa2Psk => "wpa2",
            AuthMode::WpaWpa2Psk => "wpa/wpa2",
            AuthMode::Wpa2Enterprise => "wpa2-ent",
            AuthMode::Wpa3Psk => "wpa3",
            AuthMode::Wpa2Wpa3Psk => "wpa2/wpa3",
            AuthMode::WapiPsk => "wapi",
            AuthMode::Owe => "owe",
            AuthMode::Wpa3Ent192 => "wpa3-ent192",
            AuthMode::Other(_) => "other",
        }
    }
}

/// One discovered access point. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointRecord {
    ssid: Ssid,
    rssi: i8,
    channel: u8,
    auth_mode: AuthMode,
}

impl AccessPointRecord {
    /// Build a record from raw driver fields. SSID bytes beyond 32 are dropped.
    pub fn new(ssid: &[u8], rssi: i8, channel: u8, auth_mode: AuthMode) -> Self {
        let len = ssid.len().min(SSID_MAX_LEN);
        let mut owned = Ssid::new();
        // Cannot fail: len is clamped to capacity
        let _ = owned.extend_from_slice(&ssid[..len]);
        Self {
            ssid: owned,
            rssi,
            channel,
            auth_mode,
        }
    }

    /// Build a record from a NUL-terminated driver SSID field (`uint8_t ssid[33]`).
    pub fn from_c_ssid(raw: &[u8], rssi: i8, channel: u8, auth_mode: AuthMode) -> Self {
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Self::new(&raw[..end], rssi, channel, auth_mode)
    }

    pub fn ssid(&self) -> &[u8] {
        &self.ssid
    }

    pub fn rssi(&self) -> i8 {
        self.rssi
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    /// Hidden networks broadcast an empty (or all-NUL) SSID.
    pub fn is_hidden(&self) -> bool {
        self.ssid.iter().all(|&b| b == 0)
    }
}

/// Report order: strongest first, then lowest channel, then SSID bytes.
fn rank(a: &AccessPointRecord, b: &AccessPointRecord) -> Ordering {
    b.rssi
        .cmp(&a.rssi)
        .then(a.channel.cmp(&b.channel))
        .then_with(|| a.ssid.as_slice().cmp(b.ssid.as_slice()))
}

/// Active scan parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    pub dwell_min_ms: u32,
    pub dwell_max_ms: u32,
    pub show_hidden: bool,
    /// Restrict the sweep to one channel; `None` scans all channels
    pub channel: Option<u8>,
}

impl ScanConfig {
    pub const fn new() -> Self {
        Self {
            dwell_min_ms: DEFAULT_DWELL_MIN_MS,
            dwell_max_ms: DEFAULT_DWELL_MAX_MS,
            show_hidden: true,
            channel: None,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded result of one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult<const N: usize = MAX_APS> {
    records: Vec<AccessPointRecord, N>,
    total_found: usize,
}

impl<const N: usize> ScanResult<N> {
    pub const fn empty() -> Self {
        Self {
            records: Vec::new(),
            total_found: 0,
        }
    }

    /// Keep the first `N` records, in the order given.
    ///
    /// `total_found` is raised to the number of records offered if the
    /// caller under-reports it.
    pub fn from_records<I>(records: I, total_found: usize) -> Self
    where
        I: IntoIterator<Item = AccessPointRecord>,
    {
        let mut kept = Vec::new();
        let mut offered = 0usize;
        for record in records {
            offered += 1;
            let _ = kept.push(record);
        }
        Self {
            records: kept,
            total_found: total_found.max(offered),
        }
    }

    pub fn records(&self) -> &[AccessPointRecord] {
        &self.records
    }

    /// Number of access points the radio reported, which may exceed `N`.
    pub fn total_found(&self) -> usize {
        self.total_found
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True when fewer records are held than were found.
    pub fn is_truncated(&self) -> bool {
        self.records.len() < self.total_found
    }
}

impl<const N: usize> Default for ScanResult<N> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Platform WiFi scan port.
#[allow(async_fn_in_trait)]
pub trait ScanDriver {
    /// Run one active scan to completion and copy up to `N` records into `out`.
    ///
    /// Returns the total number of access points observed, which may exceed `N`.
    async fn scan<const N: usize>(
        &mut self,
        config: &ScanConfig,
        out: &mut Vec<AccessPointRecord, N>,
    ) -> Result<usize, ScanError>;
}

impl<T: ScanDriver + ?Sized> ScanDriver for &mut T {
    async fn scan<const N: usize>(
        &mut self,
        config: &ScanConfig,
        out: &mut Vec<AccessPointRecord, N>,
    ) -> Result<usize, ScanError> {
        (**self).scan(config, out).await
    }
}

/// Result of [`ScanEngine::scan`]: always a result, plus the failure if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome<const N: usize = MAX_APS> {
    pub result: ScanResult<N>,
    pub error: Option<ScanError>,
}

/// Drives one scan per call and normalizes what the driver returns.
#[derive(Debug, Clone)]
pub struct ScanEngine {
    config: ScanConfig,
    scans: u32,
}

impl ScanEngine {
    pub const fn new(config: ScanConfig) -> Self {
        Self { config, scans: 0 }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Number of scans attempted so far
    pub fn scans(&self) -> u32 {
        self.scans
    }

    /// Run one scan. A driver failure yields an empty result and the error;
    /// it is never fatal.
    pub async fn scan<D: ScanDriver, const N: usize>(&mut self, driver: &mut D) -> ScanOutcome<N> {
        self.scans = self.scans.wrapping_add(1);

        let mut records: Vec<AccessPointRecord, N> = Vec::new();
        let mut total = match driver.scan(&self.config, &mut records).await {
            Ok(total) => total,
            Err(e) => {
                return ScanOutcome {
                    result: ScanResult::empty(),
                    error: Some(e),
                };
            }
        };

        if !self.config.show_hidden {
            let before = records.len();
            records.retain(|r| !r.is_hidden());
            total = total.saturating_sub(before - records.len());
        }

        records.sort_unstable_by(rank);
        let total_found = total.max(records.len());

        log::info!(
            "Scan {}: {} access points found, {} kept",
            self.scans,
            total_found,
            records.len()
        );

        ScanOutcome {
            result: ScanResult {
                records,
                total_found,
            },
            error: None,
        }
    }
}

impl Default for ScanEngine {
    fn default() -> Self {
        Self::new(ScanConfig::new())
    }
}
