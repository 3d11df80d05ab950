/// Scan cycle configuration.
///
/// Everything is compile-time: no configuration file, no persisted state.
/// Firmware picks a [`TransportVariant`] and the board's coexistence policy
/// and gets a ready [`CycleConfig`].

use crate::radio::CoexPolicy;
use crate::scan::ScanConfig;

/// Scan period when both radios run side by side
pub const SCAN_PERIOD_CONCURRENT_MS: u32 = 5_000;

/// Scan period when WiFi and Bluetooth take turns. Longer, so a peer has
/// time to find the device between scans.
pub const SCAN_PERIOD_SERIALIZED_MS: u32 = 30_000;

/// Hardware settle time after the WiFi driver starts
pub const WIFI_SETTLE_MS: u32 = 2_000;

/// Pause at the end of every cycle
pub const COOLDOWN_MS: u32 = 100;

/// Which Bluetooth stack carries the report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportVariant {
    ClassicSpp,
    BleGatt,
    NimbleGatt,
}

impl TransportVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportVariant::ClassicSpp => "classic-spp",
            TransportVariant::BleGatt => "ble-gatt",
            TransportVariant::NimbleGatt => "nimble-gatt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleConfig {
    /// Time between timer-triggered cycles
    pub period_ms: u32,
    pub cooldown_ms: u32,
    pub settle_ms: u32,
    pub scan: ScanConfig,
    pub coex: CoexPolicy,
    /// Skip timer-triggered cycles while no peer is connected
    pub scan_only_when_connected: bool,
    /// Run the first cycle right away instead of after one period
    pub scan_at_boot: bool,
}

impl CycleConfig {
    pub const fn for_variant(variant: TransportVariant, coex: CoexPolicy) -> Self {
        let period_ms = match coex {
            CoexPolicy::Serialized => SCAN_PERIOD_SERIALIZED_MS,
            CoexPolicy::Concurrent => SCAN_PERIOD_CONCURRENT_MS,
        };
        // SPP has no notify subscription: nobody to report to until a
        // client opens the serial port.
        let spp = matches!(variant, TransportVariant::ClassicSpp);
        Self {
            period_ms,
            cooldown_ms: COOLDOWN_MS,
            settle_ms: WIFI_SETTLE_MS,
            scan: ScanConfig::new(),
            coex,
            scan_only_when_connected: spp,
            scan_at_boot: !spp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_uses_long_period() {
        let cfg = CycleConfig::for_variant(TransportVariant::BleGatt, CoexPolicy::Serialized);
        assert_eq!(cfg.period_ms, 30_000);
        assert_eq!(cfg.settle_ms, 2_000);
        assert_eq!(cfg.cooldown_ms, 100);
        assert!(cfg.scan_at_boot);
    }

    #[test]
    fn concurrent_uses_short_period() {
        let cfg = CycleConfig::for_variant(TransportVariant::NimbleGatt, CoexPolicy::Concurrent);
        assert_eq!(cfg.period_ms, 5_000);
        assert!(!cfg.scan_only_when_connected);
    }

    #[test]
    fn spp_scans_only_for_a_client() {
        let cfg = CycleConfig::for_variant(TransportVariant::ClassicSpp, CoexPolicy::Concurrent);
        assert!(cfg.scan_only_when_connected);
        assert!(!cfg.scan_at_boot);
    }

    #[test]
    fn scan_defaults() {
        let cfg = CycleConfig::for_variant(TransportVariant::BleGatt, CoexPolicy::Concurrent);
        assert_eq!(cfg.scan.dwell_min_ms, 100);
        assert_eq!(cfg.scan.dwell_max_ms, 300);
        assert!(cfg.scan.show_hidden);
    }
}
