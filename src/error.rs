//! Error types shared by the radio, scan and transport layers.
//!
//! Every failure here is recoverable: the cycle scheduler logs it and moves
//! on to the next cycle. Platform driver failures carry the raw `esp_err_t`
//! code so the log line is enough to diagnose them.

use core::fmt;

use thiserror::Error;

use crate::radio::RadioRole;

/// Raw platform driver error code (`esp_err_t` numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("esp_err {0:#x}")]
pub struct DriverError(pub i32);

impl DriverError {
    /// Generic failure, used when the driver does not report a code.
    pub const FAIL: Self = Self(-1);
    /// `ESP_ERR_INVALID_STATE`
    pub const INVALID_STATE: Self = Self(0x103);
    /// `ESP_ERR_TIMEOUT`
    pub const TIMEOUT: Self = Self(0x107);
    /// `ESP_ERR_WIFI_NOT_INIT`
    pub const WIFI_NOT_INIT: Self = Self(0x3001);

    pub const fn code(self) -> i32 {
        self.0
    }
}

/// Step of the radio lifecycle that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioStage {
    /// Network-interface layer / default event loop bring-up
    StackInit,
    /// Station interface creation and driver init
    Init,
    Start,
    Stop,
    Deinit,
    AdvertisingPause,
    AdvertisingResume,
}

impl RadioStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RadioStage::StackInit => "stack init",
            RadioStage::Init => "init",
            RadioStage::Start => "start",
            RadioStage::Stop => "stop",
            RadioStage::Deinit => "deinit",
            RadioStage::AdvertisingPause => "advertising pause",
            RadioStage::AdvertisingResume => "advertising resume",
        }
    }
}

impl fmt::Display for RadioStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Radio acquisition / release failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RadioError {
    /// A driver call failed at the given stage.
    #[error("WiFi/BT {stage} failed: {code}")]
    Driver { stage: RadioStage, code: DriverError },
    /// The radio is held by another role.
    #[error("radio busy (held by {held_by})")]
    Busy { held_by: RadioRole },
}

impl RadioError {
    pub(crate) const fn driver(stage: RadioStage, code: DriverError) -> Self {
        RadioError::Driver { stage, code }
    }

    /// Failing stage, if the error came from a driver call.
    pub fn stage(&self) -> Option<RadioStage> {
        match self {
            RadioError::Driver { stage, .. } => Some(*stage),
            RadioError::Busy { .. } => None,
        }
    }
}

/// WiFi scan failure. The scan engine reports it alongside an empty result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("scan start failed: {0}")]
    Start(DriverError),
    #[error("scan result retrieval failed: {0}")]
    Fetch(DriverError),
}

/// Delivery failure on the Bluetooth link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no peer connected")]
    NotConnected,
    /// The peer handle was replaced by a new connection mid-send.
    #[error("peer handle no longer valid")]
    StaleHandle,
    #[error("send failed: {0}")]
    SendFailed(DriverError),
}

/// An append that would overflow a fixed-capacity buffer. Nothing was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("buffer full: need {needed} bytes, {remaining} left")]
pub struct CapacityExceeded {
    pub needed: usize,
    pub remaining: usize,
}
