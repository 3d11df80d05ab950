/// Hardware abstraction for supported boards.
///
/// Each board module defines radio capabilities selected at compile time via
/// feature flags. `DEFAULT_COEX` decides whether WiFi scanning and Bluetooth
/// advertising may run side by side.

use crate::radio::CoexPolicy;

#[cfg(feature = "board-xiao")]
mod hw {
    pub const BOARD_NAME: &str = "xiao_esp32s3";
    pub const CHIP: &str = "ESP32-S3";
    pub const HAS_CLASSIC_BT: bool = false;
}

#[cfg(feature = "board-m5stickc")]
mod hw {
    pub const BOARD_NAME: &str = "m5stickc_plus2";
    pub const CHIP: &str = "ESP32";
    pub const HAS_CLASSIC_BT: bool = true;
}

#[cfg(feature = "board-c3")]
mod hw {
    pub const BOARD_NAME: &str = "esp32c3_supermini";
    pub const CHIP: &str = "ESP32-C3";
    pub const HAS_CLASSIC_BT: bool = false;
}

#[cfg(not(any(feature = "board-xiao", feature = "board-m5stickc", feature = "board-c3")))]
mod hw {
    pub const BOARD_NAME: &str = "unknown";
    pub const CHIP: &str = "unknown";
    pub const HAS_CLASSIC_BT: bool = false;
}

#[cfg(any(
    all(feature = "board-xiao", feature = "board-m5stickc"),
    all(feature = "board-xiao", feature = "board-c3"),
    all(feature = "board-m5stickc", feature = "board-c3"),
))]
compile_error!("select exactly one board feature");

pub use hw::*;

/// Every supported chip routes WiFi and Bluetooth through one 2.4 GHz front
/// end, so the radios take turns unless the build opts into the arbiter.
#[cfg(not(feature = "coex-concurrent"))]
pub const DEFAULT_COEX: CoexPolicy = CoexPolicy::Serialized;

#[cfg(feature = "coex-concurrent")]
pub const DEFAULT_COEX: CoexPolicy = CoexPolicy::Concurrent;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(feature = "coex-concurrent"))]
    fn radios_serialized_by_default() {
        assert_eq!(DEFAULT_COEX, CoexPolicy::Serialized, "board {}", BOARD_NAME);
    }

    #[test]
    fn classic_bt_only_on_plain_esp32() {
        assert_eq!(HAS_CLASSIC_BT, CHIP == "ESP32");
    }
}
