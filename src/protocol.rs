/// Wire vocabulary between the scanner and a Bluetooth peer.
///
/// Inbound: a single plain-ASCII command token. Outbound: the line-oriented
/// text report built by [`crate::report`].

/// Firmware version string reported in the boot banner
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Inbound token that requests an immediate scan
pub const SCAN_TOKEN: &[u8] = b"SCAN";

/// Significant bytes of an inbound command; longer writes are not commands.
/// Matches the 10-byte NUL-terminated command buffer of the SPP revision.
pub const COMMAND_MAX_LEN: usize = 9;

/// Commands a peer can send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    /// Run a scan cycle now instead of waiting for the timer
    Scan,
}

impl HostCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostCommand::Scan => "SCAN",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_token_matches_command_name() {
        assert_eq!(HostCommand::Scan.as_str().as_bytes(), SCAN_TOKEN);
    }

    #[test]
    fn scan_token_fits_command_buffer() {
        assert!(SCAN_TOKEN.len() <= COMMAND_MAX_LEN);
    }

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
