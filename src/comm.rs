/// Inbound command parsing shared by every transport variant.
///
/// Peers write the `SCAN` token either over an SPP stream (terminal apps
/// usually append CR/LF) or into a GATT characteristic (often NUL padded).
/// Trailing line endings, spaces and NULs are ignored; everything else must
/// match exactly.

use crate::protocol::{HostCommand, COMMAND_MAX_LEN, SCAN_TOKEN};

/// Parse one inbound write into a command.
///
/// Returns `None` for unrecognized input, for empty input and for writes
/// with more than [`COMMAND_MAX_LEN`] significant bytes.
pub fn parse_command(data: &[u8]) -> Option<HostCommand> {
    let trimmed = trim_trailing(data);
    if trimmed.is_empty() || trimmed.len() > COMMAND_MAX_LEN {
        return None;
    }
    if trimmed == SCAN_TOKEN {
        Some(HostCommand::Scan)
    } else {
        None
    }
}

fn trim_trailing(data: &[u8]) -> &[u8] {
    let mut end = data.len();
    while end > 0 && matches!(data[end - 1], b' ' | b'\n' | b'\r' | b'\t' | 0) {
        end -= 1;
    }
    &data[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Accepted forms ──────────────────────────────────────────────

    #[test]
    fn parse_bare_scan() {
        assert_eq!(parse_command(b"SCAN"), Some(HostCommand::Scan));
    }

    #[test]
    fn parse_scan_with_line_endings() {
        assert_eq!(parse_command(b"SCAN\n"), Some(HostCommand::Scan));
        assert_eq!(parse_command(b"SCAN\r\n"), Some(HostCommand::Scan));
        assert_eq!(parse_command(b"SCAN  \r\n"), Some(HostCommand::Scan));
    }

    #[test]
    fn parse_scan_nul_padded() {
        let mut buf = [0u8; 20];
        buf[..4].copy_from_slice(b"SCAN");
        assert_eq!(parse_command(&buf), Some(HostCommand::Scan));
    }

    // ── Rejected forms ──────────────────────────────────────────────

    #[test]
    fn parse_is_case_sensitive() {
        assert_eq!(parse_command(b"scan"), None);
        assert_eq!(parse_command(b"Scan\n"), None);
    }

    #[test]
    fn parse_rejects_prefix_and_suffix() {
        assert_eq!(parse_command(b"SCA"), None);
        assert_eq!(parse_command(b"SCANX"), None);
        assert_eq!(parse_command(b" SCAN"), None);
    }

    #[test]
    fn parse_rejects_empty() {
        assert_eq!(parse_command(b""), None);
        assert_eq!(parse_command(b"\r\n"), None);
        assert_eq!(parse_command(&[0u8; 8]), None);
    }

    #[test]
    fn parse_rejects_overlong_write() {
        // 10 significant bytes: longer than the command buffer
        assert_eq!(parse_command(b"SCANSCANSC"), None);
        assert_eq!(parse_command(b"SCAN SCAN\n"), None);
    }

    #[test]
    fn trim_only_touches_the_tail() {
        assert_eq!(trim_trailing(b"\nSCAN\n"), b"\nSCAN");
        assert_eq!(trim_trailing(b"a b \0"), b"a b");
    }
}
