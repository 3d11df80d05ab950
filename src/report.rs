//! Scan report rendering into a fixed-capacity text buffer.
//!
//! The report is what the peer sees:
//!
//! ```text
//! === WiFi Scan Results ===
//! SSID: Home
//!   RSSI:  -42 dBm
//!   Channel:   6
//!   Auth:   3
//!
//! === End of Results ===
//! ```
//!
//! Every record is rendered as a whole block or not at all. Room for the
//! footer (and the truncation marker, when records are dropped) is reserved
//! before each block, so a full buffer still ends in a well-formed report.

use core::fmt::Write;

use heapless::String;

use crate::error::CapacityExceeded;
use crate::scan::{AccessPointRecord, ScanResult, MAX_APS, SSID_MAX_LEN};

/// Default report capacity in bytes: a full scan of the widest records,
/// marker included, always renders in full.
pub const REPORT_CAPACITY: usize = HEADER.len() + MAX_APS * MAX_BLOCK_LEN + MARKER_MAX_LEN + FOOTER.len();

pub const HEADER: &str = "=== WiFi Scan Results ===\n";
pub const FOOTER: &str = "=== End of Results ===\n";

/// Entire report when a scan finds nothing
pub const NO_NETWORKS: &str = "No networks found\n";

/// Printed in place of an empty SSID
pub const HIDDEN_SSID: &str = "<hidden>";

/// Longest block a single record can render to: a 32-byte SSID plus
/// fixed-width fields sized for the full `i8` / `u8` range.
pub const MAX_BLOCK_LEN: usize = (6 + SSID_MAX_LEN + 1) + (8 + 4 + 5) + (11 + 3 + 1) + (8 + 3 + 1) + 1;

/// "[truncated: showing " + "]\n" + " of "
const MARKER_FIXED_LEN: usize = 26;
/// Two `usize` counts at most 20 digits each
const MARKER_MAX_LEN: usize = MARKER_FIXED_LEN + 2 * 20;

const _: () = assert!(REPORT_CAPACITY >= HEADER.len() + MAX_APS * MAX_BLOCK_LEN + FOOTER.len());

/// Fixed-capacity text buffer with all-or-nothing appends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportBuffer<const CAP: usize = REPORT_CAPACITY> {
    text: String<CAP>,
    records: usize,
    truncated: bool,
}

impl<const CAP: usize> ReportBuffer<CAP> {
    pub const fn new() -> Self {
        Self {
            text: String::new(),
            records: 0,
            truncated: false,
        }
    }

    /// Append `s` whole, or leave the buffer untouched.
    pub fn push_str(&mut self, s: &str) -> Result<(), CapacityExceeded> {
        let remaining = self.remaining();
        if s.len() > remaining {
            return Err(CapacityExceeded {
                needed: s.len(),
                remaining,
            });
        }
        self.text.push_str(s).map_err(|_| CapacityExceeded {
            needed: s.len(),
            remaining,
        })
    }

    pub fn remaining(&self) -> usize {
        CAP - self.text.len()
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        CAP
    }

    pub fn as_str(&self) -> &str {
        self.text.as_str()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    /// Number of record blocks rendered
    pub fn records(&self) -> usize {
        self.records
    }

    /// True when fewer records were rendered than the scan found.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

impl<const CAP: usize> Default for ReportBuffer<CAP> {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a scan result into a report of capacity `CAP`.
///
/// Pure: the same result and capacity always produce the same bytes.
pub fn format_report<const N: usize, const CAP: usize>(result: &ScanResult<N>) -> ReportBuffer<CAP> {
    let mut report = ReportBuffer::new();
    let total = result.total_found();

    if total == 0 {
        if report.push_str(NO_NETWORKS).is_err() {
            log::warn!("Report buffer ({} bytes) too small for empty-scan notice", CAP);
        }
        return report;
    }

    // Header only when the footer still fits after it
    if report.remaining() >= HEADER.len() + FOOTER.len() {
        let _ = report.push_str(HEADER);
    }

    let marker_reserve = marker_len(total);
    for record in result.records() {
        let block = render_block(record);
        let mut tail = FOOTER.len();
        if report.records + 1 < total {
            tail += marker_reserve;
        }
        if block.len() + tail > report.remaining() || report.push_str(&block).is_err() {
            break;
        }
        report.records += 1;
    }

    if report.records < total {
        report.truncated = true;
        let marker = render_marker(report.records, total);
        if marker.len() + FOOTER.len() <= report.remaining() {
            let _ = report.push_str(&marker);
        }
    }

    if report.push_str(FOOTER).is_err() {
        log::warn!("Report buffer ({} bytes) too small for footer", CAP);
    }
    report
}

fn render_block(record: &AccessPointRecord) -> String<MAX_BLOCK_LEN> {
    let mut block = String::new();
    let _ = block.push_str("SSID: ");
    if record.is_hidden() {
        let _ = block.push_str(HIDDEN_SSID);
    } else {
        for &b in record.ssid() {
            let _ = block.push(printable(b));
        }
    }
    let _ = write!(
        block,
        "\n  RSSI: {:>4} dBm\n  Channel: {:>3}\n  Auth: {:>3}\n\n",
        record.rssi(),
        record.channel(),
        record.auth_mode().code()
    );
    block
}

fn render_marker(shown: usize, total: usize) -> String<MARKER_MAX_LEN> {
    let mut marker = String::new();
    let _ = writeln!(marker, "[truncated: showing {} of {}]", shown, total);
    marker
}

/// Longest marker any shown count up to `total` can produce.
fn marker_len(total: usize) -> usize {
    MARKER_FIXED_LEN + 2 * decimal_digits(total)
}

fn decimal_digits(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

/// SSIDs are raw bytes; anything outside printable ASCII becomes `?`.
fn printable(b: u8) -> char {
    if (0x20..=0x7e).contains(&b) {
        b as char
    } else {
        '?'
    }
}
