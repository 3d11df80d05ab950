//! ScanLink library: WiFi scan relay over a shared Bluetooth radio.
//!
//! Periodically scans for nearby WiFi access points, renders the result into
//! a bounded text report and pushes it to a connected Bluetooth peer. The
//! ESP32 parts have a single 2.4 GHz front end, so the radio is handed
//! between WiFi scanning and Bluetooth advertising by an explicit lifecycle
//! manager.
//!
//! This crate holds all sequencing, formatting and transport logic with no
//! platform dependencies, testable on any host with `cargo test`. Platform
//! access is expressed as port traits that the firmware binaries implement:
//! - `src/main.rs`: esp-hal / Embassy firmware, BLE GATT on trouble-host
//! - `firmware-std/`: ESP-IDF firmware, NimBLE GATT or classic SPP
//!
//! Modules, leaves first: `scan` (engine), `report` (formatter),
//! `transport` (SPP / GATT / NimBLE adapters), `radio` (ownership),
//! `cycle` (scheduler). `no_std`, no allocator.

#![cfg_attr(not(test), no_std)]

pub mod board;
pub mod comm;
pub mod config;
pub mod cycle;
pub mod error;
pub mod protocol;
pub mod radio;
pub mod report;
pub mod scan;
pub mod transport;
