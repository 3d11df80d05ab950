//! Scan cycle scheduler: the top-level control loop.
//!
//! ```text
//! WaitingForTrigger ─► AcquiringRadio ─► Scanning ─► Formatting ─► Disseminating ─► Cooldown
//!        ▲                   │ (acquire failed)                                        │
//!        │                   └──────────────────────────────────────────────► Cooldown │
//!        └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The scheduler never touches radio registers. It sequences the radio
//! manager, scan engine, formatter and transport, and is the one place that
//! decides an error is logged and the loop carries on.

use embedded_hal_async::delay::DelayNs;

use crate::config::CycleConfig;
use crate::error::{RadioError, ScanError, TransportError};
use crate::radio::{BluetoothRadio, CoexPolicy, RadioLifecycleManager, WifiDriver};
use crate::report::{format_report, ReportBuffer, REPORT_CAPACITY};
use crate::scan::{ScanDriver, ScanEngine, ScanOutcome, ScanResult, MAX_APS};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    WaitingForTrigger,
    AcquiringRadio,
    Scanning,
    Formatting,
    Disseminating,
    Cooldown,
}

/// Why a cycle started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The scan period elapsed
    Timer,
    /// A peer sent `SCAN`
    Command,
}

/// Waits for the next cycle: the period elapsing or an on-demand request,
/// whichever comes first.
#[allow(async_fn_in_trait)]
pub trait TriggerSource {
    async fn next_trigger(&mut self, period_ms: u32) -> Trigger;
}

/// What happened to the report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent { bytes: usize },
    /// Nobody connected, or the peer left before delivery finished
    NoPeer,
    Failed(TransportError),
}

/// Outcome of one cycle, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub cycle: u32,
    pub trigger: Trigger,
    /// Timer tick ignored because no peer was connected
    pub skipped: bool,
    pub radio_error: Option<RadioError>,
    pub scan_error: Option<ScanError>,
    pub found: usize,
    pub shown: usize,
    pub delivery: Option<Delivery>,
}

impl CycleSummary {
    fn new(cycle: u32, trigger: Trigger) -> Self {
        Self {
            cycle,
            trigger,
            skipped: false,
            radio_error: None,
            scan_error: None,
            found: 0,
            shown: 0,
            delivery: None,
        }
    }
}

pub struct ScanCycleScheduler<W, B, D, T, S, const N: usize = MAX_APS, const CAP: usize = REPORT_CAPACITY> {
    radio: RadioLifecycleManager<W, B, D>,
    engine: ScanEngine,
    transport: T,
    triggers: S,
    delay: D,
    config: CycleConfig,
    phase: CyclePhase,
    cycles: u32,
    started: bool,
    #[cfg(test)]
    trail: std::vec::Vec<CyclePhase>,
}

impl<W, B, D, T, S, const N: usize, const CAP: usize> ScanCycleScheduler<W, B, D, T, S, N, CAP>
where
    W: WifiDriver + ScanDriver,
    B: BluetoothRadio,
    D: DelayNs + Clone,
    T: Transport,
    S: TriggerSource,
{
    pub fn new(wifi: W, bluetooth: B, transport: T, triggers: S, delay: D, config: CycleConfig) -> Self {
        Self {
            radio: RadioLifecycleManager::new(wifi, bluetooth, delay.clone(), config.coex, config.settle_ms),
            engine: ScanEngine::new(config.scan),
            transport,
            triggers,
            delay,
            config,
            phase: CyclePhase::WaitingForTrigger,
            cycles: 0,
            started: false,
            #[cfg(test)]
            trail: std::vec::Vec::new(),
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn radio(&self) -> &RadioLifecycleManager<W, B, D> {
        &self.radio
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    /// Run cycles forever.
    pub async fn run(&mut self) {
        log::info!(
            "Scan cycle: every {} ms, {:?} radio sharing",
            self.config.period_ms,
            self.config.coex
        );
        loop {
            let summary = self.run_cycle().await;
            log::debug!("{:?}", summary);
        }
    }

    /// Wait for one trigger and run the cycle it starts.
    pub async fn run_cycle(&mut self) -> CycleSummary {
        if !self.started {
            self.start().await;
        }

        self.enter(CyclePhase::WaitingForTrigger);
        let period_ms = if self.cycles == 0 && self.config.scan_at_boot {
            0
        } else {
            self.config.period_ms
        };
        let trigger = self.triggers.next_trigger(period_ms).await;
        self.cycles = self.cycles.wrapping_add(1);
        let mut summary = CycleSummary::new(self.cycles, trigger);

        if trigger == Trigger::Timer && self.config.scan_only_when_connected && !self.transport.is_connected() {
            log::debug!("No client connected, skipping scan");
            summary.skipped = true;
            return summary;
        }

        log::info!("=== Scan cycle {} ({:?}) ===", self.cycles, trigger);

        self.enter(CyclePhase::AcquiringRadio);
        if let Err(e) = self.radio.acquire_wifi().await {
            log::error!("Skipping scan, WiFi unavailable: {}", e);
            summary.radio_error = Some(e);
            self.cooldown().await;
            return summary;
        }

        self.enter(CyclePhase::Scanning);
        let outcome: ScanOutcome<N> = match self.radio.wifi() {
            Some(driver) => self.engine.scan(driver).await,
            None => ScanOutcome {
                result: ScanResult::empty(),
                error: None,
            },
        };
        if let Some(e) = outcome.error {
            log::warn!("WiFi scan failed: {}", e);
            summary.scan_error = Some(e);
        }

        self.enter(CyclePhase::Formatting);
        let report: ReportBuffer<CAP> = format_report(&outcome.result);
        summary.found = outcome.result.total_found();
        summary.shown = report.records();

        self.enter(CyclePhase::Disseminating);
        summary.delivery = Some(self.disseminate(&report).await);

        self.cooldown().await;
        summary
    }

    fn enter(&mut self, phase: CyclePhase) {
        log::trace!("Cycle phase {:?}", phase);
        self.phase = phase;
        #[cfg(test)]
        self.trail.push(phase);
    }

    async fn start(&mut self) {
        self.started = true;
        // With a boot scan the first cooldown hands the radio to Bluetooth
        if self.config.scan_at_boot {
            return;
        }
        if let Err(e) = self.radio.resume_bluetooth().await {
            log::error!("Bluetooth advertising start failed: {}", e);
        }
    }

    async fn disseminate(&self, report: &ReportBuffer<CAP>) -> Delivery {
        if !self.transport.is_connected() {
            log::info!("No client connected, report not sent");
            return Delivery::NoPeer;
        }
        match self.transport.send(report.as_bytes()).await {
            Ok(()) => {
                log::info!("Report sent ({} bytes, {} networks)", report.len(), report.records());
                Delivery::Sent { bytes: report.len() }
            }
            Err(TransportError::NotConnected) => {
                log::info!("Client left during delivery");
                Delivery::NoPeer
            }
            Err(e) => {
                log::warn!("Report delivery failed: {}", e);
                Delivery::Failed(e)
            }
        }
    }

    async fn cooldown(&mut self) {
        self.enter(CyclePhase::Cooldown);
        if self.config.coex == CoexPolicy::Serialized {
            if let Err(e) = self.radio.release_wifi().await {
                log::error!("WiFi release failed: {}", e);
            }
            if let Err(e) = self.radio.resume_bluetooth().await {
                log::error!("Bluetooth advertising resume failed: {}", e);
            }
        }
        self.delay.delay_ms(self.config.cooldown_ms).await;
    }
}
