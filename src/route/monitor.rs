use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::diff::diff;
use super::snapshot::{RouteSnapshot, collect_snapshot};
use crate::config::{Credentials, MonitorOptions};
use crate::device::{DeviceDriver, DeviceIdentity, Session, open_sessions};
use crate::error::DeviceError;
use crate::persist::{ChangeLogEntry, PersistenceSink};

/// Totals over the lifetime of a monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSummary {
    pub cycles: u64,
    /// Change-log entries handed to the sink.
    pub changes_logged: u64,
    /// Device collections that failed and kept their previous baseline.
    pub collection_failures: u64,
}

/// What happened in one polling cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub polled: usize,
    /// Devices whose baseline was captured for the first time.
    pub baselined: Vec<String>,
    /// Devices with a non-empty change set.
    pub changed: Vec<String>,
    /// Devices whose collection failed, with the reason.
    pub failed: Vec<(String, String)>,
}

struct Monitored<'d, D: DeviceDriver> {
    session: Session<'d, D>,
    baseline: Option<RouteSnapshot>,
}

/// Periodically snapshots route tables and logs what changed.
///
/// Holds one open session per reachable device for its whole lifetime.
/// Sessions are closed by [`RouteMonitor::run`] on cancellation, or by
/// [`RouteMonitor::shutdown`].
pub struct RouteMonitor<'d, D: DeviceDriver> {
    devices: Vec<Monitored<'d, D>>,
    options: MonitorOptions,
    summary: MonitorSummary,
}

impl<'d, D: DeviceDriver> RouteMonitor<'d, D> {
    /// Connects to every device and captures the initial baselines.
    ///
    /// Unreachable devices are logged and left out. Fails with
    /// [`DeviceError::NoDevicesConnected`] when none can be reached.
    pub async fn start(
        driver: &'d D,
        devices: &[DeviceIdentity],
        credentials: &Credentials,
        options: MonitorOptions,
    ) -> Result<Self, DeviceError> {
        let (sessions, failures) = open_sessions(driver, devices, credentials).await;
        if sessions.is_empty() {
            error!("none of {} device(s) could be connected", devices.len());
            return Err(DeviceError::NoDevicesConnected);
        }
        if !failures.is_empty() {
            warn!(
                "monitoring {} device(s), {} unreachable",
                sessions.len(),
                failures.len()
            );
        }

        let mut monitor = Self {
            devices: sessions
                .into_iter()
                .map(|session| Monitored {
                    session,
                    baseline: None,
                })
                .collect(),
            options,
            summary: MonitorSummary::default(),
        };

        for device in &mut monitor.devices {
            match collect_snapshot(&mut device.session, &monitor.options.tables).await {
                Ok(snapshot) => {
                    info!(
                        "{}: baseline captured ({} routes)",
                        device.session.device(),
                        snapshot.route_count()
                    );
                    device.baseline = Some(snapshot);
                }
                Err(err) => warn!(
                    "{}: baseline capture failed, retrying next cycle: {err}",
                    device.session.device()
                ),
            }
        }
        Ok(monitor)
    }

    pub fn options(&self) -> &MonitorOptions {
        &self.options
    }

    pub fn summary(&self) -> MonitorSummary {
        self.summary
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceIdentity> {
        self.devices.iter().map(|d| d.session.device())
    }

    /// Current baseline of the device named `name`.
    pub fn baseline(&self, name: &str) -> Option<&RouteSnapshot> {
        self.devices
            .iter()
            .find(|d| d.session.device().name == name)
            .and_then(|d| d.baseline.as_ref())
    }

    /// Polls every still-open session once.
    pub async fn run_cycle(&mut self, sink: &dyn PersistenceSink) -> CycleReport {
        let mut report = CycleReport::default();
        self.summary.cycles += 1;

        for device in &mut self.devices {
            let name = device.session.device().name.clone();
            if !device.session.is_open() {
                debug!("{name}: session no longer open, skipping");
                continue;
            }
            report.polled += 1;

            let snapshot = match collect_snapshot(&mut device.session, &self.options.tables).await {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    warn!("{name}: route collection failed, keeping previous baseline: {err}");
                    self.summary.collection_failures += 1;
                    report.failed.push((name, err.to_string()));
                    continue;
                }
            };

            let Some(baseline) = device.baseline.as_ref() else {
                info!("{name}: baseline captured ({} routes)", snapshot.route_count());
                device.baseline = Some(snapshot);
                report.baselined.push(name);
                continue;
            };

            let changes = diff(baseline, &snapshot);
            if changes.is_empty() {
                debug!("{name}: no route changes");
                continue;
            }

            info!("{name}: {} route change(s) detected", changes.total_changes());
            let entry = ChangeLogEntry::new(device.session.device().clone(), changes);
            match sink.append_change_log(&entry) {
                Ok(()) => self.summary.changes_logged += 1,
                Err(err) => warn!("{name}: failed to write change log: {err}"),
            }
            device.baseline = Some(snapshot);
            report.changed.push(name);
        }
        report
    }

    /// Polls every interval until `cancel` fires, then closes all sessions.
    ///
    /// Cancellation is observed between cycles; a running cycle completes.
    pub async fn run(mut self, sink: &dyn PersistenceSink, cancel: CancellationToken) -> MonitorSummary {
        let interval = self.options.interval();
        info!(
            "monitoring {} device(s), tables {:?}, every {}s",
            self.devices.len(),
            self.options.tables,
            interval.as_secs()
        );
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            let report = self.run_cycle(sink).await;
            debug!(
                "cycle {}: polled {}, changed {}, failed {}",
                self.summary.cycles,
                report.polled,
                report.changed.len(),
                report.failed.len()
            );
        }
        info!("monitoring stopped, disconnecting");
        self.shutdown().await
    }

    /// Closes all sessions and returns the final summary.
    pub async fn shutdown(mut self) -> MonitorSummary {
        for device in &mut self.devices {
            device.session.close().await;
        }
        self.summary
    }
}

/// Starts a [`RouteMonitor`] and runs it until `cancel` fires.
pub async fn run_route_reconciliation<D: DeviceDriver>(
    driver: &D,
    devices: &[DeviceIdentity],
    credentials: &Credentials,
    options: MonitorOptions,
    sink: &dyn PersistenceSink,
    cancel: CancellationToken,
) -> Result<MonitorSummary, DeviceError> {
    let monitor = RouteMonitor::start(driver, devices, credentials, options).await?;
    Ok(monitor.run(sink, cancel).await)
}
