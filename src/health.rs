//! Post-change protocol health checks and management-port reachability.

use std::time::Duration;

use log::{info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::Credentials;
use crate::device::{DeviceDriver, DeviceIdentity, Query, Session};

/// A protocol whose adjacency state can be verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolCheck {
    Bgp,
    Ospf,
}

impl ProtocolCheck {
    pub fn label(&self) -> &'static str {
        match self {
            ProtocolCheck::Bgp => "BGP",
            ProtocolCheck::Ospf => "OSPF",
        }
    }

    fn query(&self) -> Query {
        match self {
            ProtocolCheck::Bgp => Query::new(Query::BGP_SUMMARY),
            ProtocolCheck::Ospf => Query::new(Query::OSPF_NEIGHBOR),
        }
    }

    /// Peer state that must appear in the output.
    fn healthy_marker(&self) -> &'static str {
        match self {
            ProtocolCheck::Bgp => "Establ",
            ProtocolCheck::Ospf => "Full",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    /// The state could not be read.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolStatus {
    pub check: ProtocolCheck,
    pub state: HealthState,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub device: String,
    pub reachable: bool,
    /// Connection failure when the device was not reachable.
    pub error: Option<String>,
    pub statuses: Vec<ProtocolStatus>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.reachable
            && self
                .statuses
                .iter()
                .all(|status| status.state == HealthState::Healthy)
    }
}

/// Runs `checks` on an open session.
pub async fn verify_protocols<D: DeviceDriver>(
    session: &mut Session<'_, D>,
    checks: &[ProtocolCheck],
) -> Vec<ProtocolStatus> {
    let mut statuses = Vec::with_capacity(checks.len());
    for check in checks {
        let status = match session.query(check.query()).await {
            Ok(output) if output.as_text().contains(check.healthy_marker()) => ProtocolStatus {
                check: *check,
                state: HealthState::Healthy,
                detail: format!("{} is {}", check.label(), established(check)),
            },
            Ok(_) => ProtocolStatus {
                check: *check,
                state: HealthState::Degraded,
                detail: format!("{} is NOT {}", check.label(), established(check)),
            },
            Err(err) => ProtocolStatus {
                check: *check,
                state: HealthState::Unknown,
                detail: err.to_string(),
            },
        };
        statuses.push(status);
    }
    statuses
}

fn established(check: &ProtocolCheck) -> &'static str {
    match check {
        ProtocolCheck::Bgp => "Established",
        ProtocolCheck::Ospf => "Full",
    }
}

/// Checks protocol health on every device.
pub async fn check_protocol_health<D: DeviceDriver>(
    driver: &D,
    devices: &[DeviceIdentity],
    credentials: &Credentials,
    checks: &[ProtocolCheck],
) -> Vec<HealthReport> {
    let mut reports = Vec::with_capacity(devices.len());
    for device in devices {
        let report = match Session::open(driver, device, credentials).await {
            Ok(mut session) => {
                let statuses = verify_protocols(&mut session, checks).await;
                session.close().await;
                HealthReport {
                    device: device.name.clone(),
                    reachable: true,
                    error: None,
                    statuses,
                }
            }
            Err(err) => {
                warn!("{device}: health check skipped: {err}");
                HealthReport {
                    device: device.name.clone(),
                    reachable: false,
                    error: Some(err.to_string()),
                    statuses: Vec::new(),
                }
            }
        };
        for status in &report.statuses {
            info!("{}: {}", report.device, status.detail);
        }
        reports.push(report);
    }
    reports
}

/// Whether a device's management port accepted a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reachability {
    pub device: String,
    pub reachable: bool,
    pub detail: String,
}

/// Opens and drops a TCP connection to each device's management port.
///
/// No login is attempted, so this works before credentials are known.
pub async fn check_reachability(devices: &[DeviceIdentity], limit: Duration) -> Vec<Reachability> {
    let mut results = Vec::with_capacity(devices.len());
    for device in devices {
        let target = (device.address.as_str(), device.port);
        let (reachable, detail) = match timeout(limit, TcpStream::connect(target)).await {
            Ok(Ok(_)) => (true, format!("{}:{} is reachable", device.address, device.port)),
            Ok(Err(err)) => (false, format!("{}:{} refused: {err}", device.address, device.port)),
            Err(_) => (
                false,
                format!(
                    "{}:{} did not answer within {}s",
                    device.address,
                    device.port,
                    limit.as_secs()
                ),
            ),
        };
        if reachable {
            info!("{device}: {detail}");
        } else {
            warn!("{device}: {detail}");
        }
        results.push(Reachability {
            device: device.name.clone(),
            reachable,
            detail,
        });
    }
    results
}
