//! Device facts and pre-change baseline captures.
//!
//! A baseline records what a device looks like before a maintenance window:
//! its facts, the inet.0 routing table and the raw output of a fixed set of
//! operational sections. Sections fail independently; only a broken channel
//! abandons the device.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::Credentials;
use crate::device::{DeviceDriver, DeviceIdentity, Query, Session};
use crate::error::DeviceError;
use crate::route::{RouteTable, parse_route_table};

static VERSION_FIELD: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"(?m)^\s*(Hostname|Model|Junos):\s*(\S+)\s*$") {
        Ok(re) => re,
        Err(err) => panic!("invalid VERSION_FIELD regex: {err}"),
    });

// Releases that predate the `Junos:` line only print package versions.
static PACKAGE_VERSION: Lazy<Regex> =
    Lazy::new(|| match Regex::new(r"(?m)^JUNOS .*\[([^\]]+)\]\s*$") {
        Ok(re) => re,
        Err(err) => panic!("invalid PACKAGE_VERSION regex: {err}"),
    });

static CHASSIS_SERIAL: Lazy<Regex> = Lazy::new(|| match Regex::new(r"(?m)^Chassis\s+(\S+)") {
    Ok(re) => re,
    Err(err) => panic!("invalid CHASSIS_SERIAL regex: {err}"),
});

/// Table captured in every baseline.
pub const BASELINE_ROUTE_TABLE: &str = "inet.0";

/// Identity facts of one device. Fields the device did not report are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFacts {
    pub hostname: Option<String>,
    pub model: Option<String>,
    pub version: Option<String>,
    pub serial_number: Option<String>,
}

impl DeviceFacts {
    /// Parses `show version` and, when available, `show chassis hardware`.
    pub fn parse(version: &str, hardware: Option<&str>) -> Self {
        let mut facts = DeviceFacts::default();
        for caps in VERSION_FIELD.captures_iter(version) {
            let value = Some(caps[2].to_string());
            match &caps[1] {
                "Hostname" => facts.hostname = value,
                "Model" => facts.model = value,
                _ => facts.version = value,
            }
        }
        if facts.version.is_none() {
            facts.version = PACKAGE_VERSION
                .captures(version)
                .map(|caps| caps[1].to_string());
        }
        facts.serial_number = hardware
            .and_then(|text| CHASSIS_SERIAL.captures(text))
            .map(|caps| caps[1].to_string());
        facts
    }
}

/// Facts of one device, or why they could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactsReport {
    pub device: String,
    pub facts: Option<DeviceFacts>,
    pub error: Option<String>,
}

/// Reads facts over an open session. The serial number is optional: a
/// failed hardware query leaves it unset.
pub async fn read_facts<D: DeviceDriver>(
    session: &mut Session<'_, D>,
) -> Result<DeviceFacts, DeviceError> {
    let version = session.query(Query::new(Query::VERSION)).await?.as_text();
    let hardware = match session.query(Query::new(Query::CHASSIS_HARDWARE)).await {
        Ok(output) => Some(output.as_text()),
        Err(err) if err.is_transport() => return Err(err),
        Err(err) => {
            warn!("{}: chassis hardware unavailable: {err}", session.device());
            None
        }
    };
    Ok(DeviceFacts::parse(&version, hardware.as_deref()))
}

/// Collects facts from every device.
pub async fn collect_facts<D: DeviceDriver>(
    driver: &D,
    devices: &[DeviceIdentity],
    credentials: &Credentials,
) -> Vec<FactsReport> {
    let mut reports = Vec::with_capacity(devices.len());
    for device in devices {
        let result = match Session::open(driver, device, credentials).await {
            Ok(mut session) => {
                let facts = read_facts(&mut session).await;
                session.close().await;
                facts
            }
            Err(err) => Err(err),
        };
        let report = match result {
            Ok(facts) => {
                info!(
                    "{device}: hostname={} model={} version={}",
                    facts.hostname.as_deref().unwrap_or("unknown"),
                    facts.model.as_deref().unwrap_or("unknown"),
                    facts.version.as_deref().unwrap_or("unknown"),
                );
                FactsReport {
                    device: device.name.clone(),
                    facts: Some(facts),
                    error: None,
                }
            }
            Err(err) => {
                warn!("{device}: failed to collect facts: {err}");
                FactsReport {
                    device: device.name.clone(),
                    facts: None,
                    error: Some(err.to_string()),
                }
            }
        };
        reports.push(report);
    }
    reports
}

/// Operational section captured verbatim in a baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineSection {
    Environment,
    Power,
    Optics,
    OspfInterfaces,
    OspfNeighbors,
    BgpSummary,
    InterfaceDescriptions,
}

impl BaselineSection {
    pub const ALL: [BaselineSection; 7] = [
        BaselineSection::Environment,
        BaselineSection::Power,
        BaselineSection::Optics,
        BaselineSection::OspfInterfaces,
        BaselineSection::OspfNeighbors,
        BaselineSection::BgpSummary,
        BaselineSection::InterfaceDescriptions,
    ];

    fn query(&self) -> Query {
        let name = match self {
            BaselineSection::Environment => Query::ENVIRONMENT,
            BaselineSection::Power => Query::POWER,
            BaselineSection::Optics => Query::OPTICS,
            BaselineSection::OspfInterfaces => Query::OSPF_INTERFACE,
            BaselineSection::OspfNeighbors => Query::OSPF_NEIGHBOR,
            BaselineSection::BgpSummary => Query::BGP_SUMMARY,
            BaselineSection::InterfaceDescriptions => Query::INTERFACE_DESCRIPTIONS,
        };
        Query::new(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionCapture {
    Captured(String),
    Failed(String),
}

/// Snapshot of one device taken before a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineReport {
    pub device: DeviceIdentity,
    pub captured_at: DateTime<Local>,
    pub facts: Option<DeviceFacts>,
    pub routes: Option<RouteTable>,
    pub sections: BTreeMap<BaselineSection, SectionCapture>,
    /// Set when the device could not be reached or the channel broke.
    pub error: Option<String>,
}

impl BaselineReport {
    fn new(device: &DeviceIdentity) -> Self {
        Self {
            device: device.clone(),
            captured_at: Local::now(),
            facts: None,
            routes: None,
            sections: BTreeMap::new(),
            error: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none()
            && self.facts.is_some()
            && self.routes.is_some()
            && self
                .sections
                .values()
                .all(|capture| matches!(capture, SectionCapture::Captured(_)))
    }

    pub fn to_json(&self) -> Result<String, DeviceError> {
        serde_json::to_string_pretty(self)
            .map_err(|err| DeviceError::PersistError(format!("cannot encode baseline: {err}")))
    }
}

/// Fills `report` from an open session. Stops at the first transport error.
async fn capture<D: DeviceDriver>(
    session: &mut Session<'_, D>,
    sections: &[BaselineSection],
    report: &mut BaselineReport,
) -> Result<(), DeviceError> {
    match read_facts(session).await {
        Ok(facts) => report.facts = Some(facts),
        Err(err) if err.is_transport() => return Err(err),
        Err(err) => warn!("{}: facts unavailable: {err}", session.device()),
    }

    match session.query(Query::route_table(BASELINE_ROUTE_TABLE)).await {
        Ok(output) => {
            report.routes = Some(parse_route_table(BASELINE_ROUTE_TABLE, &output.as_text()))
        }
        Err(err) if err.is_transport() => return Err(err),
        Err(err) => warn!("{}: {BASELINE_ROUTE_TABLE} unavailable: {err}", session.device()),
    }

    for section in sections {
        let capture = match session.query(section.query()).await {
            Ok(output) => SectionCapture::Captured(output.as_text()),
            Err(err) if err.is_transport() => return Err(err),
            Err(err) => SectionCapture::Failed(err.to_string()),
        };
        report.sections.insert(*section, capture);
    }
    Ok(())
}

/// Captures a baseline of every device.
pub async fn collect_baselines<D: DeviceDriver>(
    driver: &D,
    devices: &[DeviceIdentity],
    credentials: &Credentials,
    sections: &[BaselineSection],
) -> Vec<BaselineReport> {
    let mut reports = Vec::with_capacity(devices.len());
    for device in devices {
        let mut report = BaselineReport::new(device);
        match Session::open(driver, device, credentials).await {
            Ok(mut session) => {
                if let Err(err) = capture(&mut session, sections, &mut report).await {
                    warn!("{device}: baseline abandoned: {err}");
                    report.error = Some(err.to_string());
                }
                session.close().await;
            }
            Err(err) => {
                warn!("{device}: baseline skipped: {err}");
                report.error = Some(err.to_string());
            }
        }
        if report.error.is_none() {
            info!(
                "{device}: baseline captured, {} routes, {} sections",
                report.routes.as_ref().map_or(0, RouteTable::len),
                report.sections.len()
            );
        }
        reports.push(report);
    }
    reports
}
