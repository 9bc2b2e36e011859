//! Full-configuration backups.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::Credentials;
use crate::device::{DeviceDriver, DeviceIdentity, Query, Session};
use crate::error::DeviceError;
use crate::persist::{BackupArtifact, FULL_SCOPE, PersistenceSink};
use crate::transaction::ConfigTransaction;

/// Result of backing up one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupOutcome {
    pub device: String,
    pub location: Option<String>,
    pub error: Option<String>,
}

impl BackupOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Reads the full configuration under the configuration lock.
async fn capture<D: DeviceDriver>(session: &mut Session<'_, D>) -> Result<String, DeviceError> {
    let mut tx = ConfigTransaction::begin(session).await?;
    let read = tx.session().query(Query::configuration(None)).await;
    let (_, _, unlocked) = tx.release().await;
    let text = read?.as_text();
    if let Err(err) = unlocked {
        warn!("configuration captured but unlock failed: {err}");
    }
    if text.trim().is_empty() {
        return Err(DeviceError::QueryError {
            query: Query::CONFIGURATION.to_string(),
            reason: "device returned an empty configuration".to_string(),
        });
    }
    Ok(text)
}

async fn backup_device<D: DeviceDriver>(
    driver: &D,
    device: &DeviceIdentity,
    credentials: &Credentials,
    sink: &dyn PersistenceSink,
) -> Result<String, DeviceError> {
    let mut session = Session::open(driver, device, credentials).await?;
    let captured = capture(&mut session).await;
    session.close().await;
    let artifact = BackupArtifact::new(device, FULL_SCOPE, captured?);
    sink.write_backup(&artifact)
}

/// Captures and stores the full configuration of every device.
pub async fn backup_configuration<D: DeviceDriver>(
    driver: &D,
    devices: &[DeviceIdentity],
    credentials: &Credentials,
    sink: &dyn PersistenceSink,
) -> Vec<BackupOutcome> {
    let mut outcomes = Vec::with_capacity(devices.len());
    for device in devices {
        let outcome = match backup_device(driver, device, credentials, sink).await {
            Ok(location) => {
                info!("{device}: configuration saved to {location}");
                BackupOutcome {
                    device: device.name.clone(),
                    location: Some(location),
                    error: None,
                }
            }
            Err(err) => {
                warn!("{device}: backup failed: {err}");
                BackupOutcome {
                    device: device.name.clone(),
                    location: None,
                    error: Some(err.to_string()),
                }
            }
        };
        outcomes.push(outcome);
    }
    outcomes
}
