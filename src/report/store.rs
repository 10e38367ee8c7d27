use std::time::Duration;

use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::ReportingConfig;

use super::reporter::Emission;

/// Placeholder the realtime database replaces with its own clock on write.
struct ServerTimestamp;

impl Serialize for ServerTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(".sv", "timestamp")?;
        map.end()
    }
}

#[derive(serde::Serialize)]
struct StatusRecord {
    motion_detected: bool,
    humans_present: bool,
    timestamp: ServerTimestamp,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("status write failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Write-only client for the `detection_status` record. Every write
/// overwrites the whole record; there is no read path.
pub struct StatusStore {
    client: reqwest::Client,
    endpoint: String,
}

impl StatusStore {
    pub fn new(config: &ReportingConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.write_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint_url(&config.database_url, config.auth_token.as_deref()),
        })
    }

    pub async fn write(&self, emission: Emission) -> Result<(), StoreError> {
        let record = StatusRecord {
            motion_detected: emission.motion,
            humans_present: emission.presence,
            timestamp: ServerTimestamp,
        };

        self.client
            .put(&self.endpoint)
            .json(&record)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

fn endpoint_url(database_url: &str, auth_token: Option<&str>) -> String {
    let base = database_url.trim_end_matches('/');
    match auth_token {
        Some(token) => format!("{base}/detection_status.json?auth={token}"),
        None => format!("{base}/detection_status.json"),
    }
}

/// Drain emissions into the store. Failures are logged and dropped: the
/// reporter has already advanced, and the next change or heartbeat carries
/// fresher data than a retry would.
pub fn spawn_writer(
    store: StatusStore,
    mut emissions: mpsc::Receiver<Emission>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(emission) = emissions.recv().await {
            match store.write(emission).await {
                Ok(()) => tracing::debug!(
                    motion = emission.motion,
                    humans = emission.presence,
                    "status written"
                ),
                Err(e) => tracing::warn!(error = %e, "status write failed"),
            }
        }
        tracing::debug!("status writer stopped");
    })
}
