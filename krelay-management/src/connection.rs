//! Admin connection with probe-and-reconnect.

use crate::error::{ManagementError, Result};
use krelay_core::{BrokerError, Connection, Connector};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Owns the single admin connection of a facade.
///
/// The lock is held across the probe and the reconnect so only one caller
/// ever redials.
pub(crate) struct ConnectionManager {
    connector: Arc<dyn Connector>,
    brokers: Vec<String>,
    dial_timeout: Duration,
    current: Mutex<Option<Arc<dyn Connection>>>,
}

impl ConnectionManager {
    pub(crate) fn new(connector: Arc<dyn Connector>, brokers: Vec<String>, dial_timeout: Duration) -> Self {
        Self {
            connector,
            brokers,
            dial_timeout,
            current: Mutex::new(None),
        }
    }

    /// Try every broker address in order; the first that answers wins.
    async fn dial(&self) -> Result<Arc<dyn Connection>> {
        let mut last_error = None;
        for address in &self.brokers {
            let source = match tokio::time::timeout(self.dial_timeout, self.connector.dial(address)).await {
                Ok(Ok(connection)) => {
                    info!(address = %address, "Connected to broker");
                    return Ok(connection);
                },
                Ok(Err(err)) => err,
                Err(_) => BrokerError::network(format!("dial timed out after {:?}", self.dial_timeout)),
            };
            warn!(address = %address, error = %source, "Failed to dial broker");
            last_error = Some(ManagementError::Connect {
                address: address.clone(),
                source,
            });
        }
        Err(last_error.unwrap_or_else(|| ManagementError::Bootstrap {
            message: "missing broker address".to_string(),
        }))
    }

    /// Dial and replace the current connection.
    pub(crate) async fn connect(&self) -> Result<()> {
        let mut current = self.current.lock().await;
        let connection = self.dial().await?;
        if let Some(old) = current.replace(connection) {
            if let Err(err) = old.close().await {
                warn!(error = %err, "Failed to close replaced connection");
            }
        }
        Ok(())
    }

    /// A live connection: probe the current one and redial if the probe
    /// fails or there is none yet.
    pub(crate) async fn get(&self) -> Result<Arc<dyn Connection>> {
        let mut current = self.current.lock().await;
        if let Some(connection) = current.as_ref() {
            match connection.api_versions().await {
                Ok(()) => return Ok(Arc::clone(connection)),
                Err(err) => warn!(error = %err, "Broker liveness probe failed, reconnecting"),
            }
        }

        let connection = self.dial().await?;
        if let Some(dead) = current.replace(Arc::clone(&connection)) {
            if let Err(err) = dead.close().await {
                warn!(error = %err, "Failed to close dead connection");
            }
        }
        Ok(connection)
    }

    /// Close and forget the current connection.
    pub(crate) async fn close(&self) -> Result<()> {
        let connection = self.current.lock().await.take();
        if let Some(connection) = connection {
            connection.close().await?;
        }
        Ok(())
    }
}
