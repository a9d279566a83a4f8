//! Connectivity prober
//!
//! Answers "does an SSH server answer at this address" without creating a
//! session. Authentication is attempted with a throwaway password; the server
//! rejecting it is proof the path works.

use std::net::SocketAddr;
use std::sync::Arc;

use russh::client;
use serde::Serialize;
use tracing::{debug, info};

use super::algorithms::AlgorithmTier;
use super::client::{resolve_address, transport_config, with_fallback, ClientHandler};
use super::config::ConnectionConfig;
use super::error::SshError;
use crate::config::ManagerSettings;

/// Result of a reachability probe
#[derive(Debug, Serialize)]
pub struct ProbeOutcome {
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SshError>,
}

/// Probe `config.host:config.port`. Never creates a session.
pub async fn probe(config: &ConnectionConfig, settings: &ManagerSettings) -> ProbeOutcome {
    let outcome = match resolve_address(&config.host, config.port).await {
        Ok(addr) => {
            with_fallback(|tier| probe_once(config, settings, tier, addr))
                .await
                .map(|_| ())
        }
        Err(e) => Err(e),
    };

    let outcome = reachability(outcome);
    info!(
        "Probe {} -> reachable={}",
        config.address(),
        outcome.reachable
    );
    outcome
}

/// Authentication rejection means the server answered
pub fn reachability(result: Result<(), SshError>) -> ProbeOutcome {
    match result {
        Ok(()) => ProbeOutcome {
            reachable: true,
            error: None,
        },
        Err(e) if e.is_authentication() => ProbeOutcome {
            reachable: true,
            error: Some(e),
        },
        Err(e) => ProbeOutcome {
            reachable: false,
            error: Some(e),
        },
    }
}

async fn probe_once(
    config: &ConnectionConfig,
    settings: &ManagerSettings,
    tier: AlgorithmTier,
    addr: SocketAddr,
) -> Result<(), SshError> {
    let ssh_config = transport_config(settings, tier);
    let handler = ClientHandler::new(config.host.clone(), config.port);
    let probe_timeout = settings.probe_timeout();

    let attempt = async {
        let mut handle = client::connect(Arc::new(ssh_config), addr, handler).await?;

        let username = if config.username.is_empty() {
            "probe"
        } else {
            config.username.as_str()
        };
        let bogus = uuid::Uuid::new_v4().to_string();
        let result = handle.authenticate_password(username, bogus).await;

        // Always release the transport, whatever the server said
        let _ = handle
            .disconnect(russh::Disconnect::ByApplication, "Probe finished", "en")
            .await;

        if result?.success() {
            Ok(())
        } else {
            Err(SshError::Authentication(
                "Server rejected probe credentials".to_string(),
            ))
        }
    };

    let result = tokio::time::timeout(probe_timeout, attempt)
        .await
        .map_err(|_| {
            SshError::Timeout(format!(
                "No response within {}s",
                probe_timeout.as_secs()
            ))
        })?;

    debug!("Probe attempt on {:?} suite: {:?}", tier, result);
    result
}
