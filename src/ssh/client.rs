//! Connection negotiator built on russh
//!
//! Opens one authenticated transport for a `ConnectionConfig`:
//! credentials are resolved before any network traffic, the primary
//! algorithm suite is tried first, and a negotiation failure triggers exactly
//! one more attempt on a fresh transport with the fallback suite.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use russh::client::{self, Handle};
use russh::keys::PublicKey;
use tracing::{debug, info, warn};

use super::algorithms::AlgorithmTier;
use super::auth::{authenticate, resolve_credentials, Credentials};
use super::config::ConnectionConfig;
use super::error::SshError;
use crate::config::ManagerSettings;

/// An authenticated transport ready for channels
pub struct Connected {
    pub handle: Handle<ClientHandler>,
    pub tier: AlgorithmTier,
}

/// SSH connection negotiator
pub struct SshClient {
    config: ConnectionConfig,
    settings: ManagerSettings,
}

impl SshClient {
    pub fn new(config: ConnectionConfig, settings: ManagerSettings) -> Self {
        Self { config, settings }
    }

    /// Connect and authenticate, falling back to the legacy suite if needed
    pub async fn connect(&self) -> Result<Connected, SshError> {
        let credentials = resolve_credentials(&self.config).await?;
        let socket_addr = resolve_address(&self.config.host, self.config.port).await?;

        info!(
            "Connecting to SSH server at {} ({}) as {}",
            self.config.address(),
            socket_addr,
            self.config.username
        );

        let (handle, tier) = with_fallback(|tier| {
            self.connect_with_tier(tier, socket_addr, &credentials)
        })
        .await?;

        info!(
            "SSH connection to {} ready ({:?} algorithm suite)",
            self.config.address(),
            tier
        );

        Ok(Connected { handle, tier })
    }

    /// One full negotiation attempt on a fresh transport
    async fn connect_with_tier(
        &self,
        tier: AlgorithmTier,
        socket_addr: SocketAddr,
        credentials: &Credentials,
    ) -> Result<Handle<ClientHandler>, SshError> {
        let ssh_config = transport_config(&self.settings, tier);
        let handler = ClientHandler::new(self.config.host.clone(), self.config.port);
        let ready_timeout = self.settings.ready_timeout();

        let attempt = async {
            let mut handle = client::connect(Arc::new(ssh_config), socket_addr, handler).await?;
            debug!("SSH handshake completed ({:?} suite)", tier);

            authenticate(&mut handle, &self.config.username, credentials).await?;
            Ok::<_, SshError>(handle)
        };

        tokio::time::timeout(ready_timeout, attempt)
            .await
            .map_err(|_| {
                SshError::Timeout(format!(
                    "No ready response within {}s",
                    ready_timeout.as_secs()
                ))
            })?
    }
}

/// russh client config for one tier: keepalive on, no inactivity timeout
pub fn transport_config(settings: &ManagerSettings, tier: AlgorithmTier) -> client::Config {
    client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(settings.keepalive_interval()),
        keepalive_max: settings.keepalive_max,
        preferred: tier.preferred(),
        ..Default::default()
    }
}

/// Run `attempt` with the primary suite and, only on a negotiation failure,
/// once more with the fallback suite. The fallback's error wins if both fail.
pub async fn with_fallback<T, F, Fut>(mut attempt: F) -> Result<(T, AlgorithmTier), SshError>
where
    F: FnMut(AlgorithmTier) -> Fut,
    Fut: Future<Output = Result<T, SshError>>,
{
    match attempt(AlgorithmTier::Primary).await {
        Ok(value) => Ok((value, AlgorithmTier::Primary)),
        Err(e) if e.is_algorithm_negotiation() => {
            warn!("Primary algorithm suite rejected ({}); retrying with fallback suite", e);
            attempt(AlgorithmTier::Fallback)
                .await
                .map(|value| (value, AlgorithmTier::Fallback))
        }
        Err(e) => Err(e),
    }
}

/// Resolve "host:port" to the first socket address
pub async fn resolve_address(host: &str, port: u16) -> Result<SocketAddr, SshError> {
    let addr = format!("{}:{}", host, port);
    let resolved = tokio::net::lookup_host(&addr)
        .await
        .map_err(|e| SshError::HostUnresolvable(format!("{}: {}", addr, e)))?
        .next()
        .ok_or_else(|| SshError::HostUnresolvable(format!("No address found for {}", addr)));
    resolved
}

/// Client handler for russh callbacks
///
/// Host keys are accepted; the fingerprint algorithm is logged so a changed
/// key is at least visible in the logs.
pub struct ClientHandler {
    host: String,
    port: u16,
}

impl ClientHandler {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            "Accepting {} host key for {}:{}",
            server_public_key.algorithm().as_str(),
            self.host,
            self.port
        );
        Ok(true)
    }
}
