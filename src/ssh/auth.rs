//! Credential resolution and the authentication sequence
//!
//! Handles:
//! - Declared private keys (`~/` expanded, password doubles as passphrase)
//! - Password authentication
//! - Opportunistic default keys from `~/.ssh` (id_ed25519, id_ecdsa, id_rsa, id_dsa)
//!
//! The declared `authType` is advisory: a password config still offers a
//! discovered default key first, and a private-key config whose file cannot be
//! read falls back to the password when one is supplied.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::client::{self, Handle};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::PrivateKey;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::config::{AuthType, ConnectionConfig, Secret};
use super::error::SshError;

/// Where a private key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// `privateKeyPath` from the config
    Declared,
    /// First readable file among [`default_key_paths`]
    Discovered,
}

/// Private key file contents, not yet decoded
pub struct KeyMaterial {
    pub path: PathBuf,
    pub source: KeySource,
    pem: Zeroizing<String>,
}

impl KeyMaterial {
    fn decode(&self, passphrase: Option<&Secret>) -> Result<PrivateKey, SshError> {
        russh::keys::decode_secret_key(&self.pem, passphrase.map(Secret::expose)).map_err(|e| {
            SshError::KeyRead(format!("{}: {}", self.path.display(), e))
        })
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("path", &self.path)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Everything the authentication sequence may try, in order: key, then password
#[derive(Debug)]
pub struct Credentials {
    pub auth_type: Option<AuthType>,
    pub key: Option<KeyMaterial>,
    pub password: Option<Secret>,
}

impl Credentials {
    /// Whether password authentication is attempted after the key
    fn offers_password(&self) -> bool {
        self.password.is_some()
            && !(self.auth_type == Some(AuthType::PrivateKey)
                && self.key.as_ref().map(|k| k.source) == Some(KeySource::Declared))
    }
}

/// Resolve credentials against the user's real home directory
pub async fn resolve_credentials(config: &ConnectionConfig) -> Result<Credentials, SshError> {
    resolve_credentials_in(config, dirs::home_dir().as_deref()).await
}

/// Resolve credentials with an explicit home directory
pub async fn resolve_credentials_in(
    config: &ConnectionConfig,
    home: Option<&Path>,
) -> Result<Credentials, SshError> {
    let password = config.password.clone().filter(|p| !p.is_empty());

    let key = match config.auth_type {
        Some(AuthType::PrivateKey) => match config.private_key_path.as_deref() {
            Some(path) => {
                let expanded = expand_tilde_in(Path::new(path), home);
                match read_key(&expanded, KeySource::Declared).await {
                    Ok(key) => Some(key),
                    Err(e) if password.is_some() => {
                        warn!("{}; falling back to password authentication", e);
                        None
                    }
                    Err(e) => return Err(e),
                }
            }
            None if password.is_some() => {
                warn!("privateKey auth selected without a key path; using password");
                None
            }
            None => {
                return Err(SshError::KeyRead(
                    "privateKey auth selected but no key path was given".to_string(),
                ))
            }
        },
        Some(AuthType::Password) | None => discover_default_key(home).await,
    };

    if key.is_none() && password.is_none() {
        return Err(SshError::NoAuthMethod);
    }

    Ok(Credentials {
        auth_type: config.auth_type,
        key,
        password,
    })
}

async fn read_key(path: &Path, source: KeySource) -> Result<KeyMaterial, SshError> {
    let pem = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SshError::KeyRead(format!("{}: {}", path.display(), e)))?;
    Ok(KeyMaterial {
        path: path.to_path_buf(),
        source,
        pem: Zeroizing::new(pem),
    })
}

/// First readable default key, best-effort
pub async fn discover_default_key(home: Option<&Path>) -> Option<KeyMaterial> {
    let home = home?;
    for path in default_key_paths(home) {
        match read_key(&path, KeySource::Discovered).await {
            Ok(key) => {
                debug!("Discovered default key {:?}", path);
                return Some(key);
            }
            Err(_) => continue,
        }
    }
    None
}

/// Conventional key locations, most preferred first
pub fn default_key_paths(home: &Path) -> Vec<PathBuf> {
    let ssh_dir = home.join(".ssh");

    vec![
        ssh_dir.join("id_ed25519"),
        ssh_dir.join("id_ecdsa"),
        ssh_dir.join("id_rsa"),
        ssh_dir.join("id_dsa"),
    ]
}

/// Expand ~ to home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    expand_tilde_in(path, dirs::home_dir().as_deref())
}

fn expand_tilde_in(path: &Path, home: Option<&Path>) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(home) = home {
        if let Some(stripped) = path_str.strip_prefix("~/") {
            return home.join(stripped);
        } else if path_str == "~" {
            return home.to_path_buf();
        }
    }

    path.to_path_buf()
}

/// What the authentication sequence will offer, in order
pub struct AuthPlan<'a> {
    /// Decoded key and where it came from
    pub key: Option<(PrivateKey, &'a Path)>,
    /// Password to try after the key (or instead of it)
    pub password: Option<&'a Secret>,
}

impl std::fmt::Debug for AuthPlan<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthPlan")
            .field("key", &self.key.as_ref().map(|(_, path)| path))
            .field("password", &self.password.is_some())
            .finish()
    }
}

/// Decode the key and decide which methods are offered.
///
/// A default key that fails to decode is skipped. A declared key that fails
/// to decode (wrong passphrase, unsupported format) hands over to the
/// password when one is set, and is a `KeyRead` error otherwise.
pub fn plan_authentication(credentials: &Credentials) -> Result<AuthPlan<'_>, SshError> {
    let mut password = credentials
        .offers_password()
        .then_some(credentials.password.as_ref())
        .flatten();

    let key = match &credentials.key {
        None => None,
        Some(material) => {
            let passphrase = match material.source {
                KeySource::Declared => credentials.password.as_ref(),
                KeySource::Discovered => None,
            };
            match material.decode(passphrase) {
                Ok(key) => Some((key, material.path.as_path())),
                Err(e) if material.source == KeySource::Discovered => {
                    debug!("Skipping default key: {}", e);
                    None
                }
                Err(e) => match credentials.password.as_ref() {
                    Some(secret) => {
                        warn!("{}; falling back to password authentication", e);
                        password = Some(secret);
                        None
                    }
                    None => return Err(e),
                },
            }
        }
    };

    Ok(AuthPlan { key, password })
}

/// Run the authentication sequence on a connected transport.
///
/// Offers the key (if any) first, then the password (if planned).
pub async fn authenticate<H>(
    handle: &mut Handle<H>,
    username: &str,
    credentials: &Credentials,
) -> Result<(), SshError>
where
    H: client::Handler,
{
    let plan = plan_authentication(credentials)?;

    if let Some((key, path)) = plan.key {
        let key = PrivateKeyWithHashAlg::new(Arc::new(key), None);
        let result = handle.authenticate_publickey(username, key).await?;
        if result.success() {
            info!("Public key authentication succeeded ({:?})", path);
            return Ok(());
        }
        debug!("Public key {:?} rejected by server", path);
    }

    if let Some(password) = plan.password {
        let result = handle
            .authenticate_password(username, password.expose())
            .await?;
        if result.success() {
            info!("Password authentication succeeded for {}", username);
            return Ok(());
        }
    }

    Err(SshError::Authentication(
        "Authentication rejected by server".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn home_with_keys(names: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".ssh")).unwrap();
        for name in names {
            std::fs::write(dir.path().join(".ssh").join(name), "KEY").unwrap();
        }
        dir
    }

    #[test]
    fn test_expand_tilde() {
        let home = Path::new("/home/alice");
        assert_eq!(
            expand_tilde_in(Path::new("~/.ssh/id_rsa"), Some(home)),
            PathBuf::from("/home/alice/.ssh/id_rsa")
        );
        assert_eq!(expand_tilde_in(Path::new("~"), Some(home)), home);
        assert_eq!(
            expand_tilde_in(Path::new("/etc/key"), Some(home)),
            PathBuf::from("/etc/key")
        );
        assert_eq!(
            expand_tilde_in(Path::new("~/k"), None),
            PathBuf::from("~/k")
        );
    }

    #[test]
    fn test_default_key_paths() {
        let paths = default_key_paths(Path::new("/h"));
        assert_eq!(paths[0], PathBuf::from("/h/.ssh/id_ed25519"));
        assert!(paths.iter().all(|p| p.to_string_lossy().contains(".ssh")));
    }

    #[tokio::test]
    async fn test_discovery_uses_first_readable_key() {
        let home = home_with_keys(&["id_rsa", "id_ecdsa"]);
        let key = discover_default_key(Some(home.path())).await.unwrap();
        assert!(key.path.ends_with("id_ecdsa"));
        assert_eq!(key.source, KeySource::Discovered);
    }

    #[tokio::test]
    async fn test_password_config_opportunistically_attaches_default_key() {
        // authType is advisory: a password config still offers a discovered key first
        let home = home_with_keys(&["id_ed25519"]);
        let cfg = ConnectionConfig::with_password("h", 22, "u", "pw");
        let creds = resolve_credentials_in(&cfg, Some(home.path())).await.unwrap();
        assert_eq!(creds.key.as_ref().map(|k| k.source), Some(KeySource::Discovered));
        assert!(creds.offers_password());
    }

    #[tokio::test]
    async fn test_password_config_without_default_key() {
        let home = home_with_keys(&[]);
        let cfg = ConnectionConfig::with_password("h", 22, "u", "pw");
        let creds = resolve_credentials_in(&cfg, Some(home.path())).await.unwrap();
        assert!(creds.key.is_none());
        assert!(creds.offers_password());
    }

    #[tokio::test]
    async fn test_declared_key_read_with_tilde() {
        let home = home_with_keys(&["deploy"]);
        let cfg = ConnectionConfig::with_key("h", 22, "u", "~/.ssh/deploy", Some("pass".into()));
        let creds = resolve_credentials_in(&cfg, Some(home.path())).await.unwrap();
        let key = creds.key.as_ref().unwrap();
        assert_eq!(key.source, KeySource::Declared);
        assert!(key.path.starts_with(home.path()));
        // password is the passphrase here, not a second method
        assert!(!creds.offers_password());
    }

    #[tokio::test]
    async fn test_unreadable_key_falls_back_to_password() {
        let home = home_with_keys(&[]);
        let cfg = ConnectionConfig::with_key("h", 22, "u", "~/.ssh/missing", Some("pw".into()));
        let creds = resolve_credentials_in(&cfg, Some(home.path())).await.unwrap();
        assert!(creds.key.is_none());
        assert!(creds.offers_password());
    }

    #[tokio::test]
    async fn test_unreadable_key_without_password_fails() {
        let home = home_with_keys(&["id_ed25519"]);
        let cfg = ConnectionConfig::with_key("h", 22, "u", "~/.ssh/missing", None);
        let err = resolve_credentials_in(&cfg, Some(home.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::KeyRead(ref m) if m.contains("missing")));
    }

    #[tokio::test]
    async fn test_no_method_fails_fast() {
        let home = home_with_keys(&[]);
        let cfg = ConnectionConfig {
            host: "h".into(),
            port: 22,
            username: "u".into(),
            auth_type: None,
            password: None,
            private_key_path: None,
        };
        let err = resolve_credentials_in(&cfg, Some(home.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::NoAuthMethod));

        let err = resolve_credentials_in(&cfg, None).await.unwrap_err();
        assert!(matches!(err, SshError::NoAuthMethod));
    }

    #[tokio::test]
    async fn test_unset_auth_type_uses_discovery() {
        let home = home_with_keys(&["id_rsa"]);
        let cfg = ConnectionConfig {
            host: "h".into(),
            port: 22,
            username: "u".into(),
            auth_type: None,
            password: None,
            private_key_path: None,
        };
        let creds = resolve_credentials_in(&cfg, Some(home.path())).await.unwrap();
        assert!(creds.key.unwrap().path.ends_with("id_rsa"));
    }

    #[tokio::test]
    async fn test_undecodable_declared_key_hands_over_to_password() {
        let home = home_with_keys(&["deploy"]);
        let cfg = ConnectionConfig::with_key("h", 22, "u", "~/.ssh/deploy", Some("pw".into()));
        let creds = resolve_credentials_in(&cfg, Some(home.path())).await.unwrap();
        assert!(!creds.offers_password());

        let plan = plan_authentication(&creds).unwrap();
        assert!(plan.key.is_none());
        assert_eq!(plan.password.map(Secret::expose), Some("pw"));
    }

    #[tokio::test]
    async fn test_undecodable_declared_key_without_password_is_key_error() {
        let home = home_with_keys(&["deploy"]);
        let cfg = ConnectionConfig::with_key("h", 22, "u", "~/.ssh/deploy", None);
        let creds = resolve_credentials_in(&cfg, Some(home.path())).await.unwrap();

        let err = plan_authentication(&creds).unwrap_err();
        assert!(matches!(err, SshError::KeyRead(ref m) if m.contains("deploy")));
    }

    #[tokio::test]
    async fn test_undecodable_default_key_is_skipped() {
        let home = home_with_keys(&["id_ed25519"]);
        let cfg = ConnectionConfig::with_password("h", 22, "u", "pw");
        let creds = resolve_credentials_in(&cfg, Some(home.path())).await.unwrap();

        let plan = plan_authentication(&creds).unwrap();
        assert!(plan.key.is_none());
        assert!(plan.password.is_some());
    }

    #[tokio::test]
    async fn test_undecodable_default_key_alone_offers_nothing() {
        let home = home_with_keys(&["id_rsa"]);
        let cfg = ConnectionConfig {
            host: "h".into(),
            port: 22,
            username: "u".into(),
            auth_type: None,
            password: None,
            private_key_path: None,
        };
        let creds = resolve_credentials_in(&cfg, Some(home.path())).await.unwrap();

        let plan = plan_authentication(&creds).unwrap();
        assert!(plan.key.is_none());
        assert!(plan.password.is_none());
    }

    #[tokio::test]
    async fn test_empty_password_counts_as_absent() {
        let home = home_with_keys(&[]);
        let cfg = ConnectionConfig::with_password("h", 22, "u", "");
        let err = resolve_credentials_in(&cfg, Some(home.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::NoAuthMethod));
    }
}
