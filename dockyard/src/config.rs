//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use dockyard_core::{ApiVersion, DockyardError};
use dockyard_transport::{DialerConfig, PoolConfig, TlsMaterial};

/// Default engine endpoint when `DOCKER_HOST` is unset.
pub const DEFAULT_HOST: &str = "unix:///var/run/docker.sock";

/// Configuration for a [`Client`](crate::Client).
///
/// ```rust
/// use std::time::Duration;
/// use dockyard::ClientConfig;
///
/// let config = ClientConfig::new("tcp://localhost:2375")
///     .timeout(Duration::from_secs(30))
///     .skip_server_version_check(true);
/// assert!(config.api_version.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Endpoint string, e.g. `unix:///var/run/docker.sock`.
    pub endpoint: String,

    /// TLS material. Secure TCP endpoints use it; Unix sockets ignore it.
    pub tls: Option<TlsMaterial>,

    /// API version requests are prefixed with.
    pub api_version: Option<ApiVersion>,

    /// Skip the lazy `/version` check and the path prefix.
    pub skip_server_version_check: bool,

    /// Upper bound on each buffered request.
    pub timeout: Option<Duration>,

    /// Dialing settings.
    pub dialer: DialerConfig,

    /// Connection pool settings.
    pub pool: PoolConfig,
}

impl ClientConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            tls: None,
            api_version: None,
            skip_server_version_check: true,
            timeout: None,
            dialer: DialerConfig::default(),
            pool: PoolConfig::default(),
        }
    }

    #[must_use]
    pub fn tls(mut self, material: TlsMaterial) -> Self {
        self.tls = Some(material);
        self
    }

    /// Request a specific API version and turn the server check on.
    #[must_use]
    pub fn api_version(mut self, version: ApiVersion) -> Self {
        self.api_version = Some(version);
        self.skip_server_version_check = false;
        self
    }

    #[must_use]
    pub fn skip_server_version_check(mut self, skip: bool) -> Self {
        self.skip_server_version_check = skip;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn dialer(mut self, dialer: DialerConfig) -> Self {
        self.dialer = dialer;
        self
    }

    #[must_use]
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}

/// Engine settings read from the environment.
///
/// | variable            | meaning                                   |
/// |---------------------|-------------------------------------------|
/// | `DOCKER_HOST`       | endpoint, default [`DEFAULT_HOST`]        |
/// | `DOCKER_TLS_VERIFY` | non-empty turns TLS on                    |
/// | `DOCKER_CERT_PATH`  | directory of PEM files, `$HOME/.docker`   |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub host: String,
    pub tls_verify: bool,
    pub cert_path: PathBuf,
}

impl EnvConfig {
    /// Read the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, which returns a variable's value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let host = non_empty("DOCKER_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let tls_verify = non_empty("DOCKER_TLS_VERIFY").is_some();
        let cert_path = non_empty("DOCKER_CERT_PATH").map_or_else(
            || PathBuf::from(lookup("HOME").unwrap_or_default()).join(".docker"),
            PathBuf::from,
        );

        Self {
            host,
            tls_verify,
            cert_path,
        }
    }

    /// Client configuration for these settings.
    ///
    /// With TLS on, `cert.pem`, `key.pem` and `ca.pem` are read from
    /// `cert_path`.
    pub fn client_config(&self) -> Result<ClientConfig, DockyardError> {
        let config = ClientConfig::new(self.host.clone());
        if self.tls_verify {
            Ok(config.tls(TlsMaterial::from_dir(&self.cert_path)?))
        } else {
            Ok(config)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let env = EnvConfig::from_lookup(lookup(&[("HOME", "/home/gopher")]));
        assert_eq!(
            env,
            EnvConfig {
                host: DEFAULT_HOST.to_string(),
                tls_verify: false,
                cert_path: PathBuf::from("/home/gopher/.docker"),
            }
        );
    }

    #[test]
    fn test_explicit_values() {
        let env = EnvConfig::from_lookup(lookup(&[
            ("DOCKER_HOST", "tcp://localhost:2376"),
            ("DOCKER_TLS_VERIFY", "1"),
            ("DOCKER_CERT_PATH", "/certs"),
        ]));
        assert_eq!(env.host, "tcp://localhost:2376");
        assert!(env.tls_verify);
        assert_eq!(env.cert_path, PathBuf::from("/certs"));
    }

    #[test]
    fn test_empty_values_fall_back() {
        let env = EnvConfig::from_lookup(lookup(&[
            ("DOCKER_HOST", ""),
            ("DOCKER_TLS_VERIFY", ""),
        ]));
        assert_eq!(env.host, DEFAULT_HOST);
        assert!(!env.tls_verify);
    }

    #[test]
    fn test_client_config_without_tls() {
        let env = EnvConfig::from_lookup(lookup(&[("DOCKER_HOST", "tcp://localhost:2375")]));
        let config = env.client_config().unwrap();
        assert_eq!(config.endpoint, "tcp://localhost:2375");
        assert!(config.tls.is_none());
        assert!(config.skip_server_version_check);
    }

    #[test]
    fn test_client_config_missing_certs() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().to_string_lossy().into_owned();
        let env = EnvConfig::from_lookup(lookup(&[
            ("DOCKER_TLS_VERIFY", "1"),
            ("DOCKER_CERT_PATH", cert_path.as_str()),
        ]));
        assert!(matches!(
            env.client_config(),
            Err(DockyardError::InvalidCertificate(_))
        ));
    }

    #[test]
    fn test_api_version_turns_check_on() {
        let config = ClientConfig::new("localhost").api_version("1.41".parse().unwrap());
        assert!(!config.skip_server_version_check);
    }
}
