//! Engine endpoint resolution.

use std::fmt;
use std::path::{Path, PathBuf};

use url::{Host, Url};

use dockyard_core::DockyardError;

/// Pseudo-host used in URLs and `Host:` headers for Unix-socket endpoints.
pub const UNIX_HOST: &str = "unix.sock";

/// Scheme an endpoint was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Tcp,
    Http,
    Https,
    Unix,
}

impl Scheme {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "tcp" => Some(Self::Tcp),
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "unix" => Some(Self::Unix),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Http => "http",
            Self::Https => "https",
            Self::Unix => "unix",
        }
    }
}

/// Where a connection is opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// TCP host and port.
    Tcp { host: String, port: u16 },
    /// Filesystem path of a Unix domain socket.
    Unix(PathBuf),
}

/// A normalized engine endpoint.
///
/// Keeps the string the caller supplied alongside the canonical URL used to
/// build request URLs. `tcp://` endpoints are addressed as `http://`, and
/// bare `host[:port]` strings are read as `tcp://host[:port]`.
///
/// ```rust
/// use dockyard_transport::Endpoint;
///
/// let endpoint = Endpoint::parse("tcp://localhost:4243/").unwrap();
/// assert_eq!(endpoint.url_for("/_ping"), "http://localhost:4243/_ping");
///
/// let socket = Endpoint::parse("unix:///var/run/docker.sock").unwrap();
/// assert_eq!(socket.url_for("/_ping"), "/_ping");
/// assert_eq!(socket.placeholder_url("/_ping"), "http://unix.sock/_ping");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    original: String,
    scheme: Scheme,
    target: Target,
    /// Host header value.
    authority: String,
    /// Everything after `://`, trailing slashes trimmed.
    location: String,
    /// Path prefix requests are issued under, trailing slashes trimmed.
    base_path: String,
    secure: bool,
}

impl Endpoint {
    /// Parse and validate an endpoint string.
    pub fn parse(input: &str) -> Result<Self, DockyardError> {
        let invalid = || DockyardError::InvalidEndpoint(input.to_string());
        if input.is_empty() {
            return Err(invalid());
        }

        let (scheme, rest) = input.split_once("://").unwrap_or(("tcp", input));
        let scheme = Scheme::parse(scheme).ok_or_else(invalid)?;

        if scheme == Scheme::Unix {
            if rest.is_empty() {
                return Err(invalid());
            }
            return Ok(Self {
                original: input.to_string(),
                scheme,
                target: Target::Unix(PathBuf::from(rest)),
                authority: UNIX_HOST.to_string(),
                location: rest.to_string(),
                base_path: String::new(),
                secure: false,
            });
        }

        let web_scheme = if scheme == Scheme::Https { "https" } else { "http" };
        let url = Url::parse(&format!("{web_scheme}://{rest}")).map_err(|_| invalid())?;

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            _ => return Err(invalid()),
        };
        let port = url.port_or_known_default().ok_or_else(invalid)?;
        let host_str = url.host_str().unwrap_or(&host);
        let authority = match url.port() {
            Some(port) => format!("{host_str}:{port}"),
            None => host_str.to_string(),
        };

        Ok(Self {
            original: input.to_string(),
            scheme,
            target: Target::Tcp { host, port },
            authority,
            location: rest.trim_end_matches('/').to_string(),
            base_path: url.path().trim_end_matches('/').to_string(),
            secure: scheme == Scheme::Https,
        })
    }

    /// Address this endpoint over TLS.
    ///
    /// Unix-socket endpoints are never upgraded.
    #[must_use]
    pub fn secure(mut self) -> Self {
        if !self.is_unix() {
            self.secure = true;
        }
        self
    }

    /// The endpoint string as supplied.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// The scheme as supplied (`tcp` stays `tcp`).
    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    #[must_use]
    pub fn target(&self) -> &Target {
        &self.target
    }

    #[must_use]
    pub fn is_unix(&self) -> bool {
        matches!(self.target, Target::Unix(_))
    }

    /// Whether connections are wrapped in TLS.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Socket path of a Unix-socket endpoint.
    #[must_use]
    pub fn socket_path(&self) -> Option<&Path> {
        match &self.target {
            Target::Unix(path) => Some(path),
            Target::Tcp { .. } => None,
        }
    }

    /// Host name sent for SNI and certificate checks.
    #[must_use]
    pub fn host(&self) -> &str {
        match &self.target {
            Target::Tcp { host, .. } => host,
            Target::Unix(_) => UNIX_HOST,
        }
    }

    /// Value of the `Host:` header.
    #[must_use]
    pub fn host_header(&self) -> &str {
        &self.authority
    }

    /// Canonical base URL, without trailing slash.
    ///
    /// Empty for Unix-socket endpoints, whose URLs are bare paths.
    #[must_use]
    pub fn base_url(&self) -> String {
        match self.target {
            Target::Unix(_) => String::new(),
            Target::Tcp { .. } => {
                let scheme = if self.secure { "https" } else { "http" };
                format!("{scheme}://{}", self.location)
            }
        }
    }

    /// Full URL for `path`.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{path}", self.base_url())
    }

    /// URL for `path` under the fixed `unix.sock` pseudo-host.
    #[must_use]
    pub fn placeholder_url(&self, path: &str) -> String {
        format!("http://{UNIX_HOST}{path}")
    }

    /// Origin-form request target for `path`, under the endpoint's own path.
    #[must_use]
    pub fn request_target(&self, path: &str) -> String {
        format!("{}{path}", self.base_path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl std::str::FromStr for Endpoint {
    type Err = DockyardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
