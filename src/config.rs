use std::path::PathBuf;
use std::time::Duration;

use aws_credential_types::provider::SharedCredentialsProvider;
use url::Url;

use crate::auth::CredentialSource;
use crate::error::{AdapterError, Result};
use crate::region::{build_hostname, is_cluster_id, parse_region, region_from_env};

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5432";
pub const DEFAULT_BACKEND_PORT: u16 = 5432;
pub const DEFAULT_USER: &str = "admin";
pub const DEFAULT_DATABASE: &str = "postgres";
/// 15 minutes, the longest validity DSQL accepts for a connect token.
pub const DEFAULT_TOKEN_DURATION: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Presigned tokens cannot outlive seven days.
pub const MAX_TOKEN_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// `application_name` sent to the backend on every session.
pub const APPLICATION_NAME: &str = concat!("dsql-pgadapter/", env!("CARGO_PKG_VERSION"));

/// TLS settings for the backend leg. TLS itself is not optional.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// PEM bundle to trust instead of the built-in Mozilla roots.
    pub ca_pem_path: Option<PathBuf>,
    /// Name to validate the backend certificate against, if not the endpoint.
    pub sni_hostname: Option<String>,
}

/// Adapter configuration as supplied by the caller. Unset fields take defaults
/// during [`ConfigInput::resolve`].
#[derive(Debug, Clone, Default)]
pub struct AdapterConfig {
    /// Cluster endpoint hostname, or a bare cluster id. Required.
    pub endpoint: String,
    /// Optional when it can be parsed from `endpoint` or found in the environment.
    pub region: Option<String>,
    pub listen_addr: Option<String>,
    /// User for clients that send no `user` parameter.
    pub default_user: Option<String>,
    /// Database for clients that send no `database` parameter.
    pub default_database: Option<String>,
    pub backend_port: Option<u16>,
    pub token_duration: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub tls: TlsConfig,
    /// AWS shared-config profile to take credentials from.
    pub profile: Option<String>,
    /// Credentials provider to use instead of the profile or default chain.
    pub credentials_provider: Option<SharedCredentialsProvider>,
}

impl AdapterConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Parse `postgres://[user@]host[:port][/database][?params]`.
    ///
    /// Recognised query parameters: `region`, `profile`, `tokenDurationSecs`,
    /// `connectTimeoutSecs`, `listen`, `sslrootcert`, `sslsni`.
    pub fn from_connection_string(s: &str) -> Result<Self> {
        let url =
            Url::parse(s).map_err(|e| AdapterError::Config(format!("invalid connection string: {e}")))?;

        match url.scheme() {
            "postgres" | "postgresql" => {}
            other => {
                return Err(AdapterError::Config(format!(
                    "unsupported connection string scheme: {other}"
                )));
            }
        }

        let mut cfg = AdapterConfig::new(url.host_str().unwrap_or_default());
        if !url.username().is_empty() {
            cfg.default_user = Some(url.username().to_string());
        }
        let db = url.path().trim_start_matches('/');
        if !db.is_empty() {
            cfg.default_database = Some(db.to_string());
        }
        cfg.backend_port = url.port();

        for (k, v) in url.query_pairs() {
            match k.as_ref() {
                "region" => cfg.region = Some(v.into_owned()),
                "profile" => cfg.profile = Some(v.into_owned()),
                "tokenDurationSecs" => {
                    cfg.token_duration = Some(Duration::from_secs(parse_secs(&k, &v)?))
                }
                "connectTimeoutSecs" => {
                    cfg.connect_timeout = Some(Duration::from_secs(parse_secs(&k, &v)?))
                }
                "listen" => cfg.listen_addr = Some(v.into_owned()),
                "sslrootcert" => cfg.tls.ca_pem_path = Some(PathBuf::from(v.as_ref())),
                "sslsni" => cfg.tls.sni_hostname = Some(v.into_owned()),
                _ => tracing::debug!(param = %k, "ignoring connection string parameter"),
            }
        }

        Ok(cfg)
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|e| AdapterError::Config(format!("invalid {key}: {e}")))
}

/// Either structured fields or a connection string; both resolve the same way.
#[derive(Debug, Clone)]
pub enum ConfigInput {
    Fields(AdapterConfig),
    ConnectionString(String),
}

impl From<AdapterConfig> for ConfigInput {
    fn from(cfg: AdapterConfig) -> Self {
        ConfigInput::Fields(cfg)
    }
}

impl From<String> for ConfigInput {
    fn from(s: String) -> Self {
        ConfigInput::ConnectionString(s)
    }
}

impl From<&str> for ConfigInput {
    fn from(s: &str) -> Self {
        ConfigInput::ConnectionString(s.to_string())
    }
}

impl ConfigInput {
    /// Normalize to [`AdapterConfig`], validate, and apply defaults.
    pub fn resolve(self) -> Result<ResolvedConfig> {
        self.resolve_with_env_region(region_from_env())
    }

    pub(crate) fn resolve_with_env_region(self, env_region: Option<String>) -> Result<ResolvedConfig> {
        let cfg = match self {
            ConfigInput::Fields(cfg) => cfg,
            ConfigInput::ConnectionString(s) => AdapterConfig::from_connection_string(&s)?,
        };
        ResolvedConfig::from_config(cfg, env_region)
    }
}

/// Validated configuration with every default applied.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub endpoint: String,
    pub region: String,
    pub listen_addr: String,
    pub default_user: String,
    pub default_database: String,
    pub backend_port: u16,
    pub token_duration: Duration,
    pub connect_timeout: Duration,
    pub tls: TlsConfig,
    pub profile: Option<String>,
    pub credentials_provider: Option<SharedCredentialsProvider>,
}

impl ResolvedConfig {
    fn from_config(cfg: AdapterConfig, env_region: Option<String>) -> Result<Self> {
        let endpoint = cfg.endpoint.trim().to_string();
        if endpoint.is_empty() {
            return Err(AdapterError::Config("endpoint is required".into()));
        }

        let explicit_region = cfg.region.filter(|r| !r.is_empty());
        let (endpoint, region) = if is_cluster_id(&endpoint) {
            let region = explicit_region.or(env_region).ok_or_else(|| {
                AdapterError::Config("region is required when endpoint is a cluster id".into())
            })?;
            (build_hostname(&endpoint, &region), region)
        } else {
            let region = match explicit_region {
                Some(r) => r,
                None => match parse_region(&endpoint) {
                    Ok(r) => r,
                    Err(e) => env_region.ok_or_else(|| {
                        AdapterError::Config(format!(
                            "could not parse region from endpoint and region not provided: {e}"
                        ))
                    })?,
                },
            };
            (endpoint, region)
        };

        let token_duration = cfg.token_duration.unwrap_or(DEFAULT_TOKEN_DURATION);
        if token_duration.is_zero() || token_duration > MAX_TOKEN_DURATION {
            return Err(AdapterError::Config(format!(
                "token duration must be between 1s and {}s, got {}s",
                MAX_TOKEN_DURATION.as_secs(),
                token_duration.as_secs()
            )));
        }

        let connect_timeout = cfg.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        if connect_timeout.is_zero() {
            return Err(AdapterError::Config("connect timeout must be non-zero".into()));
        }

        Ok(ResolvedConfig {
            endpoint,
            region,
            listen_addr: non_empty_or(cfg.listen_addr, DEFAULT_LISTEN_ADDR),
            default_user: non_empty_or(cfg.default_user, DEFAULT_USER),
            default_database: non_empty_or(cfg.default_database, DEFAULT_DATABASE),
            backend_port: cfg.backend_port.filter(|p| *p != 0).unwrap_or(DEFAULT_BACKEND_PORT),
            token_duration,
            connect_timeout,
            tls: cfg.tls,
            profile: cfg.profile.filter(|p| !p.is_empty()),
            credentials_provider: cfg.credentials_provider,
        })
    }

    /// Credentials for the token generator.
    pub fn credential_source(&self) -> CredentialSource {
        CredentialSource {
            profile: self.profile.clone(),
            provider: self.credentials_provider.clone(),
        }
    }

    /// Hostname the backend certificate must be valid for.
    pub fn tls_server_name(&self) -> &str {
        self.tls.sni_hostname.as_deref().unwrap_or(&self.endpoint)
    }
}

fn non_empty_or(v: Option<String>, default: &str) -> String {
    v.filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}
