//! dsql-pgadapter - local PostgreSQL endpoint for Aurora DSQL
//!
//! Accepts plain PostgreSQL clients on a local address and forwards each one
//! to the cluster over TLS, authenticating with a generated IAM token.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use dsql_pgadapter::{Adapter, AdapterConfig, ConfigInput};

#[derive(Parser, Debug)]
#[command(name = "dsql-pgadapter", version, about = "PostgreSQL proxy for Aurora DSQL with IAM authentication")]
struct Cli {
    /// Cluster endpoint hostname, cluster id, or a postgres:// connection string
    #[arg(short, long, env = "DSQL_ENDPOINT")]
    endpoint: String,

    /// AWS region; parsed from the endpoint when omitted
    #[arg(short, long, env = "AWS_REGION")]
    region: Option<String>,

    /// Local address to listen on [default: 127.0.0.1:5432]
    #[arg(short, long)]
    listen: Option<String>,

    /// User for clients that do not send one
    #[arg(short, long)]
    user: Option<String>,

    /// Database for clients that do not send one
    #[arg(short, long)]
    database: Option<String>,

    /// Backend port
    #[arg(short, long)]
    port: Option<u16>,

    /// Validity of generated tokens, in seconds
    #[arg(long)]
    token_duration_secs: Option<u64>,

    /// Backend connect timeout, in seconds
    #[arg(long)]
    connect_timeout_secs: Option<u64>,

    /// AWS shared-config profile for credentials; the default chain when omitted
    #[arg(long)]
    profile: Option<String>,

    /// PEM bundle to trust instead of the built-in roots
    #[arg(long)]
    ca_pem: Option<PathBuf>,

    /// Hostname to validate the backend certificate against
    #[arg(long)]
    sni: Option<String>,

    /// Enable verbose/debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<ConfigInput> {
        let mut cfg = if self.endpoint.contains("://") {
            AdapterConfig::from_connection_string(&self.endpoint)?
        } else {
            AdapterConfig::new(self.endpoint)
        };

        if self.region.is_some() {
            cfg.region = self.region;
        }
        if self.listen.is_some() {
            cfg.listen_addr = self.listen;
        }
        if self.user.is_some() {
            cfg.default_user = self.user;
        }
        if self.database.is_some() {
            cfg.default_database = self.database;
        }
        if self.port.is_some() {
            cfg.backend_port = self.port;
        }
        if let Some(secs) = self.token_duration_secs {
            cfg.token_duration = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = self.connect_timeout_secs {
            cfg.connect_timeout = Some(Duration::from_secs(secs));
        }
        if self.profile.is_some() {
            cfg.profile = self.profile;
        }
        if self.ca_pem.is_some() {
            cfg.tls.ca_pem_path = self.ca_pem;
        }
        if self.sni.is_some() {
            cfg.tls.sni_hostname = self.sni;
        }
        Ok(cfg.into())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Priority: --verbose flag, then RUST_LOG env var, then default "info"
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
    };
    tracing_subscriber::fmt().with_env_filter(&log_level).init();

    info!("Starting dsql-pgadapter v{}", env!("CARGO_PKG_VERSION"));

    let adapter = Adapter::new(cli.into_config()?).context("invalid configuration")?;
    let shutdown = CancellationToken::new();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.cancel();
    });

    if let Err(e) = adapter.run(shutdown).await {
        error!("Adapter error: {e}");
        return Err(e.into());
    }

    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        error!("Failed to install SIGTERM handler: {e}");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_connection_string() {
        let cli = Cli::parse_from([
            "dsql-pgadapter",
            "--endpoint",
            "postgres://alice@abc.dsql.us-east-1.on.aws/appdb?listen=127.0.0.1:7000",
            "--database",
            "other",
            "--token-duration-secs",
            "120",
        ]);
        let ConfigInput::Fields(cfg) = cli.into_config().unwrap() else {
            panic!("expected structured config");
        };
        assert_eq!(cfg.default_user.as_deref(), Some("alice"));
        assert_eq!(cfg.default_database.as_deref(), Some("other"));
        assert_eq!(cfg.listen_addr.as_deref(), Some("127.0.0.1:7000"));
        assert_eq!(cfg.token_duration, Some(Duration::from_secs(120)));
    }

    #[test]
    fn plain_endpoint_uses_default_listen() {
        let cli = Cli::parse_from(["dsql-pgadapter", "-e", "abc.dsql.us-east-1.on.aws"]);
        let input = cli.into_config().unwrap();
        let ConfigInput::Fields(cfg) = &input else {
            panic!("expected structured config");
        };
        assert_eq!(cfg.endpoint, "abc.dsql.us-east-1.on.aws");
        assert_eq!(cfg.listen_addr, None);
        assert_eq!(
            input.resolve().unwrap().listen_addr,
            dsql_pgadapter::config::DEFAULT_LISTEN_ADDR
        );
    }

    #[test]
    fn explicit_listen_overrides_connection_string() {
        let cli = Cli::parse_from([
            "dsql-pgadapter",
            "--endpoint",
            "postgres://abc.dsql.us-east-1.on.aws?listen=127.0.0.1:7000",
            "--listen",
            "0.0.0.0:15432",
        ]);
        let ConfigInput::Fields(cfg) = cli.into_config().unwrap() else {
            panic!("expected structured config");
        };
        assert_eq!(cfg.listen_addr.as_deref(), Some("0.0.0.0:15432"));
    }

    #[test]
    fn profile_flag_and_connection_string_param() {
        let cli = Cli::parse_from([
            "dsql-pgadapter",
            "-e",
            "abc.dsql.us-east-1.on.aws",
            "--profile",
            "dev",
        ]);
        let ConfigInput::Fields(cfg) = cli.into_config().unwrap() else {
            panic!("expected structured config");
        };
        assert_eq!(cfg.profile.as_deref(), Some("dev"));

        let cli = Cli::parse_from([
            "dsql-pgadapter",
            "-e",
            "postgres://abc.dsql.us-east-1.on.aws?profile=analytics",
            "--profile",
            "dev",
        ]);
        let ConfigInput::Fields(cfg) = cli.into_config().unwrap() else {
            panic!("expected structured config");
        };
        assert_eq!(cfg.profile.as_deref(), Some("dev"));

        let cli = Cli::parse_from([
            "dsql-pgadapter",
            "-e",
            "postgres://abc.dsql.us-east-1.on.aws?profile=analytics",
        ]);
        let ConfigInput::Fields(cfg) = cli.into_config().unwrap() else {
            panic!("expected structured config");
        };
        assert_eq!(cfg.profile.as_deref(), Some("analytics"));
    }
}
