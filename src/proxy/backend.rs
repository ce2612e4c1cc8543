use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_util::sync::CancellationToken;

use crate::auth::{TokenRequest, TokenSource};
use crate::config::{APPLICATION_NAME, ResolvedConfig};
use crate::error::{AdapterError, Result};
use crate::protocol::framing::{
    PROTOCOL_VERSION_3, read_backend_message, write_password_message, write_startup_message,
};
use crate::protocol::messages::{parse_auth_request, parse_error_response};
use crate::tls::BackendTls;

/// Authenticated, TLS-protected backend connection.
pub type BackendStream = TlsStream<TcpStream>;

const AUTH_OK: i32 = 0;
const AUTH_CLEARTEXT_PASSWORD: i32 = 3;

/// Opens authenticated backend connections. Built once per adapter and shared
/// by every session.
#[derive(Clone)]
pub struct BackendConnector {
    config: Arc<ResolvedConfig>,
    tls: BackendTls,
    tokens: Arc<dyn TokenSource>,
}

impl std::fmt::Debug for BackendConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConnector")
            .field("endpoint", &self.config.endpoint)
            .field("port", &self.config.backend_port)
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}

impl BackendConnector {
    pub fn new(config: Arc<ResolvedConfig>, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let tls = BackendTls::new(&config.tls, config.tls_server_name())?;
        Ok(Self {
            config,
            tls,
            tokens,
        })
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Token, TCP connect, TLS upgrade, startup and authentication, in that order.
    ///
    /// Whatever was established so far is dropped on failure.
    pub async fn connect(
        &self,
        user: &str,
        database: &str,
        cancel: &CancellationToken,
    ) -> Result<BackendStream> {
        let cfg = &self.config;
        let request = TokenRequest::new(&cfg.endpoint, &cfg.region, user, cfg.token_duration);
        let token = self.tokens.get_token(&request, cancel).await?;

        let tcp = self.connect_tcp(cancel).await?;
        let mut stream = self.tls.upgrade(tcp, cancel).await?;
        tracing::debug!(endpoint = %cfg.endpoint, "backend tls established");

        let params = [
            ("user", user),
            ("database", database),
            ("application_name", APPLICATION_NAME),
        ];
        let handshake = async {
            write_startup_message(&mut stream, PROTOCOL_VERSION_3, &params).await?;
            authenticate(&mut stream, &token).await
        };
        tokio::select! {
            res = handshake => res?,
            _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
        }

        Ok(stream)
    }

    async fn connect_tcp(&self, cancel: &CancellationToken) -> Result<TcpStream> {
        let cfg = &self.config;
        let addr = (cfg.endpoint.as_str(), cfg.backend_port);
        let connect = tokio::time::timeout(cfg.connect_timeout, TcpStream::connect(addr));

        let tcp = tokio::select! {
            res = connect => match res {
                Ok(Ok(tcp)) => tcp,
                Ok(Err(e)) => {
                    return Err(AdapterError::Connect(format!(
                        "connect to {}:{}: {e}",
                        cfg.endpoint, cfg.backend_port
                    )));
                }
                Err(_) => {
                    return Err(AdapterError::Connect(format!(
                        "connect to {}:{} timed out after {:?}",
                        cfg.endpoint, cfg.backend_port, cfg.connect_timeout
                    )));
                }
            },
            _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
        };
        tcp.set_nodelay(true)?;
        Ok(tcp)
    }
}

/// Backend authentication loop, run after the startup message was sent.
///
/// Answers a cleartext password challenge with `token` and returns once the
/// backend reports ReadyForQuery.
pub async fn authenticate<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    token: &str,
) -> Result<()> {
    loop {
        let msg = read_backend_message(stream).await?;
        match msg.tag {
            b'R' => {
                let (code, _) = parse_auth_request(&msg.payload)?;
                match code {
                    AUTH_OK => {}
                    AUTH_CLEARTEXT_PASSWORD => write_password_message(stream, token).await?,
                    other => {
                        return Err(AdapterError::Auth(format!(
                            "unsupported auth method: {other}"
                        )));
                    }
                }
            }
            b'E' => return Err(parse_error_response(&msg.payload).into_error()),
            b'S' | b'K' => {}      // ParameterStatus, BackendKeyData
            b'Z' => return Ok(()), // ReadyForQuery
            other => {
                return Err(AdapterError::Protocol(format!(
                    "unexpected message {:?} during authentication",
                    other as char
                )));
            }
        }
    }
}
