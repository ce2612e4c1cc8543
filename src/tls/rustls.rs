use std::{fs::File, io::BufReader, sync::Arc};

use rustls::{ClientConfig, RootCertStore, pki_types::ServerName};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_rustls::{TlsConnector, client::TlsStream};
use tokio_util::sync::CancellationToken;

use crate::config::TlsConfig;
use crate::error::{AdapterError, Result};
use crate::protocol::framing::write_ssl_request;

/// TLS client settings for the backend leg, built once per adapter and shared
/// by every session.
#[derive(Clone)]
pub struct BackendTls {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl std::fmt::Debug for BackendTls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendTls")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl BackendTls {
    /// `host` is the name the backend certificate is validated against.
    pub fn new(tls: &TlsConfig, host: &str) -> Result<Self> {
        let cfg = build_rustls_config(tls)?;
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| AdapterError::Tls(format!("invalid server name {host:?}: {e}")))?;
        Ok(Self {
            connector: TlsConnector::from(Arc::new(cfg)),
            server_name,
        })
    }

    /// SSLRequest negotiation followed by the TLS handshake.
    ///
    /// The backend must answer `'S'`; a decline (or anything else) fails before
    /// any further bytes are written. The handshake is abandoned if `cancel` fires.
    pub async fn upgrade<S>(&self, mut stream: S, cancel: &CancellationToken) -> Result<TlsStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        request_tls(&mut stream).await?;

        let handshake = self.connector.connect(self.server_name.clone(), stream);
        tokio::select! {
            res = handshake => res.map_err(|e| AdapterError::Tls(format!("tls handshake failed: {e}"))),
            _ = cancel.cancelled() => Err(AdapterError::Cancelled),
        }
    }
}

/// Send SSLRequest and require the acceptance byte.
pub async fn request_tls<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S) -> Result<()> {
    write_ssl_request(stream).await?;
    let mut resp = [0u8; 1];
    stream.read_exact(&mut resp).await?;

    if resp[0] != b'S' {
        return Err(AdapterError::Tls(format!(
            "server does not support TLS (SSLRequest answered with {:?})",
            resp[0] as char
        )));
    }
    Ok(())
}

fn build_rustls_config(tls: &TlsConfig) -> Result<ClientConfig> {
    let mut roots = RootCertStore::empty();

    if let Some(path) = &tls.ca_pem_path {
        let f = File::open(path).map_err(|e| AdapterError::Tls(format!("open CA pem: {e}")))?;
        let mut rd = BufReader::new(f);
        let certs = rustls_pemfile::certs(&mut rd)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AdapterError::Tls(format!("parse CA pem: {e}")))?;
        let (added, _ignored) = roots.add_parsable_certificates(certs);
        if added == 0 {
            return Err(AdapterError::Tls(format!(
                "no usable certificates in {}",
                path.display()
            )));
        }
    } else {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let cfg = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(|e| AdapterError::Tls(format!("tls protocol versions: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(cfg)
}
