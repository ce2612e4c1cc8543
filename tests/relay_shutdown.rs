use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dsql_pgadapter::TlsConfig;
use dsql_pgadapter::proxy::relay;
use dsql_pgadapter::tls::BackendTls;
use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

/// CA file plus an acceptor whose leaf is valid for `localhost`.
fn tls_pair() -> Result<(NamedTempFile, TlsAcceptor)> {
    let ca_key = KeyPair::generate()?;
    let mut ca_params = CertificateParams::new(Vec::<String>::new())?;
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca = ca_params.self_signed(&ca_key)?;

    let leaf_key = KeyPair::generate()?;
    let leaf = CertificateParams::new(vec!["localhost".to_string()])?
        .signed_by(&leaf_key, &ca, &ca_key)?;

    let mut ca_pem = NamedTempFile::new()?;
    std::io::Write::write_all(&mut ca_pem, ca.pem().as_bytes())?;

    let server_config = rustls::ServerConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(
        vec![CertificateDer::from(leaf.der().to_vec())],
        PrivateKeyDer::try_from(leaf_key.serialize_der())
            .map_err(|e| anyhow::anyhow!("leaf key: {e}"))?,
    )?;
    Ok((ca_pem, TlsAcceptor::from(Arc::new(server_config))))
}

/// A TLS backend that accepts the SSLRequest, finishes the handshake and then
/// never reads again. It holds the connection open until `release` fires.
async fn stalled_backend(
    acceptor: TlsAcceptor,
    release: oneshot::Receiver<()>,
) -> Result<std::net::SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let Ok((mut tcp, _)) = listener.accept().await else {
            return;
        };
        let mut req = [0u8; 8];
        if tcp.read_exact(&mut req).await.is_err() || tcp.write_all(b"S").await.is_err() {
            return;
        }
        let Ok(tls) = acceptor.accept(tcp).await else {
            return;
        };
        let _ = release.await;
        drop(tls);
    });
    Ok(addr)
}

#[tokio::test]
async fn forced_close_with_stalled_tls_peer_finishes() -> Result<()> {
    init_tracing();
    let (ca_pem, acceptor) = tls_pair()?;
    let (release, hold) = oneshot::channel();
    let addr = stalled_backend(acceptor, hold).await?;

    let tls = BackendTls::new(
        &TlsConfig {
            ca_pem_path: Some(ca_pem.path().to_path_buf()),
            sni_hostname: None,
        },
        "localhost",
    )?;
    let cancel = CancellationToken::new();
    let backend = tls.upgrade(TcpStream::connect(addr).await?, &cancel).await?;

    let (client, mut client_peer) = duplex(64 * 1024);
    let c = cancel.clone();
    let task = tokio::spawn(async move { relay(client, backend, &c).await });

    // Flood until the socket buffers are full and the relay is stuck writing.
    let flood = tokio::spawn(async move {
        let chunk = vec![b'x'; 64 * 1024];
        while client_peer.write_all(&chunk).await.is_ok() {}
    });
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!task.is_finished());

    cancel.cancel();
    let stats = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("relay must finish after forced close")??;
    assert!(stats.client_to_backend > 0);

    flood.abort();
    let _ = release.send(());
    Ok(())
}
