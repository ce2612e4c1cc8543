use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, split};
use tokio_util::sync::CancellationToken;

use crate::error::{AdapterError, Result};

const COPY_BUF_SIZE: usize = 8192;

/// Upper bound on the write-side close after a direction ends on its own.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Bytes moved in each direction over the life of a relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_backend: u64,
    pub backend_to_client: u64,
}

/// Copy bytes both ways until either side finishes.
///
/// Both directions share one token, a child of `cancel`: the first direction to
/// hit EOF or an error cancels it, the other direction stops, and both halves
/// of both streams are dropped once the tasks are joined.
///
/// Cancelling `cancel` itself is a forced close: pending writes are abandoned
/// and no graceful shutdown is attempted on either stream.
pub async fn relay<C, B>(client: C, backend: B, cancel: &CancellationToken) -> Result<RelayStats>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (client_rd, client_wr) = split(client);
    let (backend_rd, backend_wr) = split(backend);
    let done = cancel.child_token();

    let upstream = tokio::spawn(copy_until_cancelled(
        client_rd,
        backend_wr,
        "client->backend",
        done.clone(),
        cancel.clone(),
    ));
    let downstream = tokio::spawn(copy_until_cancelled(
        backend_rd,
        client_wr,
        "backend->client",
        done.clone(),
        cancel.clone(),
    ));

    let (up, down) = tokio::join!(upstream, downstream);
    let stats = RelayStats {
        client_to_backend: up.map_err(|e| AdapterError::Task(format!("relay task: {e}")))?,
        backend_to_client: down.map_err(|e| AdapterError::Task(format!("relay task: {e}")))?,
    };
    Ok(stats)
}

/// Returns the number of bytes written before EOF, error or cancellation.
/// Cancels `done` on the way out.
async fn copy_until_cancelled<R, W>(
    mut reader: R,
    mut writer: W,
    direction: &'static str,
    done: CancellationToken,
    forced: CancellationToken,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let _cancel_peer = done.clone().drop_guard();
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut total = 0u64;

    loop {
        let n = tokio::select! {
            res = reader.read(&mut buf) => match res {
                Ok(0) => {
                    tracing::debug!(direction, bytes = total, "eof");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(direction, bytes = total, error = %e, "read failed");
                    break;
                }
            },
            _ = done.cancelled() => break,
        };

        let write = async {
            writer.write_all(&buf[..n]).await?;
            writer.flush().await
        };
        let written = tokio::select! {
            res = write => res,
            _ = done.cancelled() => break,
        };
        if let Err(e) = written {
            tracing::debug!(direction, bytes = total, error = %e, "write failed");
            break;
        }
        total += n as u64;
        tracing::trace!(direction, n, "relayed");
    }

    done.cancel();

    // A peer that stopped reading never lets a TLS close_notify drain, so the
    // close is skipped on a forced exit and bounded otherwise.
    if forced.is_cancelled() {
        tracing::debug!(direction, bytes = total, "forced close");
    } else {
        tokio::select! {
            res = tokio::time::timeout(SHUTDOWN_GRACE, writer.shutdown()) => match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(direction, error = %e, "shutdown failed"),
                Err(_) => tracing::debug!(direction, "shutdown timed out"),
            },
            _ = forced.cancelled() => tracing::debug!(direction, "forced close"),
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{ReadBuf, duplex};

    /// A peer that accepts writes but never produces data and never finishes
    /// a shutdown, like a TLS stream whose remote end stopped reading.
    struct StalledPeer;

    impl AsyncRead for StalledPeer {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for StalledPeer {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    #[tokio::test]
    async fn bytes_pass_verbatim_both_ways() {
        let (client, mut client_peer) = duplex(1024);
        let (backend, mut backend_peer) = duplex(1024);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(async move { relay(client, backend, &cancel).await });

        client_peer.write_all(b"Q\0\0\0\rSELECT 1\0").await.unwrap();
        let mut got = [0u8; 14];
        backend_peer.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"Q\0\0\0\rSELECT 1\0");

        backend_peer.write_all(b"Z\0\0\0\x05I").await.unwrap();
        let mut got = [0u8; 6];
        client_peer.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"Z\0\0\0\x05I");

        drop(client_peer);
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.client_to_backend, 14);
        assert_eq!(stats.backend_to_client, 6);

        // Backend side sees EOF once the relay is torn down.
        let mut rest = Vec::new();
        backend_peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn backend_close_tears_down_client() {
        let (client, mut client_peer) = duplex(1024);
        let (backend, backend_peer) = duplex(1024);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(async move { relay(client, backend, &cancel).await });
        drop(backend_peer);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("relay should finish")
            .unwrap()
            .unwrap();
        let mut rest = Vec::new();
        client_peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn outer_cancel_stops_idle_relay() {
        let (client, _client_peer) = duplex(1024);
        let (backend, _backend_peer) = duplex(1024);
        let cancel = CancellationToken::new();

        let c = cancel.clone();
        let task = tokio::spawn(async move { relay(client, backend, &c).await });
        cancel.cancel();

        let stats = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("relay should finish")
            .unwrap()
            .unwrap();
        assert_eq!(stats, RelayStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_shutdown_is_bounded_after_client_eof() {
        let (client, client_peer) = duplex(1024);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(async move { relay(client, StalledPeer, &cancel).await });
        drop(client_peer);

        tokio::time::timeout(SHUTDOWN_GRACE * 3, task)
            .await
            .expect("relay should give up on the stalled close")
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn forced_close_skips_stalled_shutdown() {
        let (client, mut client_peer) = duplex(1024);
        let cancel = CancellationToken::new();

        let c = cancel.clone();
        let task = tokio::spawn(async move { relay(client, StalledPeer, &c).await });
        client_peer.write_all(b"Q\0\0\0\rSELECT 1\0").await.unwrap();
        tokio::task::yield_now().await;
        cancel.cancel();

        // Well under the grace period: a forced close must not wait for it.
        tokio::time::timeout(SHUTDOWN_GRACE / 4, task)
            .await
            .expect("forced close should not wait on shutdown")
            .unwrap()
            .unwrap();
    }
}
