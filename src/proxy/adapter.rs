use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::backend::BackendConnector;
use super::session::Session;
use crate::auth::{IamTokenGenerator, TokenCache, TokenSource};
use crate::config::{ConfigInput, ResolvedConfig};
use crate::error::{AdapterError, Result};

/// Observable lifecycle of an [`Adapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unstarted,
    Listening,
    Draining,
    Stopped,
}

enum Lifecycle {
    Unstarted,
    Listening {
        addr: SocketAddr,
        listener_cancel: CancellationToken,
        accept_done: CancellationToken,
        accept: JoinHandle<Result<()>>,
    },
    Draining,
    Stopped,
}

impl Lifecycle {
    fn state(&self) -> AdapterState {
        match self {
            Lifecycle::Unstarted => AdapterState::Unstarted,
            Lifecycle::Listening { .. } => AdapterState::Listening,
            Lifecycle::Draining => AdapterState::Draining,
            Lifecycle::Stopped => AdapterState::Stopped,
        }
    }
}

/// Local PostgreSQL endpoint that forwards every client to the DSQL cluster.
pub struct Adapter {
    config: Arc<ResolvedConfig>,
    connector: BackendConnector,
    sessions: TaskTracker,
    lifecycle: Mutex<Lifecycle>,
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("endpoint", &self.config.endpoint)
            .field("state", &self.state())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl Adapter {
    /// Adapter with a token cache backed by the AWS SDK signer. Credentials
    /// come from the configured provider or profile, else the default chain.
    pub fn new(config: impl Into<ConfigInput>) -> Result<Self> {
        let config = config.into().resolve()?;
        let generator = IamTokenGenerator::new(config.credential_source());
        Self::from_resolved(config, Arc::new(TokenCache::new(generator)))
    }

    pub fn with_token_source(
        config: impl Into<ConfigInput>,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self> {
        Self::from_resolved(config.into().resolve()?, tokens)
    }

    fn from_resolved(config: ResolvedConfig, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let config = Arc::new(config);
        let connector = BackendConnector::new(Arc::clone(&config), tokens)?;
        Ok(Self {
            config,
            connector,
            sessions: TaskTracker::new(),
            lifecycle: Mutex::new(Lifecycle::Unstarted),
        })
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn state(&self) -> AdapterState {
        self.lifecycle.lock().state()
    }

    /// Bound listen address while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.lifecycle.lock() {
            Lifecycle::Listening { addr, .. } => Some(*addr),
            _ => None,
        }
    }

    /// Number of sessions currently in flight.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Bind the listen address and start accepting clients.
    ///
    /// Every session runs under a child of `shutdown`; cancelling it stops the
    /// accept loop and force-closes in-flight sessions.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<SocketAddr> {
        let mut lifecycle = self.lifecycle.lock();
        match &*lifecycle {
            Lifecycle::Unstarted => {}
            Lifecycle::Listening { .. } => return Err(AdapterError::AlreadyRunning),
            Lifecycle::Draining | Lifecycle::Stopped => return Err(AdapterError::Closed),
        }

        let listener = bind(&self.config.listen_addr)?;
        let addr = listener.local_addr()?;

        let listener_cancel = shutdown.child_token();
        let accept_done = CancellationToken::new();
        let accept = tokio::spawn(accept_loop(
            listener,
            self.connector.clone(),
            self.sessions.clone(),
            listener_cancel.clone(),
            shutdown,
            accept_done.clone(),
        ));

        *lifecycle = Lifecycle::Listening {
            addr,
            listener_cancel,
            accept_done,
            accept,
        };
        tracing::info!(
            listen = %addr,
            endpoint = %self.config.endpoint,
            region = %self.config.region,
            "adapter listening"
        );
        Ok(addr)
    }

    /// Stop accepting and wait for every in-flight session to finish.
    ///
    /// Returns the accept loop's error if it ended on one. Stopping an adapter
    /// that never started moves it straight to stopped.
    pub async fn stop(&self) -> Result<()> {
        let (listener_cancel, accept) = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Draining) {
                Lifecycle::Listening {
                    listener_cancel,
                    accept,
                    ..
                } => (listener_cancel, accept),
                Lifecycle::Unstarted => {
                    *lifecycle = Lifecycle::Stopped;
                    return Ok(());
                }
                other => {
                    *lifecycle = other;
                    return Err(AdapterError::Closed);
                }
            }
        };

        listener_cancel.cancel();
        let accepted = accept
            .await
            .map_err(|e| AdapterError::Task(format!("accept loop: {e}")))
            .and_then(|r| r);

        tracing::info!(sessions = self.sessions.len(), "draining sessions");
        self.sessions.close();
        self.sessions.wait().await;

        *self.lifecycle.lock() = Lifecycle::Stopped;
        tracing::info!("adapter stopped");
        accepted
    }

    /// `start`, wait for `shutdown` or an accept failure, then `stop`.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        self.start(shutdown.clone()).await?;
        let accept_done = match &*self.lifecycle.lock() {
            Lifecycle::Listening { accept_done, .. } => accept_done.clone(),
            _ => return Err(AdapterError::Closed),
        };

        tokio::select! {
            _ = shutdown.cancelled() => tracing::info!("shutdown requested"),
            _ = accept_done.cancelled() => {}
        }
        self.stop().await
    }
}

fn bind(listen_addr: &str) -> Result<TcpListener> {
    let std_listener = std::net::TcpListener::bind(listen_addr)
        .map_err(|e| AdapterError::Io(format!("bind {listen_addr}: {e}")))?;
    std_listener.set_nonblocking(true)?;
    Ok(TcpListener::from_std(std_listener)?)
}

async fn accept_loop(
    listener: TcpListener,
    connector: BackendConnector,
    sessions: TaskTracker,
    listener_cancel: CancellationToken,
    shutdown: CancellationToken,
    accept_done: CancellationToken,
) -> Result<()> {
    let _done = accept_done.drop_guard();
    let mut next_id = 0u64;

    loop {
        let (stream, peer) = tokio::select! {
            res = listener.accept() => match res {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                    return Err(AdapterError::Io(format!("accept: {e}")));
                }
            },
            _ = listener_cancel.cancelled() => return Ok(()),
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "set_nodelay failed");
        }
        next_id += 1;
        tracing::debug!(session = next_id, %peer, "client accepted");

        let mut session = Session::new(next_id, peer, stream);
        let connector = connector.clone();
        let cancel = shutdown.child_token();
        sessions.spawn(async move {
            session.run(&connector, cancel).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::auth::TokenRequest;
    use crate::config::AdapterConfig;

    struct NoTokens;

    #[async_trait]
    impl TokenSource for NoTokens {
        async fn get_token(
            &self,
            _request: &TokenRequest,
            _cancel: &CancellationToken,
        ) -> Result<String> {
            Err(AdapterError::Credential("unused".into()))
        }
    }

    fn adapter() -> Adapter {
        let cfg = AdapterConfig {
            endpoint: "abc.dsql.us-east-1.on.aws".into(),
            listen_addr: Some("127.0.0.1:0".into()),
            ..Default::default()
        };
        Adapter::with_token_source(cfg, Arc::new(NoTokens)).unwrap()
    }

    #[test]
    fn new_defers_aws_configuration_loading() {
        let cfg = AdapterConfig {
            endpoint: "abc.dsql.us-east-1.on.aws".into(),
            profile: Some("analytics".into()),
            ..Default::default()
        };
        // No runtime here: building the adapter must not touch AWS configuration.
        let adapter = Adapter::new(cfg).unwrap();
        assert_eq!(adapter.config().profile.as_deref(), Some("analytics"));
        assert_eq!(adapter.state(), AdapterState::Unstarted);
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let adapter = adapter();
        assert_eq!(adapter.state(), AdapterState::Unstarted);
        assert!(adapter.local_addr().is_none());

        let addr = adapter.start(CancellationToken::new()).await.unwrap();
        assert_eq!(adapter.state(), AdapterState::Listening);
        assert_eq!(adapter.local_addr(), Some(addr));
        assert_ne!(addr.port(), 0);

        let err = adapter.start(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AdapterError::AlreadyRunning));

        adapter.stop().await.unwrap();
        assert_eq!(adapter.state(), AdapterState::Stopped);
        assert!(adapter.local_addr().is_none());

        assert!(matches!(
            adapter.start(CancellationToken::new()).await,
            Err(AdapterError::Closed)
        ));
        assert!(matches!(adapter.stop().await, Err(AdapterError::Closed)));

        // Listener is gone.
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn stop_before_start() {
        let adapter = adapter();
        adapter.stop().await.unwrap();
        assert_eq!(adapter.state(), AdapterState::Stopped);
        assert!(matches!(
            adapter.start(CancellationToken::new()).await,
            Err(AdapterError::Closed)
        ));
    }

    #[tokio::test]
    async fn bind_failure_leaves_adapter_unstarted() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let cfg = AdapterConfig {
            endpoint: "abc.dsql.us-east-1.on.aws".into(),
            listen_addr: Some(taken.local_addr().unwrap().to_string()),
            ..Default::default()
        };
        let adapter = Adapter::with_token_source(cfg, Arc::new(NoTokens)).unwrap();
        assert!(adapter.start(CancellationToken::new()).await.is_err());
        assert_eq!(adapter.state(), AdapterState::Unstarted);
    }

    #[tokio::test]
    async fn run_returns_after_shutdown() {
        let adapter = Arc::new(adapter());
        let shutdown = CancellationToken::new();

        let task = {
            let adapter = Arc::clone(&adapter);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { adapter.run(shutdown).await })
        };

        while adapter.local_addr().is_none() {
            tokio::task::yield_now().await;
        }
        shutdown.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(adapter.state(), AdapterState::Stopped);
    }
}
