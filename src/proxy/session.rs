use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::backend::BackendConnector;
use super::relay::relay;
use super::responder::send_auth_success;
use crate::error::{AdapterError, Result, SQLSTATE_PROTOCOL_VIOLATION};
use crate::protocol::accept_startup;
use crate::protocol::messages::put_error_response;

/// Lifecycle of one client connection. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Accepted,
    ClientHandshaked,
    BackendConnecting,
    BackendAuthenticated,
    Relaying,
    Closed,
}

/// One accepted client connection and everything negotiated on it.
pub struct Session<C> {
    id: u64,
    peer: SocketAddr,
    client: Option<C>,
    state: SessionState,
    user: String,
    database: String,
}

impl<C> Session<C>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(id: u64, peer: SocketAddr, client: C) -> Self {
        Self {
            id,
            peer,
            client: Some(client),
            state: SessionState::Accepted,
            user: String::new(),
            database: String::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(next > self.state, "{:?} -> {:?}", self.state, next);
        tracing::trace!(session = self.id, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    /// Drive the session to completion. Errors are logged and, where the client
    /// can still understand one, reported as a FATAL ErrorResponse. Both sockets
    /// are closed and the state is [`SessionState::Closed`] when this returns.
    pub async fn run(&mut self, connector: &BackendConnector, cancel: CancellationToken) {
        let Some(client) = self.client.take() else {
            tracing::debug!(session = self.id, "session already ran");
            return;
        };
        self.serve(client, connector, &cancel).await;
        self.advance(SessionState::Closed);
    }

    async fn serve(
        &mut self,
        mut client: C,
        connector: &BackendConnector,
        cancel: &CancellationToken,
    ) {
        let id = self.id;
        let peer = self.peer;

        // Client startup
        let params = tokio::select! {
            res = accept_startup(&mut client) => res,
            _ = cancel.cancelled() => Err(AdapterError::Cancelled),
        };
        let params = match params {
            Ok(p) => p,
            Err(AdapterError::Protocol(msg)) => {
                tracing::warn!(session = id, %peer, error = %msg, "client protocol violation");
                report(id, &mut client, SQLSTATE_PROTOCOL_VIOLATION, &msg).await;
                return;
            }
            Err(e @ AdapterError::Unsupported(_)) => {
                tracing::debug!(session = id, %peer, error = %e, "closing");
                return;
            }
            Err(e) => {
                tracing::debug!(session = id, %peer, error = %e, "client left during startup");
                return;
            }
        };

        let cfg = connector.config();
        self.user = params
            .user()
            .filter(|u| !u.is_empty())
            .unwrap_or(cfg.default_user.as_str())
            .to_string();
        self.database = params
            .database()
            .filter(|d| !d.is_empty())
            .unwrap_or(cfg.default_database.as_str())
            .to_string();
        self.advance(SessionState::ClientHandshaked);
        tracing::debug!(
            session = id,
            %peer,
            user = %self.user,
            database = %self.database,
            "client startup complete"
        );

        // Backend
        self.advance(SessionState::BackendConnecting);
        let backend = match connector.connect(&self.user, &self.database, cancel).await {
            Ok(b) => b,
            Err(AdapterError::Cancelled) => {
                tracing::debug!(session = id, "cancelled while connecting to backend");
                return;
            }
            Err(e) => {
                tracing::error!(
                    session = id,
                    %peer,
                    user = %self.user,
                    error = %e,
                    "backend connection failed"
                );
                let (code, message) = e.client_error();
                report(id, &mut client, code, &message).await;
                return;
            }
        };
        self.advance(SessionState::BackendAuthenticated);

        let replied = tokio::select! {
            res = send_auth_success(&mut client) => res,
            _ = cancel.cancelled() => Err(AdapterError::Cancelled),
        };
        if let Err(e) = replied {
            tracing::debug!(session = id, error = %e, "client gone before relay");
            return;
        }

        tracing::info!(
            session = id,
            %peer,
            user = %self.user,
            database = %self.database,
            "session established"
        );

        // Relay
        self.advance(SessionState::Relaying);
        match relay(client, backend, cancel).await {
            Ok(stats) => tracing::info!(
                session = id,
                %peer,
                user = %self.user,
                client_to_backend = stats.client_to_backend,
                backend_to_client = stats.backend_to_client,
                "session closed"
            ),
            Err(e) => tracing::error!(session = id, error = %e, "relay failed"),
        }
    }
}

/// Best-effort FATAL ErrorResponse to the client.
async fn report<W: AsyncWrite + Unpin>(session: u64, client: &mut W, code: &str, message: &str) {
    if let Err(e) = write_fatal(client, code, message).await {
        tracing::debug!(session, error = %e, "could not send error to client");
    }
}

async fn write_fatal<W: AsyncWrite + Unpin>(wr: &mut W, code: &str, message: &str) -> Result<()> {
    let mut buf = BytesMut::with_capacity(64 + message.len());
    put_error_response(&mut buf, "FATAL", code, message);
    wr.write_all(&buf).await?;
    wr.flush().await?;
    Ok(())
}
