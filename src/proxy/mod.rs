//! The proxy: listener, per-client sessions, and the backend leg.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐   plaintext    ┌─────────────────┐   TLS + token   ┌─────────────────┐
//! │                 │───────────────►│    Session      │────────────────►│                 │
//! │  PG client      │  startup/'N'   │  (one task per  │  SSLRequest 'S' │  Aurora DSQL    │
//! │  (psql, driver) │◄───────────────│   connection)   │◄────────────────│   endpoint      │
//! │                 │  synthesized   │                 │  cleartext auth │                 │
//! └─────────────────┘  auth success  └────────┬────────┘                 └─────────────────┘
//!                                             │
//!                                             │ after ReadyForQuery
//!                                             ▼
//!                                    ┌─────────────────┐
//!                                    │  Relay          │
//!                                    │  two copy tasks,│
//!                                    │  fail together  │
//!                                    └─────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use dsql_pgadapter::{Adapter, AdapterConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = Adapter::new(AdapterConfig::new("mycluster.dsql.us-east-1.on.aws"))?;
//!
//!     let shutdown = CancellationToken::new();
//!     let trigger = shutdown.clone();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         trigger.cancel();
//!     });
//!
//!     // psql -h 127.0.0.1 -p 5432 -U admin postgres
//!     adapter.run(shutdown).await?;
//!     Ok(())
//! }
//! ```

mod adapter;
mod backend;
mod relay;
mod responder;
mod session;

pub use adapter::{Adapter, AdapterState};
pub use backend::{BackendConnector, BackendStream, authenticate};
pub use relay::{RelayStats, relay};
pub use responder::{SERVER_PARAMETERS, encode_auth_success, send_auth_success};
pub use session::{Session, SessionState};
