//! TLS for the backend connection.
//!
//! The backend leg is always encrypted: the proxy sends an SSLRequest, requires
//! the `'S'` answer, then runs a rustls handshake validated against the backend
//! hostname. The client leg is never encrypted (client SSL requests are declined).

pub mod rustls;

pub use self::rustls::{BackendTls, request_tls};
