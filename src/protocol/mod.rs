//! PostgreSQL wire protocol implementation.
//!
//! This module provides low-level primitives for:
//! - Reading and writing PostgreSQL frontend/backend messages ([`framing`])
//! - Parsing authentication and error responses, encoding the server-side
//!   messages the proxy synthesizes ([`messages`])
//! - Decoding the client startup phase ([`startup`])
//!
//! # Wire Protocol Overview
//!
//! PostgreSQL uses a message-based protocol where each message consists of:
//! - 1 byte: message type tag
//! - 4 bytes: message length (including these 4 bytes)
//! - N bytes: message payload
//!
//! Exception: startup-phase messages (StartupMessage, SSLRequest,
//! GSSENCRequest, CancelRequest) omit the type tag and are told apart by a
//! leading 4-byte code instead.

pub mod framing;
pub mod messages;
pub mod startup;

pub use framing::BackendMessage;
pub use messages::{ErrorFields, parse_auth_request, parse_error_response};
pub use startup::{StartupParameters, StartupRequest, accept_startup, decode_startup};
