#![warn(
    clippy::all,
    clippy::cargo,
    clippy::perf,
    clippy::style,
    clippy::correctness,
    clippy::suspicious
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::multiple_crate_versions
)]

pub mod auth;
pub mod config;
pub mod error;
pub mod protocol;
pub mod proxy;
pub mod region;
pub mod tls;

pub use auth::{TokenCache, TokenRequest, TokenSource};
pub use config::{AdapterConfig, ConfigInput, ResolvedConfig, TlsConfig};
pub use error::{AdapterError, Result};
pub use proxy::{Adapter, AdapterState};
