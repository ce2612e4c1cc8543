//! Authentication tokens for the backend connection.
//!
//! The backend accepts a short-lived signed token as the cleartext password.
//! Sessions obtain tokens through the [`TokenSource`] trait; the adapter's
//! default source is a [`TokenCache`] in front of an [`IamTokenGenerator`].
//!
//! - [`cache`]: thread-safe cache keyed by (endpoint, region, user) that
//!   regenerates tokens shortly before they expire.
//! - [`iam`]: presigned IAM tokens signed by the AWS SDK, with credentials
//!   from an explicit provider, a named profile or the default chain.
//!
//! # Example
//!
//! ```ignore
//! use dsql_pgadapter::auth::{CredentialSource, IamTokenGenerator, TokenCache, TokenRequest, TokenSource};
//!
//! let cache = TokenCache::new(IamTokenGenerator::new(CredentialSource::default()));
//! let token = cache
//!     .get_token(&TokenRequest::new(endpoint, region, "admin", ttl), &cancel)
//!     .await?;
//! ```

pub mod cache;
pub mod iam;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub use cache::TokenCache;
pub use iam::{CredentialSource, IamTokenGenerator};

/// Identity a token is requested for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenRequest {
    pub endpoint: String,
    pub region: String,
    pub user: String,
    pub validity: Duration,
}

impl TokenRequest {
    pub fn new(
        endpoint: impl Into<String>,
        region: impl Into<String>,
        user: impl Into<String>,
        validity: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            region: region.into(),
            user: user.into(),
            validity,
        }
    }
}

/// Supplies a currently valid token for a backend identity.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn get_token(&self, request: &TokenRequest, cancel: &CancellationToken)
    -> Result<String>;
}

/// Produces a fresh token on every call. Wrapped by [`TokenCache`].
#[async_trait]
pub trait TokenGenerator: Send + Sync {
    async fn generate(&self, request: &TokenRequest) -> Result<String>;
}
