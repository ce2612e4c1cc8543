use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{TokenGenerator, TokenRequest, TokenSource};
use crate::error::{AdapterError, Result};

/// Fraction of a token's validity after which it is regenerated.
const REFRESH_AFTER: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    endpoint: String,
    region: String,
    user: String,
}

impl From<&TokenRequest> for CacheKey {
    fn from(r: &TokenRequest) -> Self {
        Self {
            endpoint: r.endpoint.clone(),
            region: r.region.clone(),
            user: r.user.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    refresh_at: Instant,
}

impl CachedToken {
    fn new(token: String, issued: Instant, validity: Duration) -> Self {
        Self {
            token,
            refresh_at: issued + validity.mul_f64(REFRESH_AFTER),
        }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        now < self.refresh_at
    }
}

/// Token cache keyed by (endpoint, region, user).
///
/// Lookups take a shared read lock. A stale or missing entry is regenerated
/// under an async lock held per identity, and the entry is re-checked once the
/// lock is held, so concurrent sessions for one identity share a single
/// generation while other identities proceed independently.
pub struct TokenCache<G> {
    generator: G,
    entries: RwLock<HashMap<CacheKey, CachedToken>>,
    refresh: parking_lot::Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl<G: TokenGenerator> TokenCache<G> {
    pub fn new(generator: G) -> Self {
        Self {
            generator,
            entries: RwLock::new(HashMap::new()),
            refresh: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn refresh_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        Arc::clone(self.refresh.lock().entry(key.clone()).or_default())
    }

    fn fresh(&self, key: &CacheKey) -> Option<String> {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|e| e.is_fresh(now))
            .map(|e| e.token.clone())
    }

    /// Drop the cached token for this identity, forcing regeneration on next use.
    pub fn invalidate(&self, request: &TokenRequest) {
        self.entries.write().remove(&CacheKey::from(request));
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl<G: TokenGenerator> TokenSource for TokenCache<G> {
    async fn get_token(&self, request: &TokenRequest, cancel: &CancellationToken) -> Result<String> {
        let key = CacheKey::from(request);
        if let Some(token) = self.fresh(&key) {
            return Ok(token);
        }

        let lock = self.refresh_lock(&key);
        let _guard = tokio::select! {
            g = lock.lock() => g,
            _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
        };

        // Another session may have refreshed while we waited.
        if let Some(token) = self.fresh(&key) {
            return Ok(token);
        }

        let issued = Instant::now();
        let token = tokio::select! {
            res = self.generator.generate(request) => res?,
            _ = cancel.cancelled() => return Err(AdapterError::Cancelled),
        };

        tracing::debug!(
            endpoint = %request.endpoint,
            region = %request.region,
            user = %request.user,
            validity_secs = request.validity.as_secs(),
            "generated authentication token"
        );

        self.entries
            .write()
            .insert(key, CachedToken::new(token.clone(), issued, request.validity));
        Ok(token)
    }
}
