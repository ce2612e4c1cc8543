//! IAM connect tokens from the AWS SDK.
//!
//! A token is the query-string form of a presigned `GET /` request against the
//! cluster endpoint, with the scheme stripped:
//!
//! ```text
//! <host>/?Action=DbConnectAdmin&X-Amz-Algorithm=AWS4-HMAC-SHA256&X-Amz-Credential=...
//!       &X-Amz-Date=...&X-Amz-Expires=900&X-Amz-SignedHeaders=host&X-Amz-Signature=...
//! ```
//!
//! The `admin` role signs `DbConnectAdmin`; every other role signs `DbConnect`.
//!
//! Credentials come from, in order of precedence:
//!
//! 1. an explicit provider supplied by the caller,
//! 2. the named shared-config profile,
//! 3. the SDK default chain (environment, profile files, SSO, web identity,
//!    container and instance metadata).

use std::fmt;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_dsql::auth_token::{AuthTokenGenerator, Config};
use tokio::sync::OnceCell;

use super::{TokenGenerator, TokenRequest};
use crate::error::{AdapterError, Result};

const ADMIN_USER: &str = "admin";

/// Where the generator gets AWS credentials from.
#[derive(Debug, Clone, Default)]
pub struct CredentialSource {
    /// Shared-config profile name. Ignored when `provider` is set.
    pub profile: Option<String>,
    pub provider: Option<SharedCredentialsProvider>,
}

/// [`TokenGenerator`] backed by the Aurora DSQL SDK signer.
///
/// The SDK configuration is loaded on first use and then reused; credential
/// providers in it cache and refresh on their own.
pub struct IamTokenGenerator {
    source: CredentialSource,
    sdk_config: OnceCell<SdkConfig>,
}

impl fmt::Debug for IamTokenGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IamTokenGenerator")
            .field("profile", &self.source.profile)
            .field("custom_provider", &self.source.provider.is_some())
            .field("loaded", &self.sdk_config.initialized())
            .finish()
    }
}

impl IamTokenGenerator {
    pub fn new(source: CredentialSource) -> Self {
        Self {
            source,
            sdk_config: OnceCell::new(),
        }
    }

    /// Use an already loaded SDK configuration as is.
    pub fn from_sdk_config(config: SdkConfig) -> Self {
        Self {
            source: CredentialSource::default(),
            sdk_config: OnceCell::new_with(Some(config)),
        }
    }

    async fn sdk_config(&self, region: &str) -> &SdkConfig {
        self.sdk_config
            .get_or_init(|| async {
                let mut loader = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(region.to_string()));
                if let Some(provider) = &self.source.provider {
                    loader = loader.credentials_provider(provider.clone());
                } else if let Some(profile) = &self.source.profile {
                    loader = loader.profile_name(profile);
                }
                tracing::debug!(
                    region,
                    profile = ?self.source.profile,
                    custom_provider = self.source.provider.is_some(),
                    "loading aws configuration"
                );
                loader.load().await
            })
            .await
    }
}

#[async_trait]
impl TokenGenerator for IamTokenGenerator {
    async fn generate(&self, request: &TokenRequest) -> Result<String> {
        let sdk_config = self.sdk_config(&request.region).await;

        let signer = AuthTokenGenerator::new(
            Config::builder()
                .hostname(&request.endpoint)
                .region(Region::new(request.region.clone()))
                .expires_in(request.validity.as_secs())
                .build()
                .map_err(|e| AdapterError::Credential(format!("token signer config: {e}")))?,
        );

        let signed = if request.user == ADMIN_USER {
            signer.db_connect_admin_auth_token(sdk_config).await
        } else {
            signer.db_connect_auth_token(sdk_config).await
        };
        let token =
            signed.map_err(|e| AdapterError::Credential(format!("generate auth token: {e}")))?;

        tracing::debug!(
            endpoint = %request.endpoint,
            region = %request.region,
            user = %request.user,
            "generated auth token"
        );
        Ok(token.to_string())
    }
}
