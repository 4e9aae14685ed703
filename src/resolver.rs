use std::time::Instant;

use async_trait::async_trait;
use rand::{rngs::OsRng, TryRngCore};
use tracing::info;

use crate::{kubeconfig::ClusterConfig, BoxError, Error, Result};

/// Time source handed to resolvers that wait on the target cluster.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Replaces the active context's user with a dedicated administrative
/// service-account credential.
#[async_trait]
pub trait ServiceAccountResolver: Send + Sync {
    async fn resolve(
        &self,
        credential_uid: &str,
        config: &ClusterConfig,
        context: &str,
        clock: &dyn Clock,
    ) -> std::result::Result<ClusterConfig, BoxError>;
}

/// A kubeconfig ready for building a cloud and its credential.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedConfig {
    pub config: ClusterConfig,
    pub context: String,
    /// Set when the credential was minted for a service account.
    pub credential_uid: Option<String>,
}

impl ResolvedConfig {
    /// Keeps the document's own credentials.
    pub fn passthrough(config: ClusterConfig, context: String) -> Self {
        Self {
            config,
            context,
            credential_uid: None,
        }
    }
}

/// Generates the opaque identifier used to name a synthesized credential:
/// 4 bytes from the OS CSPRNG, hex encoded.
pub fn credential_uid() -> Result<String> {
    let mut buf = [0u8; 4];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| Error::CredentialResolution(Box::new(e)))?;
    Ok(hex::encode(buf))
}

/// Resolves the credential a cloud should be registered with.
///
/// Without `synthesize` the parsed document is returned as is.
pub async fn resolve(
    config: ClusterConfig,
    context: String,
    synthesize: bool,
    resolver: &dyn ServiceAccountResolver,
    clock: &dyn Clock,
) -> Result<ResolvedConfig> {
    if !synthesize {
        return Ok(ResolvedConfig::passthrough(config, context));
    }

    let uid = credential_uid()?;
    info!(context, credential_uid = uid, "resolving service account credential");
    let config = resolver
        .resolve(&uid, &config, &context, clock)
        .await
        .map_err(Error::CredentialResolution)?;

    Ok(ResolvedConfig {
        config,
        context,
        credential_uid: Some(uid),
    })
}
