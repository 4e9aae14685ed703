use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::cloud::{CloudDefinition, Credential, CredentialTag};

/// Failures reported by the controller or by the transport to it.
#[derive(thiserror::Error, Debug)]
pub enum FacadeError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("{0}")]
    Api(String),
}

/// An open session with the controller.
pub trait Connection: Send + Sync {
    /// Name of the principal this connection authenticated as.
    fn authenticated_user(&self) -> String;

    fn close(&self);
}

#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    type Connection: Connection + 'static;

    /// Opens a connection to the controller, or to a model when one is given.
    async fn connect(&self, model: Option<&str>) -> Result<Self::Connection, FacadeError>;
}

/// Owns a connection for the duration of one operation and closes it when
/// dropped, whichever way the operation exits.
pub struct ScopedConnection<C: Connection> {
    inner: C,
}

impl<C: Connection> ScopedConnection<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

impl<C: Connection> Deref for ScopedConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.inner
    }
}

impl<C: Connection> Drop for ScopedConnection<C> {
    fn drop(&mut self) {
        debug!("closing controller connection");
        self.inner.close();
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloudTag(String);

impl CloudTag {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CloudTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cloud-{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserTag(String);

impl UserTag {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user-{}", self.0)
    }
}

/// Cloud management calls exposed by the controller.
#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn add_cloud(&self, cloud: &CloudDefinition, update_if_exists: bool) -> Result<(), FacadeError>;

    async fn cloud(&self, tag: &CloudTag) -> Result<CloudDefinition, FacadeError>;

    /// Replaces the stored definition wholesale; the controller has no partial update.
    async fn update_cloud(&self, cloud: &CloudDefinition) -> Result<(), FacadeError>;

    async fn remove_cloud(&self, name: &str) -> Result<(), FacadeError>;

    async fn user_credentials(
        &self,
        user: &UserTag,
        cloud: &CloudTag,
    ) -> Result<Vec<CredentialTag>, FacadeError>;

    async fn add_credential(&self, tag: &str, credential: &Credential) -> Result<(), FacadeError>;
}

/// Builds a cloud facade client on top of an open connection.
pub type CloudApiFactory<C> = Arc<dyn Fn(&C) -> Box<dyn CloudApi> + Send + Sync>;

/// Outcome of one key in an add or delete call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyResult {
    pub error: Option<String>,
}

/// Keys returned for one user by a list call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListKeysResult {
    pub keys: Vec<String>,
    pub error: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyListFormat {
    Fingerprints,
    FullKeys,
}

/// Authorized-key calls exposed by the controller.
///
/// The keyset is per model: `user` is accepted but keys are not partitioned by it.
#[async_trait]
pub trait KeyManagerApi: Send + Sync {
    async fn add_keys(&self, user: &str, keys: &[String]) -> Result<Vec<KeyResult>, FacadeError>;

    async fn list_keys(
        &self,
        format: KeyListFormat,
        user: &str,
    ) -> Result<Vec<ListKeysResult>, FacadeError>;

    async fn delete_keys(&self, user: &str, ids: &[String]) -> Result<Vec<KeyResult>, FacadeError>;
}

pub type KeyManagerApiFactory<C> = Arc<dyn Fn(&C) -> Box<dyn KeyManagerApi> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    impl Connection for Counting {
        fn authenticated_user(&self) -> String {
            "admin".to_string()
        }

        fn close(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn failing_step(conn: &ScopedConnection<Counting>) -> Result<(), FacadeError> {
        let _ = conn.authenticated_user();
        Err(FacadeError::Api("boom".to_string()))
    }

    #[test]
    fn scoped_connection_closes_on_error() {
        let closed = Arc::new(AtomicUsize::new(0));
        let conn = ScopedConnection::new(Counting(closed.clone()));
        assert!(failing_step(&conn).is_err());
        drop(conn);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tags() {
        assert_eq!(CloudTag::new("k8s").to_string(), "cloud-k8s");
        assert_eq!(UserTag::new("admin").to_string(), "user-admin");
        assert_eq!(UserTag::new("admin").id(), "admin");
    }
}
