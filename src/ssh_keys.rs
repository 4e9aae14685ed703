//! Authorized SSH keys of a model.
//!
//! The controller keeps one keyset per model and misbehaves when add, list and
//! delete calls race against the same model. [`SshKeyGuard`] serializes them
//! behind a read-write lock held for the whole controller round trip. The lock
//! only covers calls made through the same guard instance; guards built
//! separately for the same model do not coordinate.

use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use itertools::Itertools;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    controller_error,
    facade::{
        ConnectionProvider, KeyListFormat, KeyManagerApi, KeyManagerApiFactory, KeyResult,
        ListKeysResult, ScopedConnection,
    },
    BoxError, Error, Result,
};

const KEY_TYPES: &[&str] = &[
    "ssh-rsa",
    "ssh-dss",
    "ssh-ed25519",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
    "sk-ssh-ed25519@openssh.com",
    "sk-ecdsa-sha2-nistp256@openssh.com",
];

#[derive(thiserror::Error, Debug)]
pub enum KeyParseError {
    #[error("No recognised key type in authorized key")]
    MissingKeyType,

    #[error("Missing key data after key type")]
    MissingKeyData,

    #[error("Error decoding base64 key data: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

/// Extracts the identifiers a key can be addressed by.
pub trait KeyParser: Send + Sync {
    /// Returns the key's fingerprint and its trailing comment.
    fn fingerprint_and_comment(&self, key: &str) -> std::result::Result<(String, String), BoxError>;
}

/// Parses `authorized_keys` lines. Fingerprints use the colon separated MD5
/// form the controller reports.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenSshKeyParser;

impl OpenSshKeyParser {
    pub fn parse(&self, key: &str) -> std::result::Result<(String, String), KeyParseError> {
        let fields = key.split_whitespace().collect::<Vec<_>>();
        // Skip any leading options such as `command="..."`.
        let pos = fields
            .iter()
            .position(|f| KEY_TYPES.contains(f))
            .ok_or(KeyParseError::MissingKeyType)?;
        let blob = fields.get(pos + 1).ok_or(KeyParseError::MissingKeyData)?;
        let decoded = general_purpose::STANDARD.decode(blob)?;

        let fingerprint = md5::compute(&decoded)
            .iter()
            .map(|b| format!("{b:02x}"))
            .join(":");
        let comment = fields[pos + 2..].join(" ");
        Ok((fingerprint, comment))
    }
}

impl KeyParser for OpenSshKeyParser {
    fn fingerprint_and_comment(&self, key: &str) -> std::result::Result<(String, String), BoxError> {
        Ok(self.parse(key)?)
    }
}

#[derive(Clone, Debug, Default)]
pub struct CreateSshKeyInput {
    pub username: String,
    pub payload: String,
}

#[derive(Clone, Debug, Default)]
pub struct ReadSshKeyInput {
    pub username: String,
    /// Fingerprint or comment of the key.
    pub key_identifier: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadSshKeyOutput {
    pub payload: String,
}

#[derive(Clone, Debug, Default)]
pub struct DeleteSshKeyInput {
    pub username: String,
    /// Fingerprint or comment of the key.
    pub key_identifier: String,
}

/// Serializes key operations against one model.
pub struct SshKeyGuard<P: ConnectionProvider> {
    provider: P,
    key_api: KeyManagerApiFactory<P::Connection>,
    parser: Arc<dyn KeyParser>,
    model: String,
    lock: RwLock<()>,
}

impl<P: ConnectionProvider> SshKeyGuard<P> {
    pub fn new(
        provider: P,
        key_api: KeyManagerApiFactory<P::Connection>,
        parser: Arc<dyn KeyParser>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            key_api,
            parser,
            model: model.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn connect(&self) -> Result<(ScopedConnection<P::Connection>, Box<dyn KeyManagerApi>)> {
        let conn = self
            .provider
            .connect(Some(&self.model))
            .await
            .map_err(controller_error("connecting to model"))?;
        let conn = ScopedConnection::new(conn);
        let api = (self.key_api)(&*conn);
        Ok((conn, api))
    }

    pub async fn create(&self, input: &CreateSshKeyInput) -> Result<()> {
        let _guard = self.lock.write().await;
        let (_conn, api) = self.connect().await?;

        let results = api
            .add_keys(&input.username, &[input.payload.clone()])
            .await
            .map_err(controller_error("adding ssh key"))?;
        check_key_results(&results)?;
        info!(model = self.model, "ssh key added");
        Ok(())
    }

    pub async fn read(&self, input: &ReadSshKeyInput) -> Result<ReadSshKeyOutput> {
        let _guard = self.lock.read().await;
        let (_conn, api) = self.connect().await?;

        let keys = full_keys(api.as_ref(), &input.username).await?;
        for key in keys {
            if self.matches(&key, &input.key_identifier)? {
                debug!(model = self.model, key = input.key_identifier, "ssh key read");
                return Ok(ReadSshKeyOutput { payload: key });
            }
        }
        Err(Error::NotFound(format!(
            "ssh key {:?} in model {:?}",
            input.key_identifier, self.model
        )))
    }

    /// Deletes a key unless it is the only one left, which the controller refuses.
    pub async fn delete(&self, input: &DeleteSshKeyInput) -> Result<()> {
        let _guard = self.lock.write().await;
        let (_conn, api) = self.connect().await?;

        let keys = full_keys(api.as_ref(), &input.username).await?;
        if let [last] = &keys[..] {
            if self.matches(last, &input.key_identifier)? {
                warn!(
                    model = self.model,
                    key = input.key_identifier,
                    "not deleting the last ssh key of the model"
                );
                return Ok(());
            }
        }

        let results = api
            .delete_keys(&input.username, &[input.key_identifier.clone()])
            .await
            .map_err(controller_error("deleting ssh key"))?;
        check_key_results(&results)?;
        info!(model = self.model, key = input.key_identifier, "ssh key deleted");
        Ok(())
    }

    /// Lists every key of the model. Takes the write lock like the mutating calls.
    pub async fn list(&self, username: &str) -> Result<Vec<String>> {
        let _guard = self.lock.write().await;
        let (_conn, api) = self.connect().await?;
        let keys = full_keys(api.as_ref(), username).await?;
        debug!(model = self.model, count = keys.len(), "ssh keys listed");
        Ok(keys)
    }

    fn matches(&self, key: &str, identifier: &str) -> Result<bool> {
        let (fingerprint, comment) = self
            .parser
            .fingerprint_and_comment(key)
            .map_err(Error::KeyParse)?;
        debug!(fingerprint, comment, "checking ssh key");
        Ok(fingerprint == identifier || comment == identifier)
    }
}

async fn full_keys(api: &dyn KeyManagerApi, username: &str) -> Result<Vec<String>> {
    let results = api
        .list_keys(KeyListFormat::FullKeys, username)
        .await
        .map_err(controller_error("listing ssh keys"))?;
    check_list_results(&results)?;
    Ok(results.into_iter().flat_map(|r| r.keys).collect())
}

fn check_key_results(results: &[KeyResult]) -> Result<()> {
    join_errors(results.iter().map(|r| r.error.as_deref()))
}

fn check_list_results(results: &[ListKeysResult]) -> Result<()> {
    join_errors(results.iter().map(|r| r.error.as_deref()))
}

fn join_errors<'a>(errors: impl Iterator<Item = Option<&'a str>>) -> Result<()> {
    let message = errors.flatten().filter(|e| !e.is_empty()).join("\n");
    if message.is_empty() {
        Ok(())
    } else {
        Err(Error::PartialFailure(message))
    }
}
