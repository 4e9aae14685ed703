#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kubecloud::{
    cloud::{CloudDefinition, Credential, CredentialTag},
    facade::{
        CloudApi, CloudApiFactory, CloudTag, Connection, ConnectionProvider, FacadeError,
        KeyListFormat, KeyManagerApi, KeyManagerApiFactory, KeyResult, ListKeysResult, UserTag,
    },
    kubeconfig::{ClusterConfig, NamedUser, User},
    resolver::{Clock, ServiceAccountResolver},
    ssh_keys::OpenSshKeyParser,
    BoxError,
};

pub const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: ctx-a
clusters:
- name: cluster-a
  cluster:
    server: https://10.0.0.1:6443
    certificate-authority-data: LS0tLS1CRUdJTiBDRVJUSUZJQ0FURS0tLS0tCmNhCi0tLS0tRU5EIENFUlRJRklDQVRFLS0tLS0K
- name: cluster-b
  cluster:
    server: https://10.0.0.2:6443
users:
- name: user-a
  user:
    token: hunter12
- name: user-b
  user:
    client-certificate-data: Y2VydA==
    client-key-data: a2V5
contexts:
- name: ctx-a
  context:
    cluster: cluster-a
    user: user-a
- name: ctx-b
  context:
    cluster: cluster-b
    user: user-b
"#;

pub struct FakeConnection {
    user: String,
    closed: Arc<AtomicUsize>,
}

impl Connection for FakeConnection {
    fn authenticated_user(&self) -> String {
        self.user.clone()
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct FakeProvider {
    pub user: String,
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
    pub models: Arc<Mutex<Vec<Option<String>>>>,
    pub fail: Arc<AtomicBool>,
}

impl FakeProvider {
    pub fn new(user: &str) -> Self {
        Self {
            user: user.to_string(),
            opened: Default::default(),
            closed: Default::default(),
            models: Default::default(),
            fail: Default::default(),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionProvider for FakeProvider {
    type Connection = FakeConnection;

    async fn connect(&self, model: Option<&str>) -> Result<FakeConnection, FacadeError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(FacadeError::Connection("controller unreachable".to_string()));
        }
        self.models.lock().unwrap().push(model.map(str::to_string));
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConnection {
            user: self.user.clone(),
            closed: self.closed.clone(),
        })
    }
}

#[derive(Default)]
pub struct CloudState {
    pub clouds: Mutex<BTreeMap<String, CloudDefinition>>,
    pub credentials: Mutex<Vec<(String, Credential)>>,
    pub user_credentials: Mutex<Vec<CredentialTag>>,
    pub fail_add_credential: AtomicBool,
}

struct FakeCloudApi(Arc<CloudState>);

#[async_trait]
impl CloudApi for FakeCloudApi {
    async fn add_cloud(&self, cloud: &CloudDefinition, update_if_exists: bool) -> Result<(), FacadeError> {
        let mut clouds = self.0.clouds.lock().unwrap();
        if clouds.contains_key(&cloud.name) && !update_if_exists {
            return Err(FacadeError::Api(format!("cloud {:?} already exists", cloud.name)));
        }
        clouds.insert(cloud.name.clone(), cloud.clone());
        Ok(())
    }

    async fn cloud(&self, tag: &CloudTag) -> Result<CloudDefinition, FacadeError> {
        self.0
            .clouds
            .lock()
            .unwrap()
            .get(tag.id())
            .cloned()
            .ok_or_else(|| FacadeError::NotFound(tag.to_string()))
    }

    async fn update_cloud(&self, cloud: &CloudDefinition) -> Result<(), FacadeError> {
        let mut clouds = self.0.clouds.lock().unwrap();
        match clouds.get_mut(&cloud.name) {
            Some(existing) => {
                *existing = cloud.clone();
                Ok(())
            }
            None => Err(FacadeError::NotFound(format!("cloud {:?}", cloud.name))),
        }
    }

    async fn remove_cloud(&self, name: &str) -> Result<(), FacadeError> {
        self.0
            .clouds
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| FacadeError::NotFound(format!("cloud {name:?}")))
    }

    async fn user_credentials(
        &self,
        user: &UserTag,
        cloud: &CloudTag,
    ) -> Result<Vec<CredentialTag>, FacadeError> {
        Ok(self
            .0
            .user_credentials
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.cloud() == cloud.id() && t.owner() == user.id())
            .cloned()
            .collect())
    }

    async fn add_credential(&self, tag: &str, credential: &Credential) -> Result<(), FacadeError> {
        if self.0.fail_add_credential.load(Ordering::SeqCst) {
            return Err(FacadeError::Api("permission denied".to_string()));
        }
        self.0
            .credentials
            .lock()
            .unwrap()
            .push((tag.to_string(), credential.clone()));
        Ok(())
    }
}

pub fn cloud_api(state: Arc<CloudState>) -> CloudApiFactory<FakeConnection> {
    Arc::new(move |_conn: &FakeConnection| Box::new(FakeCloudApi(state.clone())) as Box<dyn CloudApi>)
}

/// Swaps in a user named after the credential uid, like a real resolver would.
#[derive(Default)]
pub struct FakeResolver {
    pub calls: AtomicUsize,
    pub uids: Mutex<Vec<String>>,
}

#[async_trait]
impl ServiceAccountResolver for FakeResolver {
    async fn resolve(
        &self,
        credential_uid: &str,
        config: &ClusterConfig,
        context: &str,
        _clock: &dyn Clock,
    ) -> Result<ClusterConfig, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.uids.lock().unwrap().push(credential_uid.to_string());

        let mut config = config.clone();
        let name = format!("juju-credential-{credential_uid}");
        config.users.push(NamedUser {
            name: name.clone(),
            user: User {
                token: Some(format!("sa-token-{credential_uid}")),
                ..Default::default()
            },
        });
        config.context_mut(context).ok_or("context vanished")?.user = name;
        Ok(config)
    }
}

/// A keyset that records how calls overlap.
///
/// `add_keys` and `delete_keys` fail when entered while another call is in
/// flight.
pub struct KeyState {
    pub keys: Mutex<Vec<String>>,
    pub add_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub add_errors: Mutex<Vec<Option<String>>>,
    pub delay: Duration,
}

impl KeyState {
    pub fn new(keys: &[&str]) -> Self {
        Self {
            keys: Mutex::new(keys.iter().map(|k| k.to_string()).collect()),
            add_calls: Default::default(),
            list_calls: Default::default(),
            delete_calls: Default::default(),
            active: Default::default(),
            max_active: Default::default(),
            add_errors: Default::default(),
            delay: Duration::from_millis(20),
        }
    }

    fn enter(&self) -> usize {
        let before = self.active.fetch_add(1, Ordering::SeqCst);
        self.max_active.fetch_max(before + 1, Ordering::SeqCst);
        before
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

pub struct FakeKeyApi(pub Arc<KeyState>);

#[async_trait]
impl KeyManagerApi for FakeKeyApi {
    async fn add_keys(&self, _user: &str, keys: &[String]) -> Result<Vec<KeyResult>, FacadeError> {
        self.0.add_calls.fetch_add(1, Ordering::SeqCst);
        let reentered = self.0.enter() > 0;
        tokio::time::sleep(self.0.delay).await;
        self.0.leave();
        if reentered {
            return Err(FacadeError::Api("concurrent key mutation".to_string()));
        }

        let scripted = std::mem::take(&mut *self.0.add_errors.lock().unwrap());
        if !scripted.is_empty() {
            return Ok(scripted.into_iter().map(|error| KeyResult { error }).collect());
        }
        self.0.keys.lock().unwrap().extend(keys.iter().cloned());
        Ok(keys.iter().map(|_| KeyResult::default()).collect())
    }

    async fn list_keys(
        &self,
        format: KeyListFormat,
        _user: &str,
    ) -> Result<Vec<ListKeysResult>, FacadeError> {
        assert_eq!(format, KeyListFormat::FullKeys);
        self.0.list_calls.fetch_add(1, Ordering::SeqCst);
        self.0.enter();
        tokio::time::sleep(self.0.delay).await;
        self.0.leave();
        Ok(vec![ListKeysResult {
            keys: self.0.keys(),
            error: None,
        }])
    }

    async fn delete_keys(&self, _user: &str, ids: &[String]) -> Result<Vec<KeyResult>, FacadeError> {
        self.0.delete_calls.fetch_add(1, Ordering::SeqCst);
        let reentered = self.0.enter() > 0;
        tokio::time::sleep(self.0.delay).await;
        self.0.leave();
        if reentered {
            return Err(FacadeError::Api("concurrent key mutation".to_string()));
        }

        let mut keys = self.0.keys.lock().unwrap();
        Ok(ids
            .iter()
            .map(|id| {
                let before = keys.len();
                keys.retain(|k| match OpenSshKeyParser.parse(k) {
                    Ok((fingerprint, comment)) => &fingerprint != id && &comment != id,
                    Err(_) => true,
                });
                KeyResult {
                    error: (keys.len() == before).then(|| format!("invalid ssh key: {id}")),
                }
            })
            .collect())
    }
}

pub fn key_api(state: Arc<KeyState>) -> KeyManagerApiFactory<FakeConnection> {
    Arc::new(move |_conn: &FakeConnection| Box::new(FakeKeyApi(state.clone())) as Box<dyn KeyManagerApi>)
}
