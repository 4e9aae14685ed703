use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use k8s_openapi::api::{
    core::v1::{Secret, ServiceAccount},
    rbac::v1::{ClusterRoleBinding, RoleRef, Subject},
};
use kube::{
    api::{Patch, PatchParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::ObjectMeta,
    Api, Client, Config, ResourceExt,
};
use tracing::{debug, info};

use crate::{
    kubeconfig::{ClusterConfig, NamedUser, User},
    resolver::{Clock, ServiceAccountResolver},
    BoxError, Error, Result, FIELD_MANAGER,
};

const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";
const SERVICE_ACCOUNT_NAME_ANNOTATION: &str = "kubernetes.io/service-account.name";
const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

#[derive(Clone, Debug)]
pub struct ServiceAccountOptions {
    pub namespace: String,
    pub name_prefix: String,
    pub cluster_role: String,
    /// How long to wait for the token controller to populate the token secret.
    pub token_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ServiceAccountOptions {
    fn default() -> Self {
        Self {
            namespace: "kube-system".to_string(),
            name_prefix: "juju-credential".to_string(),
            cluster_role: "cluster-admin".to_string(),
            token_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Provisions an administrative service account inside the target cluster and
/// swaps it in as the active context's user.
#[derive(Clone, Debug, Default)]
pub struct KubeServiceAccountResolver {
    options: ServiceAccountOptions,
}

impl KubeServiceAccountResolver {
    pub fn new(options: ServiceAccountOptions) -> Self {
        Self { options }
    }

    pub fn account_name(&self, credential_uid: &str) -> String {
        format!("{}-{credential_uid}", self.options.name_prefix)
    }

    fn metadata(&self, name: &str, namespaced: bool) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: namespaced.then(|| self.options.namespace.clone()),
            labels: Some(BTreeMap::from([(
                MANAGED_BY_LABEL.to_string(),
                FIELD_MANAGER.to_string(),
            )])),
            ..Default::default()
        }
    }

    async fn setup_rbac(&self, client: &Client, name: &str) -> kube::Result<()> {
        let pp = patch_params();

        let service_accounts: Api<ServiceAccount> =
            Api::namespaced(client.clone(), &self.options.namespace);
        let res = ServiceAccount {
            metadata: self.metadata(name, true),
            ..Default::default()
        };
        service_accounts
            .patch(&res.name_any(), &pp, &Patch::Apply(&res))
            .await?;

        let bindings: Api<ClusterRoleBinding> = Api::all(client.clone());
        let res = ClusterRoleBinding {
            metadata: self.metadata(name, false),
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: self.options.cluster_role.clone(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: name.to_string(),
                namespace: Some(self.options.namespace.clone()),
                ..Default::default()
            }]),
        };
        bindings
            .patch(&res.name_any(), &pp, &Patch::Apply(&res))
            .await?;

        let secrets: Api<Secret> = Api::namespaced(client.clone(), &self.options.namespace);
        let mut metadata = self.metadata(name, true);
        metadata.annotations = Some(BTreeMap::from([(
            SERVICE_ACCOUNT_NAME_ANNOTATION.to_string(),
            name.to_string(),
        )]));
        let res = Secret {
            metadata,
            type_: Some(SERVICE_ACCOUNT_TOKEN_TYPE.to_string()),
            ..Default::default()
        };
        secrets
            .patch(&res.name_any(), &pp, &Patch::Apply(&res))
            .await?;

        info!(name, namespace = self.options.namespace, "service account applied");
        Ok(())
    }

    /// Creates the account through `client` and returns `config` switched over to it.
    async fn provision(
        &self,
        client: &Client,
        credential_uid: &str,
        config: &ClusterConfig,
        context: &str,
        clock: &dyn Clock,
    ) -> std::result::Result<ClusterConfig, BoxError> {
        let name = self.account_name(credential_uid);

        self.setup_rbac(client, &name).await?;
        let (token, ca) = self.wait_for_token(client, &name, clock).await?;

        Ok(with_service_account_user(config, context, &name, token, &ca)?)
    }

    /// Polls the token secret until the token controller has filled it in.
    async fn wait_for_token(
        &self,
        client: &Client,
        name: &str,
        clock: &dyn Clock,
    ) -> std::result::Result<(String, Vec<u8>), BoxError> {
        let secrets: Api<Secret> = Api::namespaced(client.clone(), &self.options.namespace);
        let deadline = clock.now() + self.options.token_timeout;

        loop {
            let secret = secrets.get_opt(name).await?;
            let data = secret.as_ref().and_then(|s| s.data.as_ref());
            if let Some((token, ca)) = data.and_then(|d| d.get("token").zip(d.get("ca.crt"))) {
                return Ok((String::from_utf8(token.0.clone())?, ca.0.clone()));
            }

            if clock.now() >= deadline {
                return Err(format!(
                    "timed out after {:?} waiting for token in secret {}/{name}",
                    self.options.token_timeout, self.options.namespace
                )
                .into());
            }
            debug!(name, "token not populated yet");
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }
}

#[async_trait]
impl ServiceAccountResolver for KubeServiceAccountResolver {
    async fn resolve(
        &self,
        credential_uid: &str,
        config: &ClusterConfig,
        context: &str,
        clock: &dyn Clock,
    ) -> std::result::Result<ClusterConfig, BoxError> {
        let client = client_for(config, context).await?;
        self.provision(&client, credential_uid, config, context, clock)
            .await
    }
}

fn patch_params() -> PatchParams {
    PatchParams::apply(FIELD_MANAGER).force()
}

/// Builds a client that talks to the cluster behind `context`.
///
/// kube loads the rendered YAML itself, so auth fields this crate does not
/// model (exec plugins, auth providers) still reach the client through the
/// flattened `extra` maps.
async fn client_for(
    config: &ClusterConfig,
    context: &str,
) -> std::result::Result<Client, BoxError> {
    let kubeconfig = Kubeconfig::from_yaml(&config.to_yaml()?)?;
    let options = KubeConfigOptions {
        context: Some(context.to_string()),
        ..Default::default()
    };
    let config = Config::from_custom_kubeconfig(kubeconfig, &options).await?;
    Ok(Client::try_from(config)?)
}

/// Returns a copy of `config` whose `context` authenticates as the named
/// service account, trusting the CA the token secret was issued with.
pub fn with_service_account_user(
    config: &ClusterConfig,
    context: &str,
    account: &str,
    token: String,
    ca: &[u8],
) -> Result<ClusterConfig> {
    let mut config = config.clone();

    let named_context = config
        .context_mut(context)
        .ok_or_else(|| Error::ContextNotFound(context.to_string()))?;
    named_context.user = account.to_string();
    let cluster_name = named_context.cluster.clone();

    config.users.retain(|u| u.name != account);
    config.users.push(NamedUser {
        name: account.to_string(),
        user: User {
            token: Some(token),
            ..Default::default()
        },
    });

    if !ca.is_empty() {
        let cluster = config.cluster_mut(&cluster_name).ok_or_else(|| {
            Error::CloudConstruction(format!("cluster {cluster_name:?} not found"))
        })?;
        cluster.certificate_authority_data = Some(general_purpose::STANDARD.encode(ca));
        cluster.certificate_authority = None;
    }

    Ok(config)
}
