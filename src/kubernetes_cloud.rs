//! Registration of Kubernetes clusters as clouds on the controller.
//!
//! Every operation opens its own controller connection and releases it on
//! return. Nothing is retried and a failed Create is not rolled back: if the
//! credential cannot be added the cloud stays registered.

use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    cloud::{self, CredentialTag},
    controller_error,
    facade::{
        CloudApi, CloudApiFactory, CloudTag, Connection, ConnectionProvider, FacadeError,
        ScopedConnection, UserTag,
    },
    kubeconfig,
    resolver::{self, Clock, ResolvedConfig, ServiceAccountResolver},
    Error, Result,
};

#[derive(Clone, Debug, Default)]
pub struct CreateKubernetesCloudInput {
    pub name: String,
    pub kubernetes_config: String,
    /// Overrides the document's `current-context` when non-empty.
    pub context_name: Option<String>,
    pub parent_cloud_name: String,
    pub parent_cloud_region: String,
    /// Register a dedicated service account instead of the document's own user.
    pub create_service_account: bool,
    pub storage_class_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadKubernetesCloudOutput {
    pub name: String,
    pub credential_name: String,
    pub parent_cloud_name: String,
    pub parent_cloud_region: String,
}

#[derive(Clone, Debug, Default)]
pub struct UpdateKubernetesCloudInput {
    pub name: String,
    pub kubernetes_config: String,
    pub context_name: Option<String>,
    pub parent_cloud_name: String,
    pub parent_cloud_region: String,
    pub create_service_account: bool,
}

pub struct KubernetesCloudClient<P: ConnectionProvider> {
    provider: P,
    cloud_api: CloudApiFactory<P::Connection>,
    resolver: Arc<dyn ServiceAccountResolver>,
    clock: Arc<dyn Clock>,
    model: Option<String>,
}

impl<P: ConnectionProvider> KubernetesCloudClient<P> {
    pub fn new(
        provider: P,
        cloud_api: CloudApiFactory<P::Connection>,
        resolver: Arc<dyn ServiceAccountResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            cloud_api,
            resolver,
            clock,
            model: None,
        }
    }

    /// Connects to the given model instead of the controller itself.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    async fn connect(&self) -> Result<(ScopedConnection<P::Connection>, Box<dyn CloudApi>)> {
        let conn = self
            .provider
            .connect(self.model.as_deref())
            .await
            .map_err(controller_error("connecting to controller"))?;
        let conn = ScopedConnection::new(conn);
        let api = (self.cloud_api)(&*conn);
        Ok((conn, api))
    }

    /// Parse, resolve and build: the part of Create and Update that does not
    /// talk to the controller.
    async fn prepare(
        &self,
        name: &str,
        kubernetes_config: &str,
        context_name: Option<&str>,
        parent_cloud_name: &str,
        parent_cloud_region: &str,
        create_service_account: bool,
    ) -> Result<(cloud::CloudDefinition, ResolvedConfig)> {
        let (config, context) = kubeconfig::parse(kubernetes_config.as_bytes(), context_name)?;
        let resolved = resolver::resolve(
            config,
            context,
            create_service_account,
            self.resolver.as_ref(),
            self.clock.as_ref(),
        )
        .await?;

        let host_cloud_region = cloud::host_cloud_region(parent_cloud_name, parent_cloud_region);
        let definition = cloud::build_cloud(name, &resolved, host_cloud_region)?;
        debug!(
            cloud = name,
            context = resolved.context,
            host_cloud_region = definition.host_cloud_region,
            "built cloud definition"
        );
        Ok((definition, resolved))
    }

    /// Registers the cloud and a credential named after it. Returns the credential name.
    pub async fn create(&self, input: &CreateKubernetesCloudInput) -> Result<String> {
        let (conn, api) = self.connect().await?;

        let (definition, resolved) = self
            .prepare(
                &input.name,
                &input.kubernetes_config,
                input.context_name.as_deref(),
                &input.parent_cloud_name,
                &input.parent_cloud_region,
                input.create_service_account,
            )
            .await?;
        let definition = definition.with_storage_class(&input.storage_class_name);

        api.add_cloud(&definition, false)
            .await
            .map_err(controller_error("adding cloud"))?;
        info!(cloud = input.name, "cloud added");

        let tag = CredentialTag::new(&input.name, &conn.authenticated_user(), &input.name);
        let credential = cloud::build_credential(&resolved)?;
        api.add_credential(&tag.to_string(), &credential)
            .await
            .map_err(controller_error("adding credential"))?;
        info!(cloud = input.name, credential = %tag, "credential added");

        Ok(tag.name().to_string())
    }

    pub async fn read(&self, name: &str) -> Result<ReadKubernetesCloudOutput> {
        let (conn, api) = self.connect().await?;
        let cloud_tag = CloudTag::new(name);

        let definition = api.cloud(&cloud_tag).await.map_err(|e| match e {
            FacadeError::NotFound(_) => Error::NotFound(format!("cloud {name:?}")),
            e => controller_error("reading cloud")(e),
        })?;

        let user = UserTag::new(conn.authenticated_user());
        let credentials = api
            .user_credentials(&user, &cloud_tag)
            .await
            .map_err(controller_error("listing credentials"))?;
        // The controller does not promise any ordering; the first one wins.
        let credential = credentials.into_iter().next().ok_or_else(|| {
            Error::NotFound(format!("credential for cloud {name:?} owned by {}", user.id()))
        })?;

        let (parent_cloud_name, parent_cloud_region) =
            cloud::decode_host_cloud_region(&definition.host_cloud_region);
        debug!(cloud = name, credential = %credential, "cloud read");

        Ok(ReadKubernetesCloudOutput {
            name: definition.name,
            credential_name: credential.name().to_string(),
            parent_cloud_name,
            parent_cloud_region,
        })
    }

    /// Rebuilds the full definition and submits it; credentials are left alone.
    pub async fn update(&self, input: &UpdateKubernetesCloudInput) -> Result<()> {
        let (_conn, api) = self.connect().await?;

        let (definition, _) = self
            .prepare(
                &input.name,
                &input.kubernetes_config,
                input.context_name.as_deref(),
                &input.parent_cloud_name,
                &input.parent_cloud_region,
                input.create_service_account,
            )
            .await?;

        api.update_cloud(&definition)
            .await
            .map_err(controller_error("updating cloud"))?;
        info!(cloud = input.name, "cloud updated");
        Ok(())
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        let (_conn, api) = self.connect().await?;
        api.remove_cloud(name)
            .await
            .map_err(controller_error("removing cloud"))?;
        info!(cloud = name, "cloud removed");
        Ok(())
    }
}
