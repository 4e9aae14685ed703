use serde::Serialize;
use tracing::debug;

use crate::{
    cloud::{self, CloudDefinition, Credential, CredentialTag},
    kubeconfig,
    resolver::ResolvedConfig,
    Result,
};

#[derive(Clone, Debug, Default)]
pub struct RenderInput {
    pub name: String,
    pub kubernetes_config: Vec<u8>,
    pub context_name: Option<String>,
    pub parent_cloud_name: String,
    pub parent_cloud_region: String,
    pub storage_class_name: String,
    /// Principal the credential would be registered for.
    pub owner: String,
}

/// What a Create would submit to the controller, with secrets hidden.
#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RenderedCloud {
    pub cloud: CloudDefinition,
    pub credential_tag: String,
    pub credential: Credential,
}

/// Builds the cloud and credential from a kubeconfig without contacting a
/// controller. The document's own credentials are used.
pub fn render(input: &RenderInput) -> Result<RenderedCloud> {
    let (config, context) =
        kubeconfig::parse(&input.kubernetes_config, input.context_name.as_deref())?;
    let resolved = ResolvedConfig::passthrough(config, context);

    let host_cloud_region =
        cloud::host_cloud_region(&input.parent_cloud_name, &input.parent_cloud_region);
    let definition = cloud::build_cloud(&input.name, &resolved, host_cloud_region)?
        .with_storage_class(&input.storage_class_name);
    let credential = cloud::build_credential(&resolved)?;
    let tag = CredentialTag::new(&input.name, &input.owner, &input.name);
    debug!(cloud = input.name, context = resolved.context, "rendered cloud");

    Ok(RenderedCloud {
        cloud: definition,
        credential_tag: tag.to_string(),
        credential: credential.redacted(),
    })
}
