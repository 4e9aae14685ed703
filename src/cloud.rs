use std::collections::BTreeMap;

use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;

use crate::{kubeconfig::ClusterConfig, resolver::ResolvedConfig, Error, Result};

pub const CLOUD_TYPE: &str = "kubernetes";

/// HostCloudRegion stored when the cluster has no parent cloud.
pub const NO_PARENT_HOST_CLOUD_REGION: &str = "other";

pub const DEFAULT_REGION: &str = "default";

pub const OPERATOR_STORAGE_KEY: &str = "operator-storage";
pub const WORKLOAD_STORAGE_KEY: &str = "workload-storage";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    OAuth2,
    ClientCertificate,
    UserPass,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::OAuth2 => "oauth2",
            AuthType::ClientCertificate => "clientcertificate",
            AuthType::UserPass => "userpass",
        }
    }
}

impl std::fmt::Display for AuthType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CloudRegion {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
}

/// A Kubernetes cloud as registered with the controller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CloudDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub cloud_type: String,
    pub auth_types: Vec<AuthType>,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ca_certificates: Vec<String>,
    pub host_cloud_region: String,
    pub regions: Vec<CloudRegion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<BTreeMap<String, String>>,
}

impl CloudDefinition {
    /// Attaches the storage class used for both operator and workload storage.
    /// An empty class leaves the definition untouched.
    pub fn with_storage_class(mut self, storage_class: &str) -> Self {
        if storage_class.is_empty() {
            return self;
        }
        self.config = Some(BTreeMap::from([
            (OPERATOR_STORAGE_KEY.to_string(), storage_class.to_string()),
            (WORKLOAD_STORAGE_KEY.to_string(), storage_class.to_string()),
        ]));
        self
    }
}

/// A cloud credential: an auth type plus its attributes.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Credential {
    pub auth_type: AuthType,
    pub attributes: BTreeMap<String, String>,
}

impl Credential {
    /// Returns a copy safe to print, with every attribute value hidden.
    pub fn redacted(&self) -> Self {
        Self {
            auth_type: self.auth_type,
            attributes: self
                .attributes
                .keys()
                .map(|k| (k.clone(), "<redacted>".to_string()))
                .collect(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("auth_type", &self.auth_type)
            .field("attributes", &self.attributes.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Addresses a credential by cloud, owner and credential name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialTag {
    cloud: String,
    owner: String,
    name: String,
}

impl CredentialTag {
    pub fn new(cloud: &str, owner: &str, name: &str) -> Self {
        Self {
            cloud: cloud.to_string(),
            owner: owner.to_string(),
            name: name.to_string(),
        }
    }

    pub fn cloud(&self) -> &str {
        &self.cloud
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> String {
        format!("{}/{}/{}", self.cloud, self.owner, self.name)
    }
}

impl std::fmt::Display for CredentialTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cloudcred-{}_{}_{}", self.cloud, self.owner, self.name)
    }
}

/// Encodes the parent cloud placement the controller stores as one field.
///
/// Either side may be empty as long as the other is not; the empty side is
/// kept as an empty segment.
pub fn host_cloud_region(parent_cloud: &str, parent_region: &str) -> String {
    if parent_cloud.is_empty() && parent_region.is_empty() {
        return NO_PARENT_HOST_CLOUD_REGION.to_string();
    }
    format!("{parent_cloud}/{parent_region}")
}

/// Splits a HostCloudRegion into parent cloud and region.
///
/// Anything that is not exactly two `/`-separated parts decodes to two empty strings.
pub fn decode_host_cloud_region(host_cloud_region: &str) -> (String, String) {
    match host_cloud_region.split('/').collect::<Vec<_>>()[..] {
        [cloud, region] => (cloud.to_string(), region.to_string()),
        _ => (String::new(), String::new()),
    }
}

/// Builds the cloud definition for the resolved config's active context.
pub fn build_cloud(
    name: &str,
    resolved: &ResolvedConfig,
    host_cloud_region: String,
) -> Result<CloudDefinition> {
    let context = resolved.config.resolve_context(&resolved.context)?;
    let endpoint = context.cluster.server.clone().ok_or_else(|| {
        Error::CloudConstruction(format!("cluster {:?} has no server", context.cluster_name))
    })?;

    let ca_certificates = read_data(
        context.cluster.certificate_authority_data.as_deref(),
        context.cluster.certificate_authority.as_deref(),
        "certificate authority",
    )?
    .into_iter()
    .collect();

    Ok(CloudDefinition {
        name: name.to_string(),
        cloud_type: CLOUD_TYPE.to_string(),
        auth_types: vec![AuthType::OAuth2, AuthType::ClientCertificate, AuthType::UserPass],
        endpoint: endpoint.clone(),
        ca_certificates,
        host_cloud_region,
        regions: vec![CloudRegion {
            name: DEFAULT_REGION.to_string(),
            endpoint,
        }],
        config: None,
    })
}

/// Builds the credential for the resolved config's active context user.
pub fn build_credential(resolved: &ResolvedConfig) -> Result<Credential> {
    credential_for_context(&resolved.config, &resolved.context)
}

fn credential_for_context(config: &ClusterConfig, context: &str) -> Result<Credential> {
    let context = config.resolve_context(context)?;
    let user = context.user;

    let certificate = read_data(
        user.client_certificate_data.as_deref(),
        user.client_certificate.as_deref(),
        "client certificate",
    )?;
    let key = read_data(
        user.client_key_data.as_deref(),
        user.client_key.as_deref(),
        "client key",
    )?;
    let cert_pair = certificate.zip(key);

    let mut attributes = BTreeMap::new();
    let auth_type = match (&user.token, cert_pair, &user.username, &user.password) {
        // The controller accepts oauth2 credentials that also carry a client certificate.
        (Some(token), cert_pair, _, _) => {
            attributes.insert("Token".to_string(), token.clone());
            if let Some((certificate, key)) = cert_pair {
                attributes.insert("ClientCertificateData".to_string(), certificate);
                attributes.insert("ClientKeyData".to_string(), key);
            }
            AuthType::OAuth2
        }
        (None, Some((certificate, key)), _, _) => {
            attributes.insert("ClientCertificateData".to_string(), certificate);
            attributes.insert("ClientKeyData".to_string(), key);
            AuthType::ClientCertificate
        }
        (None, None, Some(username), Some(password)) => {
            attributes.insert("username".to_string(), username.clone());
            attributes.insert("password".to_string(), password.clone());
            AuthType::UserPass
        }
        _ => {
            return Err(Error::CloudConstruction(format!(
                "user {:?} has no supported credential (token, client certificate or username/password)",
                context.user_name
            )))
        }
    };

    Ok(Credential {
        auth_type,
        attributes,
    })
}

// Inline `-data` fields are base64 encoded; the path variants point at plain files.
fn read_data(data: Option<&str>, path: Option<&str>, what: &str) -> Result<Option<String>> {
    if let Some(data) = data {
        let decoded = general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|e| Error::CloudConstruction(format!("decoding {what}: {e}")))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|e| Error::CloudConstruction(format!("decoding {what}: {e}")))?;
        return Ok(Some(decoded));
    }
    match path {
        Some(path) => std::fs::read_to_string(path)
            .map(Some)
            .map_err(|e| Error::CloudConstruction(format!("reading {what} from {path}: {e}"))),
        None => Ok(None),
    }
}
