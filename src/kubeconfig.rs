use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// A parsed kubeconfig document.
///
/// Only the fields needed to register a cluster are modelled. Anything else
/// (exec plugins, extensions, preferences) is carried through `extra` so the
/// document can be rendered back for a client without loss.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterConfig {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub clusters: Vec<NamedCluster>,
    #[serde(default)]
    pub users: Vec<NamedUser>,
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_context: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    #[serde(default)]
    pub cluster: Cluster,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Cluster {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default)]
    pub user: User,
}

/// Credential material of a kubeconfig user entry.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("User")
            .field("token", &redact(&self.token))
            .field("client_certificate", &self.client_certificate)
            .field("client_certificate_data", &redact(&self.client_certificate_data))
            .field("client_key", &self.client_key)
            .field("client_key_data", &redact(&self.client_key_data))
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    #[serde(default)]
    pub context: Context,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub cluster: String,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// A context together with the cluster and user entries it points at.
#[derive(Debug)]
pub struct ContextRef<'a> {
    pub name: &'a str,
    pub cluster_name: &'a str,
    pub cluster: &'a Cluster,
    pub user_name: &'a str,
    pub user: &'a User,
}

impl ClusterConfig {
    /// Parse a kubeconfig document from a string.
    pub fn from_str(str: &str) -> Result<Self> {
        Self::from_slice(str.as_bytes())
    }

    /// Parse a kubeconfig document from a slice of bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        Ok(serde_yaml::from_slice(data)?)
    }

    /// Renders the document back as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn context(&self, name: &str) -> Option<&Context> {
        self.contexts
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.context)
    }

    pub fn context_mut(&mut self, name: &str) -> Option<&mut Context> {
        self.contexts
            .iter_mut()
            .find(|c| c.name == name)
            .map(|c| &mut c.context)
    }

    pub fn cluster(&self, name: &str) -> Option<&Cluster> {
        self.clusters
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.cluster)
    }

    pub fn cluster_mut(&mut self, name: &str) -> Option<&mut Cluster> {
        self.clusters
            .iter_mut()
            .find(|c| c.name == name)
            .map(|c| &mut c.cluster)
    }

    pub fn user(&self, name: &str) -> Option<&User> {
        self.users.iter().find(|u| u.name == name).map(|u| &u.user)
    }

    /// Picks the context to operate on.
    ///
    /// A non-empty `context_override` wins over the document's own
    /// `current-context`. Either way the chosen name must exist in the document.
    pub fn active_context(&self, context_override: Option<&str>) -> Result<String> {
        let name = context_override
            .filter(|c| !c.is_empty())
            .or(self.current_context.as_deref())
            .unwrap_or_default();

        if name.is_empty() || self.context(name).is_none() {
            return Err(Error::ContextNotFound(name.to_string()));
        }
        Ok(name.to_string())
    }

    /// Follows a context's cluster and user references.
    pub fn resolve_context(&self, name: &str) -> Result<ContextRef<'_>> {
        let named = self
            .contexts
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::CloudConstruction(format!("context {name:?} not found")))?;
        let context = &named.context;

        let cluster = self.cluster(&context.cluster).ok_or_else(|| {
            Error::CloudConstruction(format!(
                "context {name:?} references unknown cluster {:?}",
                context.cluster
            ))
        })?;
        let user = self.user(&context.user).ok_or_else(|| {
            Error::CloudConstruction(format!(
                "context {name:?} references unknown user {:?}",
                context.user
            ))
        })?;

        Ok(ContextRef {
            name: &named.name,
            cluster_name: &context.cluster,
            cluster,
            user_name: &context.user,
            user,
        })
    }
}

/// Parses a kubeconfig document and selects its active context.
pub fn parse(data: &[u8], context_override: Option<&str>) -> Result<(ClusterConfig, String)> {
    let config = ClusterConfig::from_slice(data)?;
    let context = config.active_context(context_override)?;
    debug!(context, "selected kubeconfig context");
    Ok((config, context))
}
