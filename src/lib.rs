#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]

/// Boxed error used at the seams where collaborators bring their own error types.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error parsing kubeconfig: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Context {0:?} not found in kubeconfig")]
    ContextNotFound(String),

    #[error("Error resolving service account credential: {0}")]
    CredentialResolution(#[source] BoxError),

    #[error("Error building cloud: {0}")]
    CloudConstruction(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Error parsing ssh key: {0}")]
    KeyParse(#[source] BoxError),

    #[error("Controller error while {phase}: {source}")]
    Controller {
        phase: &'static str,
        #[source]
        source: facade::FacadeError,
    },

    #[error("{0}")]
    PartialFailure(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Field manager used for every server-side apply issued against a target cluster.
pub const FIELD_MANAGER: &str = "kubecloud";

/// Kubeconfig parsing and context selection.
pub mod kubeconfig;

/// External controller interfaces consumed by the clients.
pub mod facade;

pub mod cloud;
pub mod kubernetes_cloud;
pub mod local;
pub mod resolver;
pub mod service_account;
pub mod ssh_keys;

/// Wraps a facade failure with the phase that was running when it happened.
pub(crate) fn controller_error(phase: &'static str) -> impl FnOnce(facade::FacadeError) -> Error {
    move |source| Error::Controller { phase, source }
}
