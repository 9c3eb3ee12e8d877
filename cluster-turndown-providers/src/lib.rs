use cluster_turndown_core::{
    PoolId,
    model::{Node, NodePool, ProviderCapabilities},
};
use enum_dispatch::enum_dispatch;
use snafu::Snafu;

pub mod aws_self_managed;
pub mod azure;
pub mod common;
pub mod eks;
pub mod gke;
pub mod metadata;
pub mod select;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("GKE provider error"), context(false))]
    Gke { source: gke::Error },

    #[snafu(display("EKS provider error"), context(false))]
    Eks { source: eks::Error },

    #[snafu(display("self-managed AWS provider error"), context(false))]
    AwsSelfManaged { source: aws_self_managed::Error },

    #[snafu(display("provider selection error"), context(false))]
    Select { source: select::Error },

    #[snafu(display("Azure is not a supported provider"))]
    AzureUnsupported,

    #[snafu(display("a turndown node pool already exists"))]
    AlreadyExists,

    #[snafu(display("node {node:?} is not assigned to any known pool"))]
    UnknownPool { node: String },
}

impl Error {
    pub fn kind(&self) -> cluster_turndown_core::error::ErrorKind {
        use cluster_turndown_core::error::ErrorKind;
        match self {
            Error::AzureUnsupported => ErrorKind::ProviderUnsupported,
            Error::AlreadyExists | Error::UnknownPool { .. } => ErrorKind::Configuration,
            _ => ErrorKind::ProviderUnavailable,
        }
    }
}

/// Per-cloud node pool query and resize abstraction. Every method is idempotent against partial
/// prior completion: resizing an already-correctly-sized pool is a no-op success, not an error.
#[enum_dispatch(ProviderImplementation)]
#[trait_variant::make(SendProviderAdapter: Send)]
pub trait ProviderAdapter {
    /// Pure capability declaration. Turndown strategy selection is a function of this value
    /// alone, never of which enum variant `self` happens to be.
    fn capabilities(&self) -> ProviderCapabilities;

    /// True iff the controller is currently scheduled on a node labeled as the turndown host.
    async fn is_turndown_node_pool(&self) -> Result<bool, Error>;

    /// Idempotently creates a size-1 node pool carrying `cluster-turndown-node=true` merged
    /// into `labels`. Returns [`Error::AlreadyExists`] if a turndown pool is already present.
    async fn create_singleton_node_pool(
        &self,
        labels: std::collections::HashMap<String, String>,
    ) -> Result<NodePool, Error>;

    async fn get_node_pools(&self) -> Result<Vec<NodePool>, Error>;

    /// Stable pool identifier for the pool `node` belongs to.
    async fn get_pool_id(&self, node: &Node) -> Result<PoolId, Error>;

    /// Resizes every listed pool to `size`, disabling autoscaling first. Errors are reported
    /// per pool; partial success across `pools` is allowed but every failure is returned.
    async fn set_node_pool_sizes(
        &self,
        pools: &[NodePool],
        size: i32,
    ) -> Result<Vec<NodePool>, Error>;

    /// Restores every pool to its recorded `original_size`, re-enabling autoscaling with the
    /// bounds recorded at turndown time.
    async fn reset_node_pool_sizes(&self, pools: &[NodePool]) -> Result<Vec<NodePool>, Error>;

    /// Runs up to `attempts` readiness probes against the cloud API, failing fast if
    /// credentials are missing or the API is unreachable.
    async fn validate(&self, attempts: u32) -> Result<(), Error>;
}

#[enum_dispatch]
pub enum ProviderImplementation {
    Gke(gke::GkeProvider),
    Eks(eks::EksProvider),
    AwsSelfManaged(aws_self_managed::AwsSelfManagedProvider),
    Azure(azure::AzureProvider),
}
