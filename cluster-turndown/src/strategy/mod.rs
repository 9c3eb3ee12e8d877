use std::{collections::HashMap, sync::Arc};

use cluster_turndown_core::model::{NodePool, OriginalPoolSizes, TURNDOWN_NODE_LABEL};
use cluster_turndown_providers::{ProviderAdapter, ProviderImplementation};
use enum_dispatch::enum_dispatch;
use k8s_openapi::api::core::v1::{Node as K8sNode, Pod};
use kube::{
    Api, Client,
    api::{EvictParams, ListParams, Patch, PatchParams},
};
use snafu::{ResultExt, Snafu};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub mod backoff;
mod masterless;
mod standard;

pub use masterless::MasterlessStrategy;
pub use standard::StandardStrategy;

use crate::metrics::Metrics;

const FIELD_MANAGER: &str = "cluster-turndown";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("provider adapter error"), context(false))]
    Provider {
        source: cluster_turndown_providers::Error,
    },

    #[snafu(display("failed to list cluster nodes"))]
    ListNodes { source: kube::Error },

    #[snafu(display("failed to cordon/uncordon node {node:?}"))]
    PatchNode { source: kube::Error, node: String },

    #[snafu(display("failed to list pods on node {node:?}"))]
    ListPods { source: kube::Error, node: String },

    #[snafu(display("failed to evict pod {pod:?}, likely blocked by a PodDisruptionBudget"))]
    EvictPod { source: kube::Error, pod: String },

    #[snafu(display("turndown cancelled before the drain completed"))]
    Cancelled,
}

impl Error {
    pub fn kind(&self) -> cluster_turndown_core::error::ErrorKind {
        use cluster_turndown_core::error::ErrorKind;
        match self {
            Error::Provider { source } => source.kind(),
            Error::Cancelled => ErrorKind::DrainBudgetExceeded,
            _ => ErrorKind::ProviderUnavailable,
        }
    }
}

impl backoff::Classifiable for Error {
    fn kind(&self) -> cluster_turndown_core::error::ErrorKind {
        Error::kind(self)
    }
}

/// Physical scaledown/restore sequence for a given provider's capability class. `labels` are
/// merged into the turndown node pool created on the first `turndown()`; `validate` probes the
/// cloud API before any other call is attempted.
#[enum_dispatch(TurndownStrategyImplementation)]
#[trait_variant::make(SendTurndownStrategy: Send)]
pub trait TurndownStrategy {
    async fn turndown(
        &self,
        labels: HashMap<String, String>,
        cancel: CancellationToken,
    ) -> Result<OriginalPoolSizes, Error>;

    async fn turnup(
        &self,
        original_sizes: &OriginalPoolSizes,
        cancel: CancellationToken,
    ) -> Result<(), Error>;

    async fn validate(&self, attempts: u32) -> Result<(), Error>;
}

#[enum_dispatch]
pub enum TurndownStrategyImplementation {
    Masterless(MasterlessStrategy),
    Standard(StandardStrategy),
}

/// Selects the strategy variant matching the provider's capability declaration alone, never its
/// concrete type (GKE and EKS both get Masterless; a self-managed control plane of any cloud
/// would get Standard).
pub fn select_strategy(
    provider: Arc<ProviderImplementation>,
    kube_client: Client,
    metrics: Arc<Metrics>,
) -> TurndownStrategyImplementation {
    if provider.capabilities().managed_control_plane {
        MasterlessStrategy::new(provider, kube_client, metrics).into()
    } else {
        StandardStrategy::new(provider, kube_client, metrics).into()
    }
}

#[instrument(skip(client, cancel))]
async fn cordon_and_drain_other_nodes(
    client: &Client,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let nodes: Api<K8sNode> = Api::all(client.clone());
    let list = nodes
        .list(&ListParams::default().labels(&format!("{TURNDOWN_NODE_LABEL}!=true")))
        .await
        .context(ListNodesSnafu)?;

    for node in list.items {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let Some(name) = node.metadata.name.clone() else {
            continue;
        };

        let patch = serde_json::json!({ "spec": { "unschedulable": true } });
        nodes
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Merge(&patch),
            )
            .await
            .context(PatchNodeSnafu { node: name.clone() })?;
        info!(node = %name, "cordoned");

        drain_node(client, &name).await?;
    }
    Ok(())
}

async fn drain_node(client: &Client, node_name: &str) -> Result<(), Error> {
    let pods: Api<Pod> = Api::all(client.clone());
    let list = pods
        .list(&ListParams::default().fields(&format!("spec.nodeName={node_name}")))
        .await
        .context(ListPodsSnafu { node: node_name })?;

    for pod in list.items {
        let Some(name) = pod.metadata.name.clone() else {
            continue;
        };
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let pod_api: Api<Pod> = Api::namespaced(client.clone(), &namespace);

        if let Err(source) = pod_api.evict(&name, &EvictParams::default()).await {
            warn!(pod = %name, node = %node_name, "eviction blocked, likely by a PodDisruptionBudget");
            return Err(Error::EvictPod { source, pod: name });
        }
        info!(pod = %name, node = %node_name, "evicted");
    }
    Ok(())
}

#[instrument(skip(client))]
async fn uncordon_all_nodes(client: &Client) -> Result<(), Error> {
    let nodes: Api<K8sNode> = Api::all(client.clone());
    let list = nodes
        .list(&ListParams::default())
        .await
        .context(ListNodesSnafu)?;

    for node in list.items {
        let Some(name) = node.metadata.name.clone() else {
            continue;
        };
        let patch = serde_json::json!({ "spec": { "unschedulable": false } });
        nodes
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Merge(&patch),
            )
            .await
            .context(PatchNodeSnafu { node: name })?;
    }
    Ok(())
}

/// Records every non-turndown pool's current size and scales it to zero. Idempotent: a pool
/// already at size 0 is resized to 0 again, a no-op success.
async fn record_and_zero_pools(
    provider: &ProviderImplementation,
) -> Result<OriginalPoolSizes, Error> {
    let pools: Vec<NodePool> = provider
        .get_node_pools()
        .await?
        .into_iter()
        .filter(|p| !p.is_turndown_pool)
        .collect();

    let resized = provider.set_node_pool_sizes(&pools, 0).await?;

    Ok(resized
        .into_iter()
        .filter_map(|p| p.original_size.map(|original| (p.id, original)))
        .collect())
}

/// Restores every pool named in `original_sizes` to its recorded size. Pools absent from the
/// map (didn't exist at turndown time) are left untouched.
async fn restore_pools(
    provider: &ProviderImplementation,
    original_sizes: &OriginalPoolSizes,
) -> Result<(), Error> {
    let pools: Vec<NodePool> = provider
        .get_node_pools()
        .await?
        .into_iter()
        .filter_map(|mut pool| {
            original_sizes.get(&pool.id).map(|&original| {
                pool.original_size = Some(original);
                pool
            })
        })
        .collect();

    provider.reset_node_pool_sizes(&pools).await?;
    Ok(())
}
