use std::{collections::HashMap, sync::Arc};

use cluster_turndown_core::model::OriginalPoolSizes;
use cluster_turndown_providers::{ProviderAdapter, ProviderImplementation};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use super::{Error, backoff::retry_with_backoff};
use crate::metrics::Metrics;

/// Strategy for a cloud-managed control plane (GKE, EKS): the controller may run on any node,
/// so turndown only needs a dedicated singleton pool to host it plus a cordon/drain pass over
/// everything else.
pub struct MasterlessStrategy {
    provider: Arc<ProviderImplementation>,
    kube_client: Client,
    metrics: Arc<Metrics>,
}

impl MasterlessStrategy {
    pub fn new(provider: Arc<ProviderImplementation>, kube_client: Client, metrics: Arc<Metrics>) -> Self {
        Self {
            provider,
            kube_client,
            metrics,
        }
    }
}

impl super::TurndownStrategy for MasterlessStrategy {
    #[instrument(skip(self, labels, cancel))]
    async fn turndown(
        &self,
        labels: HashMap<String, String>,
        cancel: CancellationToken,
    ) -> Result<OriginalPoolSizes, Error> {
        match retry_with_backoff(&self.metrics, 5, || {
            self.provider.create_singleton_node_pool(labels.clone())
        })
        .await
        {
            Ok(_) => {}
            Err(cluster_turndown_providers::Error::AlreadyExists) => {}
            Err(source) => return Err(source.into()),
        }

        if !self.provider.is_turndown_node_pool().await? {
            warn!(
                "controller is not scheduled on the turndown node pool; it relies on its own \
                 deployment's node selector/toleration to land there, this strategy does not \
                 relocate the running pod itself"
            );
        }

        super::cordon_and_drain_other_nodes(&self.kube_client, &cancel).await?;
        retry_with_backoff(&self.metrics, 5, || super::record_and_zero_pools(&self.provider)).await
    }

    #[instrument(skip(self, original_sizes, _cancel))]
    async fn turnup(
        &self,
        original_sizes: &OriginalPoolSizes,
        _cancel: CancellationToken,
    ) -> Result<(), Error> {
        retry_with_backoff(&self.metrics, 5, || {
            super::restore_pools(&self.provider, original_sizes)
        })
        .await?;
        super::uncordon_all_nodes(&self.kube_client).await
    }

    #[instrument(skip(self))]
    async fn validate(&self, attempts: u32) -> Result<(), Error> {
        Ok(self.provider.validate(attempts).await?)
    }
}
