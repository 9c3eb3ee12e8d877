use std::{collections::HashMap, sync::Arc};

use cluster_turndown_core::model::OriginalPoolSizes;
use cluster_turndown_providers::{ProviderAdapter, ProviderImplementation};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::{Error, backoff::retry_with_backoff};
use crate::metrics::Metrics;

/// Strategy for a self-managed control plane: the controller must stay put, so instead of
/// creating a new pool the provider adapter tags the controller's current host auto scaling
/// group as the turndown survivor and splits it to desired-capacity 1.
pub struct StandardStrategy {
    provider: Arc<ProviderImplementation>,
    kube_client: Client,
    metrics: Arc<Metrics>,
}

impl StandardStrategy {
    pub fn new(provider: Arc<ProviderImplementation>, kube_client: Client, metrics: Arc<Metrics>) -> Self {
        Self {
            provider,
            kube_client,
            metrics,
        }
    }
}

impl super::TurndownStrategy for StandardStrategy {
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
