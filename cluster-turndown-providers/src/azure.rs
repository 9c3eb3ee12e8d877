//! Azure is a deliberate, permanent capability gap, not a "coming soon". Selection can still
//! detect an Azure node (provider prefix `azure`) so startup fails with a clear error instead of
//! silently misclassifying the cluster as something else; no Azure SDK dependency is introduced
//! and no method here does anything but fail.

use std::collections::HashMap;

use cluster_turndown_core::model::{Node, NodePool, ProviderCapabilities};

use crate::Error;

#[derive(Default)]
pub struct AzureProvider;

impl crate::ProviderAdapter for AzureProvider {
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::AZURE_UNSUPPORTED
    }

    async fn is_turndown_node_pool(&self) -> Result<bool, Error> {
        Err(Error::AzureUnsupported)
    }

    async fn create_singleton_node_pool(
        &self,
        _labels: HashMap<String, String>,
    ) -> Result<NodePool, Error> {
        Err(Error::AzureUnsupported)
    }

    async fn get_node_pools(&self) -> Result<Vec<NodePool>, Error> {
        Err(Error::AzureUnsupported)
    }

    async fn get_pool_id(&self, _node: &Node) -> Result<String, Error> {
        Err(Error::AzureUnsupported)
    }

    async fn set_node_pool_sizes(
        &self,
        _pools: &[NodePool],
        _size: i32,
    ) -> Result<Vec<NodePool>, Error> {
        Err(Error::AzureUnsupported)
    }

    async fn reset_node_pool_sizes(&self, _pools: &[NodePool]) -> Result<Vec<NodePool>, Error> {
        Err(Error::AzureUnsupported)
    }

    async fn validate(&self, _attempts: u32) -> Result<(), Error> {
        Err(Error::AzureUnsupported)
    }
}
