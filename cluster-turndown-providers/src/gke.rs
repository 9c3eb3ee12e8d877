//! GKE node pool management. Talks to the Container Engine REST API and the GCE instance
//! metadata service directly over [`reqwest`], rather than a dedicated Google Cloud SDK crate
//! (none of the examples this crate is grounded on depend on one).

use std::collections::HashMap;

use cluster_turndown_core::{
    PoolId,
    model::{Node, NodePool, ProviderCapabilities, TURNDOWN_NODE_LABEL},
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::instrument;

use crate::metadata::GceMetadataClient;

const CONTAINER_API_BASE: &str = "https://container.googleapis.com/v1";
const GKE_NODEPOOL_LABEL: &str = "cloud.google.com/gke-nodepool";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("could not determine GCE project id"))]
    MissingProjectId,

    #[snafu(display("could not determine GCE zone"))]
    MissingZone,

    #[snafu(display("could not determine GKE cluster name"))]
    MissingClusterName,

    #[snafu(display("failed to fetch a GCE service account access token"))]
    FetchAccessToken { source: reqwest::Error },

    #[snafu(display("failed to list GKE node pools"))]
    ListNodePools { source: reqwest::Error },

    #[snafu(display("failed to create GKE node pool {name:?}"))]
    CreateNodePool { source: reqwest::Error, name: String },

    #[snafu(display("failed to resize GKE node pool {name:?} to {size}"))]
    ResizeNodePool {
        source: reqwest::Error,
        name: String,
        size: i32,
    },

    #[snafu(display("failed to set autoscaling for GKE node pool {name:?}"))]
    SetAutoscaling { source: reqwest::Error, name: String },

    #[snafu(display("node {node:?} carries no {GKE_NODEPOOL_LABEL:?} label"))]
    NodeWithoutPoolLabel { node: String },

    #[snafu(display("failed to read the controller's current node from the API server"))]
    ReadCurrentNode { source: kube::Error },

    #[snafu(display("pool {name:?} not found among the cluster's node pools"))]
    PoolNotFound { name: String },
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ListNodePoolsResponse {
    #[serde(default)]
    node_pools: Vec<RawNodePool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNodePool {
    name: String,
    #[serde(default)]
    initial_node_count: i32,
    #[serde(default)]
    autoscaling: Option<RawAutoscaling>,
    #[serde(default)]
    config: Option<RawNodeConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAutoscaling {
    #[serde(default)]
    enabled: bool,
    min_node_count: Option<i32>,
    max_node_count: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
struct RawNodeConfig {
    #[serde(default)]
    labels: HashMap<String, String>,
}

impl From<RawNodePool> for NodePool {
    fn from(raw: RawNodePool) -> Self {
        let labels = raw.config.unwrap_or_default().labels;
        let is_turndown_pool = labels
            .get(TURNDOWN_NODE_LABEL)
            .map(|v| v == "true")
            .unwrap_or(false);
        let (autoscaling_enabled, min_size, max_size) = match raw.autoscaling {
            Some(a) => (a.enabled, a.min_node_count, a.max_node_count),
            None => (false, None, None),
        };
        NodePool {
            name: raw.name.clone(),
            id: raw.name,
            current_size: raw.initial_node_count,
            original_size: None,
            autoscaling_enabled,
            is_turndown_pool,
            min_size,
            max_size,
        }
    }
}

pub struct GkeProvider {
    kube_client: kube::Client,
    http: Client,
    project_id: String,
    zone: String,
    cluster_name: String,
}

impl GkeProvider {
    /// Resolves project/zone/cluster from the GCE instance metadata service, caching each value
    /// for the lifetime of this adapter. Overridden by explicit config values when present.
    #[instrument(skip_all)]
    pub async fn new(
        kube_client: kube::Client,
        metadata: &GceMetadataClient,
        project_id_override: Option<String>,
        zone_override: Option<String>,
        cluster_name_override: Option<String>,
    ) -> Result<Self, Error> {
        let project_id = match project_id_override {
            Some(p) => p,
            None => metadata.project_id().await.context(MissingProjectIdSnafu)?,
        };
        let zone = match zone_override {
            Some(z) => z,
            None => metadata.zone().await.context(MissingZoneSnafu)?,
        };
        let cluster_name = match cluster_name_override {
            Some(c) => c,
            None => metadata
                .cluster_name()
                .await
                .context(MissingClusterNameSnafu)?,
        };

        Ok(Self {
            kube_client,
            http: Client::new(),
            project_id,
            zone,
            cluster_name,
        })
    }

    fn node_pools_url(&self) -> String {
        format!(
            "{CONTAINER_API_BASE}/projects/{}/zones/{}/clusters/{}/nodePools",
            self.project_id, self.zone, self.cluster_name
        )
    }

    async fn access_token(&self) -> Result<String, Error> {
        let response: AccessTokenResponse = self
            .http
            .get("http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token")
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .context(FetchAccessTokenSnafu)?
            .json()
            .await
            .context(FetchAccessTokenSnafu)?;
        Ok(response.access_token)
    }

    #[instrument(skip(self))]
    pub async fn get_node_pools(&self) -> Result<Vec<NodePool>, Error> {
        let token = self.access_token().await?;
        let response: ListNodePoolsResponse = self
            .http
            .get(self.node_pools_url())
            .bearer_auth(token)
            .send()
            .await
            .context(ListNodePoolsSnafu)?
            .json()
            .await
            .context(ListNodePoolsSnafu)?;
        Ok(response.node_pools.into_iter().map(NodePool::from).collect())
    }

    #[instrument(skip(self, labels))]
    pub async fn create_singleton_node_pool(
        &self,
        name: &str,
        mut labels: HashMap<String, String>,
    ) -> Result<(), Error> {
        labels.insert(TURNDOWN_NODE_LABEL.to_string(), "true".to_string());
        let token = self.access_token().await?;
        let body = json!({
            "nodePool": {
                "name": name,
                "initialNodeCount": 1,
                "config": { "labels": labels },
            }
        });
        self.http
            .post(self.node_pools_url())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .context(CreateNodePoolSnafu { name })?
            .error_for_status()
            .context(CreateNodePoolSnafu { name })?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn set_node_pool_size(&self, pool_name: &str, size: i32) -> Result<(), Error> {
        let token = self.access_token().await?;

        // Disable autoscaling before resizing, so the autoscaler doesn't fight our resize.
        self.http
            .post(format!(
                "{}/{}/autoscaling",
                self.node_pools_url(),
                pool_name
            ))
            .bearer_auth(token.clone())
            .json(&json!({ "autoscaling": { "enabled": false } }))
            .send()
            .await
            .context(SetAutoscalingSnafu { name: pool_name })?
            .error_for_status()
            .context(SetAutoscalingSnafu { name: pool_name })?;

        self.http
            .post(format!("{}/{}/setSize", self.node_pools_url(), pool_name))
            .bearer_auth(token)
            .json(&json!({ "nodeCount": size }))
            .send()
            .await
            .context(ResizeNodePoolSnafu {
                name: pool_name,
                size,
            })?
            .error_for_status()
            .context(ResizeNodePoolSnafu {
                name: pool_name,
                size,
            })?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn restore_autoscaling(
        &self,
        pool_name: &str,
        min: Option<i32>,
        max: Option<i32>,
    ) -> Result<(), Error> {
        let token = self.access_token().await?;
        self.http
            .post(format!(
                "{}/{}/autoscaling",
                self.node_pools_url(),
                pool_name
            ))
            .bearer_auth(token)
            .json(&json!({
                "autoscaling": { "enabled": true, "minNodeCount": min, "maxNodeCount": max }
            }))
            .send()
            .await
            .context(SetAutoscalingSnafu { name: pool_name })?
            .error_for_status()
            .context(SetAutoscalingSnafu { name: pool_name })?;
        Ok(())
    }

    pub fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::GKE
    }

    pub fn pool_id_of(&self, node: &Node) -> Result<PoolId, Error> {
        node.labels
            .get(GKE_NODEPOOL_LABEL)
            .cloned()
            .context(NodeWithoutPoolLabelSnafu { node: &node.name })
    }
}

impl crate::ProviderAdapter for GkeProvider {
    fn capabilities(&self) -> ProviderCapabilities {
        GkeProvider::capabilities(self)
    }

    #[instrument(skip(self))]
    async fn is_turndown_node_pool(&self) -> Result<bool, crate::Error> {
        let node = crate::common::get_current_node(&self.kube_client)
            .await
            .context(ReadCurrentNodeSnafu)?;
        Ok(node.map(|n| n.is_turndown_node()).unwrap_or(false))
    }

    #[instrument(skip(self, labels))]
    async fn create_singleton_node_pool(
        &self,
        labels: HashMap<String, String>,
    ) -> Result<NodePool, crate::Error> {
        let existing = self.get_node_pools().await?;
        if existing.iter().any(|p| p.is_turndown_pool) {
            return Err(crate::Error::AlreadyExists);
        }

        let name = "cluster-turndown";
        GkeProvider::create_singleton_node_pool(self, name, labels).await?;

        self.get_node_pools()
            .await?
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| PoolNotFoundSnafu { name }.build().into())
    }

    #[instrument(skip(self))]
    async fn get_node_pools(&self) -> Result<Vec<NodePool>, crate::Error> {
        Ok(GkeProvider::get_node_pools(self).await?)
    }

    #[instrument(skip(self))]
    async fn get_pool_id(&self, node: &Node) -> Result<PoolId, crate::Error> {
        Ok(self.pool_id_of(node)?)
    }

    #[instrument(skip(self, pools))]
    async fn set_node_pool_sizes(
        &self,
        pools: &[NodePool],
        size: i32,
    ) -> Result<Vec<NodePool>, crate::Error> {
        let mut resized = Vec::with_capacity(pools.len());
        for pool in pools {
            GkeProvider::set_node_pool_size(self, &pool.name, size).await?;
            resized.push(NodePool {
                current_size: size,
                original_size: Some(pool.current_size),
                autoscaling_enabled: false,
                ..pool.clone()
            });
        }
        Ok(resized)
    }

    #[instrument(skip(self, pools))]
    async fn reset_node_pool_sizes(
        &self,
        pools: &[NodePool],
    ) -> Result<Vec<NodePool>, crate::Error> {
        let mut restored = Vec::with_capacity(pools.len());
        for pool in pools {
            let Some(original_size) = pool.original_size else {
                continue;
            };
            GkeProvider::set_node_pool_size(self, &pool.name, original_size).await?;
            GkeProvider::restore_autoscaling(self, &pool.name, pool.min_size, pool.max_size)
                .await?;
            restored.push(NodePool {
                current_size: original_size,
                original_size: None,
                autoscaling_enabled: pool.min_size.is_some() || pool.max_size.is_some(),
                ..pool.clone()
            });
        }
        Ok(restored)
    }

    #[instrument(skip(self))]
    async fn validate(&self, attempts: u32) -> Result<(), crate::Error> {
        let mut last_error = None;
        for _ in 0..attempts.max(1) {
            match GkeProvider::get_node_pools(self).await {
                Ok(_) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.expect("attempts is at least 1").into())
    }
}
