//! EKS managed node groups. Detected by the `eks.amazonaws.com/nodegroup` label carried by a
//! node provisioned by a managed node group, combined with an `aws` provider prefix on the node
//! spec. Built on `aws-sdk-eks`, the same SDK crate the EKS-focused examples in this workspace's
//! grounding pack use to drive node group resizes.

use std::collections::HashMap;

use aws_sdk_eks::types::NodegroupScalingConfig;
use cluster_turndown_core::{
    PoolId,
    model::{Node, NodePool, ProviderCapabilities, TURNDOWN_NODE_LABEL},
};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::instrument;

pub const EKS_NODEGROUP_LABEL: &str = "eks.amazonaws.com/nodegroup";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to list EKS node groups for cluster {cluster:?}"))]
    ListNodegroups {
        source: aws_sdk_eks::error::SdkError<aws_sdk_eks::operation::list_nodegroups::ListNodegroupsError>,
        cluster: String,
    },

    #[snafu(display("failed to describe EKS node group {nodegroup:?}"))]
    DescribeNodegroup {
        source: aws_sdk_eks::error::SdkError<
            aws_sdk_eks::operation::describe_nodegroup::DescribeNodegroupError,
        >,
        nodegroup: String,
    },

    #[snafu(display("failed to create EKS node group {nodegroup:?}"))]
    CreateNodegroup {
        source:
            aws_sdk_eks::error::SdkError<aws_sdk_eks::operation::create_nodegroup::CreateNodegroupError>,
        nodegroup: String,
    },

    #[snafu(display("failed to resize EKS node group {nodegroup:?}"))]
    UpdateNodegroupConfig {
        source: aws_sdk_eks::error::SdkError<
            aws_sdk_eks::operation::update_nodegroup_config::UpdateNodegroupConfigError,
        >,
        nodegroup: String,
    },

    #[snafu(display("node {node:?} carries no {EKS_NODEGROUP_LABEL:?} label"))]
    NodeWithoutPoolLabel { node: String },

    #[snafu(display("failed to read the controller's current node from the API server"))]
    ReadCurrentNode { source: kube::Error },

    #[snafu(display("node group {name:?} not found"))]
    NodegroupNotFound { name: String },

    #[snafu(display(
        "cannot create the turndown node group: nodegroupRoleArn and nodegroupSubnetIds must be configured"
    ))]
    MissingNodegroupProvisioningConfig,
}

pub struct EksProvider {
    kube_client: kube::Client,
    eks: aws_sdk_eks::Client,
    cluster_name: String,
    nodegroup_role_arn: Option<String>,
    nodegroup_subnet_ids: Vec<String>,
}

impl EksProvider {
    pub fn new(
        kube_client: kube::Client,
        config: &aws_config::SdkConfig,
        cluster_name: String,
        nodegroup_role_arn: Option<String>,
        nodegroup_subnet_ids: Vec<String>,
    ) -> Self {
        Self {
            kube_client,
            eks: aws_sdk_eks::Client::new(config),
            cluster_name,
            nodegroup_role_arn,
            nodegroup_subnet_ids,
        }
    }

    #[instrument(skip(self))]
    async fn describe(&self, name: &str) -> Result<NodePool, Error> {
        let output = self
            .eks
            .describe_nodegroup()
            .cluster_name(&self.cluster_name)
            .nodegroup_name(name)
            .send()
            .await
            .context(DescribeNodegroupSnafu { nodegroup: name })?;

        let nodegroup = output.nodegroup.context(NodegroupNotFoundSnafu { name })?;
        let scaling = nodegroup.scaling_config.clone();
        let labels = nodegroup.labels.clone().unwrap_or_default();

        Ok(NodePool {
            name: name.to_string(),
            id: name.to_string(),
            current_size: scaling.as_ref().and_then(|s| s.desired_size).unwrap_or(0),
            original_size: None,
            autoscaling_enabled: false,
            is_turndown_pool: labels
                .get(TURNDOWN_NODE_LABEL)
                .map(|v| v == "true")
                .unwrap_or(false),
            min_size: scaling.as_ref().and_then(|s| s.min_size),
            max_size: scaling.as_ref().and_then(|s| s.max_size),
        })
    }

    #[instrument(skip(self))]
    pub async fn get_node_pools(&self) -> Result<Vec<NodePool>, Error> {
        let output = self
            .eks
            .list_nodegroups()
            .cluster_name(&self.cluster_name)
            .send()
            .await
            .context(ListNodegroupsSnafu {
                cluster: &self.cluster_name,
            })?;

        let mut pools = Vec::new();
        for name in output.nodegroups.unwrap_or_default() {
            pools.push(self.describe(&name).await?);
        }
        Ok(pools)
    }

    /// Updates a node group's desired size along with its min/max bounds in the same call, since
    /// EKS enforces `minSize <= desiredSize <= maxSize` on every `update_nodegroup_config` and
    /// rejects a bare desired-size change that would violate a bound left over from before.
    #[instrument(skip(self))]
    pub async fn resize(
        &self,
        name: &str,
        size: i32,
        min: Option<i32>,
        max: Option<i32>,
    ) -> Result<(), Error> {
        let mut scaling = NodegroupScalingConfig::builder().desired_size(size);
        if let Some(min) = min {
            scaling = scaling.min_size(min);
        }
        if let Some(max) = max {
            scaling = scaling.max_size(max);
        }
        self.eks
            .update_nodegroup_config()
            .cluster_name(&self.cluster_name)
            .nodegroup_name(name)
            .scaling_config(scaling.build())
            .send()
            .await
            .context(UpdateNodegroupConfigSnafu { nodegroup: name })?;
        Ok(())
    }

    pub fn pool_id_of(&self, node: &Node) -> Result<PoolId, Error> {
        node.labels
            .get(EKS_NODEGROUP_LABEL)
            .cloned()
            .context(NodeWithoutPoolLabelSnafu { node: &node.name })
    }
}

impl crate::ProviderAdapter for EksProvider {
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::EKS
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
        mut labels: HashMap<String, String>,
    ) -> Result<NodePool, crate::Error> {
        let existing = self.get_node_pools().await?;
        if existing.iter().any(|p| p.is_turndown_pool) {
            return Err(crate::Error::AlreadyExists);
        }

        let (role_arn, subnets) = match (&self.nodegroup_role_arn, self.nodegroup_subnet_ids.as_slice()) {
            (Some(role_arn), subnets) if !subnets.is_empty() => (role_arn.clone(), subnets.to_vec()),
            _ => return Err(Error::MissingNodegroupProvisioningConfig.into()),
        };

        labels.insert(TURNDOWN_NODE_LABEL.to_string(), "true".to_string());
        let name = "cluster-turndown";
        self.eks
            .create_nodegroup()
            .cluster_name(&self.cluster_name)
            .nodegroup_name(name)
            .node_role(role_arn)
            .set_subnets(Some(subnets))
            .scaling_config(
                NodegroupScalingConfig::builder()
                    .desired_size(1)
                    .min_size(1)
                    .max_size(1)
                    .build(),
            )
            .set_labels(Some(labels))
            .send()
            .await
            .context(CreateNodegroupSnafu { nodegroup: name })?;

        self.describe(name).await.map_err(Into::into)
    }

    #[instrument(skip(self))]
    async fn get_node_pools(&self) -> Result<Vec<NodePool>, crate::Error> {
        Ok(EksProvider::get_node_pools(self).await?)
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
            // min_size must not exceed the new desired size, or EKS rejects the update.
            self.resize(&pool.name, size, Some(0), pool.max_size).await?;
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
            self.resize(&pool.name, original_size, pool.min_size, pool.max_size)
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
            match EksProvider::get_node_pools(self).await {
                Ok(_) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.expect("attempts is at least 1").into())
    }
}
