//! Self-managed AWS: plain auto scaling groups, no cloud-managed control plane. The controller
//! therefore cannot be relocated to a pool created for the occasion — instead it stays on the
//! node it is already running on, tags that ASG as the "turndown survivor", and splits it down
//! to desired-capacity 1 rather than creating a brand new pool. Built on `aws-sdk-autoscaling`,
//! following the same SDK-wrapping shape as the EKS backend.

use std::collections::HashMap;

use aws_sdk_autoscaling::types::Tag;
use cluster_turndown_core::{
    PoolId,
    model::{Node, NodePool, ProviderCapabilities, TURNDOWN_NODE_LABEL},
};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::instrument;

pub const ASG_NAME_TAG: &str = "aws:autoscaling:groupName";
const SURVIVOR_TAG: &str = "cluster-turndown/survivor";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to describe auto scaling groups"))]
    DescribeAutoScalingGroups {
        source: aws_sdk_autoscaling::error::SdkError<
            aws_sdk_autoscaling::operation::describe_auto_scaling_groups::DescribeAutoScalingGroupsError,
        >,
    },

    #[snafu(display("failed to resize auto scaling group {name:?}"))]
    UpdateAutoScalingGroup {
        source: aws_sdk_autoscaling::error::SdkError<
            aws_sdk_autoscaling::operation::update_auto_scaling_group::UpdateAutoScalingGroupError,
        >,
        name: String,
    },

    #[snafu(display("failed to tag auto scaling group {name:?}"))]
    CreateOrUpdateTags {
        source: aws_sdk_autoscaling::error::SdkError<
            aws_sdk_autoscaling::operation::create_or_update_tags::CreateOrUpdateTagsError,
        >,
        name: String,
    },

    #[snafu(display("node {node:?} carries no {ASG_NAME_TAG:?} provider id"))]
    NodeWithoutPoolId { node: String },

    #[snafu(display("failed to read the controller's current node from the API server"))]
    ReadCurrentNode { source: kube::Error },

    #[snafu(display("could not determine the node the controller is currently running on"))]
    UnknownCurrentNode,

    #[snafu(display("auto scaling group {name:?} not found"))]
    AutoScalingGroupNotFound { name: String },
}

pub struct AwsSelfManagedProvider {
    kube_client: kube::Client,
    asg: aws_sdk_autoscaling::Client,
}

impl AwsSelfManagedProvider {
    pub fn new(kube_client: kube::Client, config: &aws_config::SdkConfig) -> Self {
        Self {
            kube_client,
            asg: aws_sdk_autoscaling::Client::new(config),
        }
    }

    #[instrument(skip(self))]
    pub async fn describe(&self, name: &str) -> Result<NodePool, Error> {
        let output = self
            .asg
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(name)
            .send()
            .await
            .context(DescribeAutoScalingGroupsSnafu)?;

        let group = output
            .auto_scaling_groups
            .into_iter()
            .next()
            .context(AutoScalingGroupNotFoundSnafu { name })?;

        let is_turndown_pool = group
            .tags
            .iter()
            .any(|t| t.key.as_deref() == Some(SURVIVOR_TAG) && t.value.as_deref() == Some("true"));

        Ok(NodePool {
            name: name.to_string(),
            id: name.to_string(),
            current_size: group.desired_capacity.unwrap_or(0),
            original_size: None,
            autoscaling_enabled: true,
            is_turndown_pool,
            min_size: Some(group.min_size.unwrap_or(0)),
            max_size: Some(group.max_size.unwrap_or(0)),
        })
    }

    #[instrument(skip(self))]
    pub async fn get_node_pools(&self) -> Result<Vec<NodePool>, Error> {
        let output = self
            .asg
            .describe_auto_scaling_groups()
            .send()
            .await
            .context(DescribeAutoScalingGroupsSnafu)?;

        Ok(output
            .auto_scaling_groups
            .into_iter()
            .map(|group| {
                let name = group.auto_scaling_group_name.clone();
                let is_turndown_pool = group.tags.iter().any(|t| {
                    t.key.as_deref() == Some(SURVIVOR_TAG) && t.value.as_deref() == Some("true")
                });
                NodePool {
                    name: name.clone(),
                    id: name,
                    current_size: group.desired_capacity.unwrap_or(0),
                    original_size: None,
                    autoscaling_enabled: true,
                    is_turndown_pool,
                    min_size: Some(group.min_size.unwrap_or(0)),
                    max_size: Some(group.max_size.unwrap_or(0)),
                }
            })
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn resize(
        &self,
        name: &str,
        desired: i32,
        min: Option<i32>,
        max: Option<i32>,
    ) -> Result<(), Error> {
        let mut request = self
            .asg
            .update_auto_scaling_group()
            .auto_scaling_group_name(name)
            .desired_capacity(desired);
        if let Some(min) = min {
            request = request.min_size(min);
        }
        if let Some(max) = max {
            request = request.max_size(max);
        }
        request
            .send()
            .await
            .context(UpdateAutoScalingGroupSnafu { name })?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn tag_survivor(&self, name: &str, survivor: bool) -> Result<(), Error> {
        self.asg
            .create_or_update_tags()
            .tags(
                Tag::builder()
                    .resource_id(name)
                    .resource_type("auto-scaling-group")
                    .key(SURVIVOR_TAG)
                    .value(survivor.to_string())
                    .propagate_at_launch(false)
                    .build(),
            )
            .send()
            .await
            .context(CreateOrUpdateTagsSnafu { name })?;
        Ok(())
    }

    pub fn pool_id_of(&self, node: &Node) -> Result<PoolId, Error> {
        node.labels
            .get(ASG_NAME_TAG)
            .cloned()
            .context(NodeWithoutPoolIdSnafu { node: &node.name })
    }

    #[instrument(skip(self))]
    async fn current_host_pool_name(&self) -> Result<String, Error> {
        let node = crate::common::get_current_node(&self.kube_client)
            .await
            .context(ReadCurrentNodeSnafu)?
            .context(UnknownCurrentNodeSnafu)?;
        self.pool_id_of(&node)
    }
}

impl crate::ProviderAdapter for AwsSelfManagedProvider {
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::AWS_SELF_MANAGED
    }

    #[instrument(skip(self))]
    async fn is_turndown_node_pool(&self) -> Result<bool, crate::Error> {
        let name = self.current_host_pool_name().await?;
        Ok(self.describe(&name).await?.is_turndown_pool)
    }

    /// For self-managed AWS this never creates a new auto scaling group: it tags the
    /// controller's current host ASG as the survivor and splits it down to desired-capacity 1.
    #[instrument(skip(self, _labels))]
    async fn create_singleton_node_pool(
        &self,
        _labels: HashMap<String, String>,
    ) -> Result<NodePool, crate::Error> {
        let name = self.current_host_pool_name().await?;
        let current = self.describe(&name).await?;
        if current.is_turndown_pool {
            return Err(crate::Error::AlreadyExists);
        }

        self.tag_survivor(&name, true).await?;
        self.resize(&name, 1, Some(1), current.max_size).await?;

        Ok(self.describe(&name).await?)
    }

    #[instrument(skip(self))]
    async fn get_node_pools(&self) -> Result<Vec<NodePool>, crate::Error> {
        Ok(AwsSelfManagedProvider::get_node_pools(self).await?)
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
            // min_size must not exceed the new desired size, or AWS rejects the update.
            self.resize(&pool.name, size, Some(0), pool.max_size).await?;
            resized.push(NodePool {
                current_size: size,
                original_size: Some(pool.current_size),
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
                ..pool.clone()
            });
        }
        Ok(restored)
    }

    #[instrument(skip(self))]
    async fn validate(&self, attempts: u32) -> Result<(), crate::Error> {
        let mut last_error = None;
        for _ in 0..attempts.max(1) {
            match AwsSelfManagedProvider::get_node_pools(self).await {
                Ok(_) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.expect("attempts is at least 1").into())
    }
}
