//! Provider selection happens exactly once at startup and is never retried: if GCE metadata is
//! reachable the cluster is GKE; otherwise a cluster node's provider-id prefix decides between
//! EKS, self-managed AWS, and the permanent Azure capability gap.

use cluster_turndown_core::config::{GkeProviderConfig, ProviderConfig};
use k8s_openapi::api::core::v1::Node as K8sNode;
use kube::{Api, Client};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{info, instrument};

use crate::{
    ProviderImplementation, aws_self_managed::AwsSelfManagedProvider,
    eks::EKS_NODEGROUP_LABEL, eks::EksProvider, gke::GkeProvider, metadata::GceMetadataClient,
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to list cluster nodes during provider selection"))]
    ListNodes { source: kube::Error },

    #[snafu(display("cluster has no nodes, cannot determine a cloud provider"))]
    NoNodes,

    #[snafu(display("node has no recognizable providerID"))]
    UnrecognizedProviderId,

    #[snafu(display("failed to initialize the GKE provider adapter"), context(false))]
    Gke { source: crate::gke::Error },

    #[snafu(display("failed to load AWS SDK configuration"))]
    LoadAwsConfig,
}

/// Inspects a `providerID` such as `aws:///us-east-1a/i-0123` or `gce://project/zone/instance`
/// and returns the scheme before `://`.
fn provider_prefix(provider_id: &str) -> Option<&str> {
    provider_id.split("://").next().filter(|p| !p.is_empty())
}

#[instrument(skip(kube_client))]
pub async fn select_provider(
    kube_client: Client,
    config: &ProviderConfig,
) -> Result<ProviderImplementation, Error> {
    match config {
        ProviderConfig::Gke(gke_config) => {
            Ok(ProviderImplementation::Gke(new_gke(kube_client, gke_config).await?))
        }
        ProviderConfig::Eks(aws_config) => {
            let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            let cluster_name = first_node_cluster_hint(&kube_client).await?;
            Ok(ProviderImplementation::Eks(EksProvider::new(
                kube_client,
                &sdk_config,
                cluster_name,
                aws_config.nodegroup_role_arn.clone(),
                aws_config.nodegroup_subnet_ids.clone(),
            )))
        }
        ProviderConfig::AwsSelfManaged(_) => {
            let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            Ok(ProviderImplementation::AwsSelfManaged(
                AwsSelfManagedProvider::new(kube_client, &sdk_config),
            ))
        }
        ProviderConfig::Azure => {
            info!("provider explicitly configured as azure, which is unsupported");
            Ok(ProviderImplementation::Azure(Default::default()))
        }
        ProviderConfig::Auto => auto_detect(kube_client).await,
    }
}

async fn new_gke(kube_client: Client, config: &GkeProviderConfig) -> Result<GkeProvider, Error> {
    let metadata = GceMetadataClient::new();
    GkeProvider::new(
        kube_client,
        &metadata,
        config.project_id.clone(),
        config.zone.clone(),
        config.cluster_name.clone(),
    )
    .await
    .map_err(Into::into)
}

async fn auto_detect(kube_client: Client) -> Result<ProviderImplementation, Error> {
    let metadata = GceMetadataClient::new();
    if metadata.is_reachable().await {
        info!("GCE instance metadata reachable, selecting GKE provider");
        return Ok(ProviderImplementation::Gke(
            GkeProvider::new(kube_client, &metadata, None, None, None).await?,
        ));
    }

    let api: Api<K8sNode> = Api::all(kube_client.clone());
    let nodes = api.list(&Default::default()).await.context(ListNodesSnafu)?;
    let node = nodes.items.first().context(NoNodesSnafu)?;

    let provider_id = node
        .spec
        .as_ref()
        .and_then(|s| s.provider_id.as_deref())
        .unwrap_or_default();
    let prefix = provider_prefix(provider_id).context(UnrecognizedProviderIdSnafu)?;

    let labels = node.metadata.labels.clone().unwrap_or_default();
    let has_eks_label = labels.contains_key(EKS_NODEGROUP_LABEL);

    match prefix {
        "aws" if has_eks_label => {
            info!("node carries an EKS nodegroup label, selecting EKS provider");
            let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            let cluster_name = labels
                .get("alpha.eksctl.io/cluster-name")
                .cloned()
                .unwrap_or_default();
            Ok(ProviderImplementation::Eks(EksProvider::new(
                kube_client,
                &sdk_config,
                cluster_name,
                None,
                Vec::new(),
            )))
        }
        "aws" => {
            info!("node has no EKS nodegroup label, selecting self-managed AWS provider");
            let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            Ok(ProviderImplementation::AwsSelfManaged(
                AwsSelfManagedProvider::new(kube_client, &sdk_config),
            ))
        }
        "azure" => {
            info!("node is azure-backed, which is unsupported");
            Ok(ProviderImplementation::Azure(Default::default()))
        }
        _ => UnrecognizedProviderIdSnafu.fail(),
    }
}

async fn first_node_cluster_hint(kube_client: &Client) -> Result<String, Error> {
    let api: Api<K8sNode> = Api::all(kube_client.clone());
    let nodes = api.list(&Default::default()).await.context(ListNodesSnafu)?;
    let node = nodes.items.first().context(NoNodesSnafu)?;
    Ok(node
        .metadata
        .labels
        .clone()
        .unwrap_or_default()
        .get("alpha.eksctl.io/cluster-name")
        .cloned()
        .unwrap_or_default())
}
