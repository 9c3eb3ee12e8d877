//! Small helpers shared by every provider backend that needs to know which node the controller
//! is currently scheduled on.

use cluster_turndown_core::model::Node;
use k8s_openapi::api::core::v1::Node as K8sNode;
use kube::{Api, Client};

pub fn node_name_from_env() -> Option<String> {
    std::env::var("NODE_NAME").ok()
}

pub async fn get_current_node(client: &Client) -> Result<Option<Node>, kube::Error> {
    let Some(name) = node_name_from_env() else {
        return Ok(None);
    };
    get_node(client, &name).await
}

pub async fn get_node(client: &Client, name: &str) -> Result<Option<Node>, kube::Error> {
    let api: Api<K8sNode> = Api::all(client.clone());
    let node = match api.get_opt(name).await? {
        Some(n) => n,
        None => return Ok(None),
    };

    let labels = node
        .metadata
        .labels
        .clone()
        .unwrap_or_default()
        .into_iter()
        .collect();

    let provider_id = node
        .spec
        .as_ref()
        .and_then(|s| s.provider_id.clone())
        .unwrap_or_default();

    Ok(Some(Node {
        name: name.to_string(),
        pool_id: provider_id,
        labels,
    }))
}
