use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::PoolId;

/// The label that marks a node (and the pool it belongs to) as the dedicated turndown host.
pub const TURNDOWN_NODE_LABEL: &str = "cluster-turndown-node";

/// A logical node pool / node group / auto scaling group, as reported by a provider adapter.
#[derive(Clone, Debug, PartialEq)]
pub struct NodePool {
    pub name: String,
    pub id: PoolId,
    pub current_size: i32,
    /// Set iff this controller turned the pool down and is holding onto its pre-turndown size.
    pub original_size: Option<i32>,
    pub autoscaling_enabled: bool,
    pub is_turndown_pool: bool,
    pub min_size: Option<i32>,
    pub max_size: Option<i32>,
}

impl NodePool {
    /// True once `setNodePoolSizes` has recorded a size to restore on turnup.
    pub fn is_turned_down(&self) -> bool {
        self.original_size.is_some()
    }
}

/// A cluster node, as reported by the orchestrator API.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub name: String,
    pub pool_id: PoolId,
    pub labels: HashMap<String, String>,
}

impl Node {
    pub fn is_turndown_node(&self) -> bool {
        self.labels
            .get(TURNDOWN_NODE_LABEL)
            .map(|v| v == "true")
            .unwrap_or(false)
    }
}

/// Pre-scaledown sizes of every non-turndown pool, recorded so turnup is exact. Absence of a
/// pool id here at turnup time means that pool did not exist at scaledown and must be left
/// untouched.
pub type OriginalPoolSizes = HashMap<PoolId, i32>;

/// Pure capability declaration a provider adapter makes about the cluster it is driving.
/// Strategy selection is a function of this, never of the adapter's concrete type.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// The cloud manages the control plane, so the controller may run on any node.
    pub managed_control_plane: bool,
    /// The provider can designate one of the cluster's own nodes as a permanent survivor
    /// instead of relying on a cloud-managed control plane.
    pub supports_self_host: bool,
}

impl ProviderCapabilities {
    pub const GKE: Self = Self {
        managed_control_plane: true,
        supports_self_host: false,
    };

    pub const EKS: Self = Self {
        managed_control_plane: true,
        supports_self_host: false,
    };

    pub const AWS_SELF_MANAGED: Self = Self {
        managed_control_plane: false,
        supports_self_host: true,
    };

    pub const AZURE_UNSUPPORTED: Self = Self {
        managed_control_plane: false,
        supports_self_host: false,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(original_size: Option<i32>) -> NodePool {
        NodePool {
            name: "workers".to_string(),
            id: "workers".to_string(),
            current_size: 0,
            original_size,
            autoscaling_enabled: false,
            is_turndown_pool: false,
            min_size: None,
            max_size: None,
        }
    }

    #[test]
    fn pool_is_turned_down_iff_original_size_recorded() {
        assert!(!pool(None).is_turned_down());
        assert!(pool(Some(3)).is_turned_down());
    }

    #[test]
    fn node_is_turndown_node_only_with_exact_label_value() {
        let mut node = Node {
            name: "node-1".to_string(),
            pool_id: "pool-1".to_string(),
            labels: HashMap::new(),
        };
        assert!(!node.is_turndown_node());

        node.labels.insert(TURNDOWN_NODE_LABEL.to_string(), "false".to_string());
        assert!(!node.is_turndown_node());

        node.labels.insert(TURNDOWN_NODE_LABEL.to_string(), "true".to_string());
        assert!(node.is_turndown_node());
    }
}
