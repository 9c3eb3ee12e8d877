pub mod config;
pub mod error;
pub mod model;
pub mod schedule;

/// Stable identifier for a node pool / node group / auto scaling group, as assigned by the
/// cloud provider. Opaque outside the provider adapter that produced it.
pub type PoolId = String;

/// Name of the node the controller is currently scheduled on, taken from `NODE_NAME`.
pub type NodeName = String;
