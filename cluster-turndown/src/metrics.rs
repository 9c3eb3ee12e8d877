use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use snafu::{ResultExt, Snafu};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("Failed to register {name} metric"))]
    RegisterMetric {
        source: prometheus::Error,
        name: &'static str,
    },
}

/// The controller's Prometheus metrics, gathered and text-encoded by the `/metrics` HTTP
/// handler. `cloud_api_retries_total` is the counter spec scenario S5 requires: every
/// backoff-driven retry around a cloud provider call increments it exactly once.
pub struct Metrics {
    pub registry: Registry,
    pub cloud_api_retries_total: IntCounter,
    pub turndown_total: IntCounterVec,
    pub turnup_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, Error> {
        let registry = Registry::new();

        let cloud_api_retries_total = IntCounter::new(
            "cluster_turndown_cloud_api_retries_total",
            "Number of times a cloud provider call was retried after a transient failure",
        )
        .context(RegisterMetricSnafu {
            name: "cloud_api_retries_total",
        })?;
        registry
            .register(Box::new(cloud_api_retries_total.clone()))
            .context(RegisterMetricSnafu {
                name: "cloud_api_retries_total",
            })?;

        let turndown_total = IntCounterVec::new(
            Opts::new(
                "cluster_turndown_turndown_total",
                "Number of completed turndown attempts, labeled by outcome",
            ),
            &["outcome"],
        )
        .context(RegisterMetricSnafu {
            name: "turndown_total",
        })?;
        registry
            .register(Box::new(turndown_total.clone()))
            .context(RegisterMetricSnafu {
                name: "turndown_total",
            })?;

        let turnup_total = IntCounterVec::new(
            Opts::new(
                "cluster_turndown_turnup_total",
                "Number of completed turnup attempts, labeled by outcome",
            ),
            &["outcome"],
        )
        .context(RegisterMetricSnafu {
            name: "turnup_total",
        })?;
        registry
            .register(Box::new(turnup_total.clone()))
            .context(RegisterMetricSnafu {
                name: "turnup_total",
            })?;

        Ok(Self {
            registry,
            cloud_api_retries_total,
            turndown_total,
            turnup_total,
        })
    }
}
