//! Client for the GCE instance metadata service. Every key is cached in its own [`OnceCell`]
//! after the first successful read, scoped to the [`GceMetadataClient`] instance (never a
//! process-global cache). Failures are logged and surfaced to callers as an absent value, never
//! as an error, matching how the rest of the startup-detection path treats metadata as
//! best-effort.

use reqwest::Client;
use snafu::{ResultExt, Snafu};
use tokio::sync::OnceCell;
use tracing::warn;

const METADATA_BASE: &str = "http://metadata.google.internal/computeMetadata/v1";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to query GCE metadata key {key:?}"))]
    Query { source: reqwest::Error, key: String },

    #[snafu(display("GCE metadata key {key:?} returned status {status}"))]
    Status {
        key: String,
        status: reqwest::StatusCode,
    },
}

pub struct GceMetadataClient {
    http: Client,
    project_id: OnceCell<Option<String>>,
    zone: OnceCell<Option<String>>,
    master_zone: OnceCell<Option<String>>,
    cluster_name: OnceCell<Option<String>>,
}

impl GceMetadataClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            project_id: OnceCell::new(),
            zone: OnceCell::new(),
            master_zone: OnceCell::new(),
            cluster_name: OnceCell::new(),
        }
    }

    /// Whether the metadata service can be reached at all, used once at startup to decide if
    /// this process is running on GKE/GCE.
    pub async fn is_reachable(&self) -> bool {
        self.query_raw("instance/id").await.is_ok()
    }

    pub async fn project_id(&self) -> Option<String> {
        self.project_id
            .get_or_init(|| async { self.fetch("project/project-id").await })
            .await
            .clone()
    }

    pub async fn zone(&self) -> Option<String> {
        self.zone
            .get_or_init(|| async {
                self.fetch("instance/zone")
                    .await
                    .map(|full| full.rsplit('/').next().unwrap_or(&full).to_string())
            })
            .await
            .clone()
    }

    /// The control plane's zone, extracted from the `ZONE` line of the `kube-env` instance
    /// attribute (a YAML blob GKE stores on every node).
    pub async fn master_zone(&self) -> Option<String> {
        self.master_zone
            .get_or_init(|| async {
                let kube_env = self.fetch("instance/attributes/kube-env").await?;
                kube_env.lines().find_map(|line| {
                    let (key, value) = line.split_once(':')?;
                    (key.trim() == "ZONE").then(|| value.trim().to_string())
                })
            })
            .await
            .clone()
    }

    pub async fn cluster_name(&self) -> Option<String> {
        self.cluster_name
            .get_or_init(|| async { self.fetch("instance/attributes/cluster-name").await })
            .await
            .clone()
    }

    async fn fetch(&self, path: &str) -> Option<String> {
        match self.query_raw(path).await {
            Ok(value) => Some(value),
            Err(source) => {
                warn!(%source, path, "failed to read GCE instance metadata key, treating as absent");
                None
            }
        }
    }

    async fn query_raw(&self, path: &str) -> Result<String, Error> {
        let url = format!("{METADATA_BASE}/{path}");
        let response = self
            .http
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .context(QuerySnafu { key: path })?;

        if !response.status().is_success() {
            return StatusSnafu {
                key: path,
                status: response.status(),
            }
            .fail();
        }

        response.text().await.context(QuerySnafu { key: path })
    }
}

impl Default for GceMetadataClient {
    fn default() -> Self {
        Self::new()
    }
}
