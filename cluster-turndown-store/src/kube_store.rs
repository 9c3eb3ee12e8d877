use cluster_turndown_core::schedule::{ScheduleState, TurndownSchedule};
use kube::{
    Api, Client,
    api::{ListParams, Patch, PatchParams, PostParams},
};
use snafu::{ResultExt, Snafu};
use tracing::{debug_span, instrument, warn, Instrument};

use crate::ScheduleStore;

const FIELD_MANAGER: &str = "cluster-turndown";

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to list TurndownSchedule resources"))]
    List { source: kube::Error },

    #[snafu(display("failed to create TurndownSchedule {name:?}"))]
    Create { source: kube::Error, name: String },

    #[snafu(display("failed to replace TurndownSchedule {name:?}"))]
    Replace { source: kube::Error, name: String },

    #[snafu(display("failed to patch status of TurndownSchedule {name:?}"))]
    PatchStatus { source: kube::Error, name: String },

    #[snafu(display("failed to delete TurndownSchedule {name:?}"))]
    Delete { source: kube::Error, name: String },
}

pub struct KubeScheduleStore {
    api: Api<TurndownSchedule>,
}

impl KubeScheduleStore {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

impl ScheduleStore for KubeScheduleStore {
    #[instrument(skip(self))]
    async fn list_all(&self) -> Result<Vec<TurndownSchedule>, super::Error> {
        let list = self
            .api
            .list(&ListParams::default())
            .await
            .context(ListSnafu)?;
        Ok(list.items)
    }

    #[instrument(skip(self))]
    async fn get(&self) -> Result<Option<TurndownSchedule>, super::Error> {
        Ok(self.list_all().await?.into_iter().next())
    }

    /// Optimistically concurrent: a fresh object (no `resourceVersion`) is created; an existing
    /// one is replaced carrying its `resourceVersion`, retried once against the latest version
    /// on a 409 Conflict before surfacing [`super::Error::ConcurrentModification`].
    #[instrument(skip(self, schedule))]
    async fn update(&self, schedule: TurndownSchedule) -> Result<TurndownSchedule, super::Error> {
        let name = schedule
            .metadata
            .name
            .clone()
            .unwrap_or_else(|| "turndown-schedule".to_string());

        if schedule.metadata.resource_version.is_none() {
            return self
                .api
                .create(&PostParams::default(), &schedule)
                .instrument(debug_span!("creating TurndownSchedule"))
                .await
                .context(CreateSnafu { name });
        }

        match self
            .api
            .replace(&name, &PostParams::default(), &schedule)
            .instrument(debug_span!("replacing TurndownSchedule"))
            .await
        {
            Ok(replaced) => Ok(replaced),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                warn!(name, "conflict updating TurndownSchedule, retrying once with the latest version");
                let latest = self
                    .api
                    .get(&name)
                    .await
                    .context(ReplaceSnafu { name: name.clone() })?;
                let mut retried = schedule;
                retried.metadata.resource_version = latest.metadata.resource_version;
                self.api
                    .replace(&name, &PostParams::default(), &retried)
                    .await
                    .map_err(|_| super::Error::ConcurrentModification { name })
            }
            Err(source) => Err(source).context(ReplaceSnafu { name }),
        }
    }

    #[instrument(skip(self))]
    async fn fail_conflicting(&self, keep_name: &str, reason: &str) -> Result<(), super::Error> {
        for schedule in self.list_all().await? {
            let Some(name) = schedule.metadata.name.clone() else {
                continue;
            };
            if name == keep_name {
                continue;
            }

            let patch = serde_json::json!({
                "status": {
                    "state": ScheduleState::ScheduleFailed,
                    "error": reason,
                    "finished": true,
                }
            });
            self.api
                .patch_status(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Merge(&patch))
                .await
                .context(PatchStatusSnafu { name })?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> Result<(), super::Error> {
        self.api
            .delete(name, &Default::default())
            .await
            .context(DeleteSnafu { name })?;
        Ok(())
    }
}
