use cluster_turndown_core::schedule::{ScheduleState, TurndownSchedule};
use snafu::Snafu;
use tokio::sync::RwLock;
use tracing::{info, instrument};

use crate::ScheduleStore;

/// Used by the test suite to verify reconciler logic without a live API server. A single
/// singleton slot, exactly like the real cluster-scoped resource it stands in for.
pub struct InMemoryScheduleStore {
    schedule: RwLock<Option<TurndownSchedule>>,
}

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("no schedule named {name:?} exists"))]
    NotFound { name: String },
}

impl Default for InMemoryScheduleStore {
    fn default() -> Self {
        info!("Using in-memory schedule store");
        Self {
            schedule: RwLock::new(None),
        }
    }
}

impl ScheduleStore for InMemoryScheduleStore {
    #[instrument(skip(self))]
    async fn list_all(&self) -> Result<Vec<TurndownSchedule>, super::Error> {
        Ok(self.schedule.read().await.iter().cloned().collect())
    }

    #[instrument(skip(self))]
    async fn get(&self) -> Result<Option<TurndownSchedule>, super::Error> {
        Ok(self.schedule.read().await.clone())
    }

    #[instrument(skip(self, schedule))]
    async fn update(&self, schedule: TurndownSchedule) -> Result<TurndownSchedule, super::Error> {
        let mut slot = self.schedule.write().await;
        *slot = Some(schedule.clone());
        Ok(schedule)
    }

    #[instrument(skip(self))]
    async fn fail_conflicting(&self, keep_name: &str, reason: &str) -> Result<(), super::Error> {
        let mut slot = self.schedule.write().await;
        if let Some(schedule) = slot.as_mut() {
            if schedule.metadata.name.as_deref() != Some(keep_name) {
                let status = schedule.status.get_or_insert_with(Default::default);
                status.state = ScheduleState::ScheduleFailed;
                status.error = Some(reason.to_string());
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> Result<(), super::Error> {
        let mut slot = self.schedule.write().await;
        if slot.as_ref().and_then(|s| s.metadata.name.as_deref()) == Some(name) {
            *slot = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cluster_turndown_core::schedule::TurndownScheduleSpec;
    use kube::api::ObjectMeta;

    use super::*;

    fn schedule(name: &str) -> TurndownSchedule {
        TurndownSchedule {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: TurndownScheduleSpec {
                start: chrono::Utc::now(),
                end: chrono::Utc::now(),
                repeat: Default::default(),
            },
            status: None,
        }
    }

    #[tokio::test]
    async fn starts_empty() {
        let store = InMemoryScheduleStore::default();
        assert!(store.get().await.unwrap().is_none());
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_then_get_roundtrips() {
        let store = InMemoryScheduleStore::default();
        store.update(schedule("cluster-turndown")).await.unwrap();

        let fetched = store.get().await.unwrap().unwrap();
        assert_eq!(fetched.metadata.name.as_deref(), Some("cluster-turndown"));
    }

    #[tokio::test]
    async fn fail_conflicting_only_touches_other_names() {
        let store = InMemoryScheduleStore::default();
        store.update(schedule("kept")).await.unwrap();

        store.fail_conflicting("kept", "multiple schedules").await.unwrap();
        let status = store.get().await.unwrap().unwrap().status;
        assert!(status.is_none());

        store.fail_conflicting("someone-else", "multiple schedules").await.unwrap();
        let status = store.get().await.unwrap().unwrap().status.unwrap();
        assert_eq!(status.state, ScheduleState::ScheduleFailed);
        assert_eq!(status.error.as_deref(), Some("multiple schedules"));
    }

    #[tokio::test]
    async fn delete_only_clears_the_matching_name() {
        let store = InMemoryScheduleStore::default();
        store.update(schedule("cluster-turndown")).await.unwrap();

        store.delete("some-other-name").await.unwrap();
        assert!(store.get().await.unwrap().is_some());

        store.delete("cluster-turndown").await.unwrap();
        assert!(store.get().await.unwrap().is_none());
    }
}
