use std::{collections::HashMap, sync::Arc, time::Duration};

use cluster_turndown_core::schedule::TurndownSchedule;
use cluster_turndown_store::{ScheduleStore, ScheduleStoreImplementation};
use snafu::Snafu;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::strategy::{TurndownStrategy, TurndownStrategyImplementation};

/// The top-level deadline bounding any single turndown or turnup, per the concurrency model.
const OPERATION_DEADLINE: Duration = Duration::from_secs(30 * 60);

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("strategy error"), context(false))]
    Strategy {
        source: crate::strategy::Error,
    },

    #[snafu(display("schedule store error"), context(false))]
    Store {
        source: cluster_turndown_store::Error,
    },

    #[snafu(display("no schedule named {name:?} found to persist against"))]
    ScheduleNotFound { name: String },

    #[snafu(display("turndown() called while a turnup is already in flight"))]
    BusyTurningUp,

    #[snafu(display("turnup() called while a turndown is already in flight"))]
    BusyTurningDown,

    #[snafu(display("operation did not complete within the {OPERATION_DEADLINE:?} deadline"))]
    DeadlineExceeded,

    #[snafu(display(
        "turnup requested for schedule {name:?} but no original pool sizes are recorded"
    ))]
    NoRecordedOriginalSizes { name: String },
}

impl Error {
    pub fn kind(&self) -> cluster_turndown_core::error::ErrorKind {
        use cluster_turndown_core::error::ErrorKind;
        match self {
            Error::Strategy { source } => source.kind(),
            Error::Store { source } => source.kind(),
            Error::NoRecordedOriginalSizes { .. } => ErrorKind::InternalInvariantViolation,
            Error::ScheduleNotFound { .. } => ErrorKind::Configuration,
            Error::BusyTurningUp | Error::BusyTurningDown | Error::DeadlineExceeded => {
                ErrorKind::ProviderUnavailable
            }
        }
    }
}

/// Mirrors the state diagram: single-flight turndown/turnup. `Failed` is accepted by both entry
/// points the same way `Idle`/`Down` are, so the next `turndown`/`turnup` call is itself the
/// retry — no separate reset step is needed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ManagerState {
    Idle,
    TurningDown,
    Down,
    TurningUp,
    Failed,
}

pub struct TurndownManager {
    state: Mutex<ManagerState>,
    strategy: TurndownStrategyImplementation,
    schedule_store: Arc<ScheduleStoreImplementation>,
}

impl TurndownManager {
    pub fn new(
        strategy: TurndownStrategyImplementation,
        schedule_store: Arc<ScheduleStoreImplementation>,
    ) -> Self {
        Self {
            state: Mutex::new(ManagerState::Idle),
            strategy,
            schedule_store,
        }
    }

    pub async fn state(&self) -> ManagerState {
        *self.state.lock().await
    }

    /// Single-flight: re-entering from `TurningDown` or `Down` is a no-op success. The mutex is
    /// only held for the state transition itself, not for the strategy call that follows.
    #[instrument(skip(self, labels))]
    pub async fn turndown(
        &self,
        schedule_name: &str,
        labels: HashMap<String, String>,
    ) -> Result<(), Error> {
        {
            let mut state = self.state.lock().await;
            match *state {
                ManagerState::TurningDown | ManagerState::Down => return Ok(()),
                ManagerState::TurningUp => return Err(Error::BusyTurningUp),
                ManagerState::Idle | ManagerState::Failed => *state = ManagerState::TurningDown,
            }
        }

        let cancel = CancellationToken::new();
        let outcome = tokio::time::timeout(OPERATION_DEADLINE, self.strategy.turndown(labels, cancel)).await;

        match outcome {
            Ok(Ok(original_sizes)) => {
                self.persist_original_sizes(schedule_name, original_sizes)
                    .await?;
                *self.state.lock().await = ManagerState::Down;
                info!(schedule = schedule_name, "turndown complete");
                Ok(())
            }
            Ok(Err(source)) => {
                *self.state.lock().await = ManagerState::Failed;
                warn!(schedule = schedule_name, %source, "turndown failed");
                Err(source.into())
            }
            Err(_elapsed) => {
                *self.state.lock().await = ManagerState::Failed;
                warn!(schedule = schedule_name, "turndown exceeded its deadline");
                Err(Error::DeadlineExceeded)
            }
        }
    }

    /// Single-flight: re-entering from `Idle` is a no-op success.
    #[instrument(skip(self))]
    pub async fn turnup(&self, schedule_name: &str) -> Result<(), Error> {
        {
            let mut state = self.state.lock().await;
            match *state {
                ManagerState::Idle => return Ok(()),
                ManagerState::TurningDown => return Err(Error::BusyTurningDown),
                ManagerState::Down | ManagerState::TurningUp | ManagerState::Failed => {
                    *state = ManagerState::TurningUp
                }
            }
        }

        let original_sizes = self.read_original_sizes(schedule_name).await?;
        let cancel = CancellationToken::new();
        let outcome = tokio::time::timeout(
            OPERATION_DEADLINE,
            self.strategy.turnup(&original_sizes, cancel),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {
                self.clear_original_sizes(schedule_name).await?;
                *self.state.lock().await = ManagerState::Idle;
                info!(schedule = schedule_name, "turnup complete");
                Ok(())
            }
            Ok(Err(source)) => {
                *self.state.lock().await = ManagerState::Failed;
                warn!(schedule = schedule_name, %source, "turnup failed");
                Err(source.into())
            }
            Err(_elapsed) => {
                *self.state.lock().await = ManagerState::Failed;
                warn!(schedule = schedule_name, "turnup exceeded its deadline");
                Err(Error::DeadlineExceeded)
            }
        }
    }

    pub async fn validate(&self, attempts: u32) -> Result<(), Error> {
        Ok(self.strategy.validate(attempts).await?)
    }

    async fn fetch(&self, schedule_name: &str) -> Result<TurndownSchedule, Error> {
        self.schedule_store
            .get()
            .await?
            .filter(|s| s.metadata.name.as_deref() == Some(schedule_name))
            .ok_or_else(|| Error::ScheduleNotFound {
                name: schedule_name.to_string(),
            })
    }

    async fn persist_original_sizes(
        &self,
        schedule_name: &str,
        original_sizes: cluster_turndown_core::model::OriginalPoolSizes,
    ) -> Result<(), Error> {
        let mut schedule = self.fetch(schedule_name).await?;
        schedule.status.get_or_insert_with(Default::default).original_pool_sizes = original_sizes;
        self.schedule_store.update(schedule).await?;
        Ok(())
    }

    async fn read_original_sizes(
        &self,
        schedule_name: &str,
    ) -> Result<cluster_turndown_core::model::OriginalPoolSizes, Error> {
        let schedule = self.fetch(schedule_name).await?;
        let original_sizes = schedule.status.map(|s| s.original_pool_sizes).unwrap_or_default();
        if original_sizes.is_empty() {
            return Err(Error::NoRecordedOriginalSizes {
                name: schedule_name.to_string(),
            });
        }
        Ok(original_sizes)
    }

    async fn clear_original_sizes(&self, schedule_name: &str) -> Result<(), Error> {
        let mut schedule = self.fetch(schedule_name).await?;
        if let Some(status) = schedule.status.as_mut() {
            status.original_pool_sizes.clear();
        }
        self.schedule_store.update(schedule).await?;
        Ok(())
    }
}
