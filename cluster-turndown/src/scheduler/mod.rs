use std::{collections::HashMap, pin::Pin, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use cluster_turndown_core::schedule::{ScheduleDirection, ScheduleState, TurndownSchedule, TurndownScheduleStatus};
use cluster_turndown_store::{ScheduleStore, ScheduleStoreImplementation};
use futures::StreamExt;
use kube::{
    Api, Client,
    runtime::{WatchStreamExt, watcher},
};
use snafu::Snafu;
use tokio::{
    sync::mpsc,
    time::{Sleep, sleep},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::manager::TurndownManager;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("schedule store error"), context(false))]
    Store {
        source: cluster_turndown_store::Error,
    },

    #[snafu(display("manager error"), context(false))]
    Manager {
        source: crate::manager::Error,
    },
}

impl Error {
    pub fn kind(&self) -> cluster_turndown_core::error::ErrorKind {
        match self {
            Error::Store { source } => source.kind(),
            Error::Manager { source } => source.kind(),
        }
    }
}

/// Which of the two timestamps the current reconcile cycle is waiting on. Unlike
/// [`TurndownScheduleStatus::next_fire`] (a general "earliest of either" helper), the
/// reconciler needs exactly the timestamp relevant to `current`: the other one may still carry
/// a stale value from a prior cycle.
fn action_due_at(status: &TurndownScheduleStatus) -> Option<DateTime<Utc>> {
    match status.current {
        ScheduleDirection::ScaleDown => status.next_scale_down_time,
        ScheduleDirection::ScaleUp => status.next_scale_up_time,
    }
}

fn arm(at: DateTime<Utc>) -> Pin<Box<Sleep>> {
    let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    Box::pin(sleep(delay))
}

/// Drives a `kube::runtime::watcher` stream over `TurndownSchedule` and forwards every event
/// (including transient watch errors, which are themselves worth re-checking the schedule for)
/// into the reconciler's wake channel. Only meaningful against the kube-backed store; the
/// in-memory store used in tests has no watch source and relies on explicit wakes alone.
pub fn spawn_kube_watch_forwarder(client: Client, wake: mpsc::Sender<()>) {
    tokio::spawn(async move {
        let api: Api<TurndownSchedule> = Api::all(client);
        let mut events = watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();

        while let Some(event) = events.next().await {
            match event {
                Ok(_) => {
                    if wake.send(()).await.is_err() {
                        return;
                    }
                }
                Err(error) => warn!(%error, "TurndownSchedule watch stream error"),
            }
        }
    });
}

/// Owns the single outstanding timer and drives `reconcile_once` off either its fire or an
/// external wake (a watch event or an HTTP-triggered `schedule`/`cancel` call). Runs until
/// `shutdown` is cancelled or the wake channel closes.
pub async fn run(
    manager: Arc<TurndownManager>,
    schedule_store: Arc<ScheduleStoreImplementation>,
    mut wake: mpsc::Receiver<()>,
    shutdown: CancellationToken,
) {
    let mut timer: Option<Pin<Box<Sleep>>> = None;

    if let Err(error) = reconcile_once(&manager, &schedule_store, &mut timer).await {
        exit_if_fatal(&error);
        warn!(%error, "initial reconcile failed");
    }

    loop {
        let timer_fires = async {
            match timer.as_mut() {
                Some(sleep) => sleep.await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("scheduler shutting down");
                return;
            }
            _ = timer_fires => {
                timer = None;
            }
            woken = wake.recv() => {
                if woken.is_none() {
                    info!("wake channel closed, shutting down scheduler");
                    return;
                }
            }
        }

        if let Err(error) = reconcile_once(&manager, &schedule_store, &mut timer).await {
            exit_if_fatal(&error);
            warn!(%error, "reconcile failed");
        }
    }
}

/// Errors classified as [`ErrorKind::InternalInvariantViolation`] or
/// [`ErrorKind::ProviderUnsupported`] mean the reconciler hit a state it cannot recover from by
/// itself; the process exits so an orchestrator-level restart starts from a clean slate.
fn exit_if_fatal(error: &Error) {
    if error.kind().is_fatal() {
        error!(%error, "fatal reconcile error, exiting for a clean restart");
        std::process::exit(1);
    }
}

#[instrument(skip(manager, schedule_store, timer))]
async fn reconcile_once(
    manager: &TurndownManager,
    schedule_store: &ScheduleStoreImplementation,
    timer: &mut Option<Pin<Box<Sleep>>>,
) -> Result<(), Error> {
    let mut schedules = schedule_store.list_all().await?;
    if schedules.is_empty() {
        *timer = None;
        return Ok(());
    }

    schedules.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
    let mut schedule = schedules.remove(0);
    let name = schedule.metadata.name.clone().unwrap_or_default();

    if !schedules.is_empty() {
        warn!(keep = name, dropped = schedules.len(), "multiple TurndownSchedules present");
        schedule_store
            .fail_conflicting(&name, "multiple schedules")
            .await?;
    }

    let Some(status) = schedule.status.clone() else {
        *timer = None;
        return Ok(());
    };

    if status.is_terminal() {
        *timer = None;
        return Ok(());
    }

    let Some(due_at) = action_due_at(&status) else {
        *timer = None;
        return Ok(());
    };

    let now = Utc::now();
    if due_at > now {
        *timer = Some(arm(due_at));
        return Ok(());
    }

    let outcome = match status.current {
        ScheduleDirection::ScaleDown => manager.turndown(&name, HashMap::new()).await,
        ScheduleDirection::ScaleUp => manager.turnup(&name).await,
    };

    let mut updated = status.clone();
    updated.last_updated = Some(now);
    let mut finished_name = None;

    if let Err(error) = outcome {
        updated.state = ScheduleState::ScheduleFailed;
        updated.error = Some(error.to_string());
        updated.finished = true;

        schedule.status = Some(updated.clone());
        schedule_store.update(schedule).await?;
        *timer = None;

        return Err(error.into());
    }

    match status.current {
        ScheduleDirection::ScaleDown => {
            updated.current = ScheduleDirection::ScaleUp;
        }
        ScheduleDirection::ScaleUp => match schedule.spec.repeat.period() {
            Some(period) => {
                updated.next_scale_down_time = status.next_scale_down_time.map(|t| t + period);
                updated.next_scale_up_time = status.next_scale_up_time.map(|t| t + period);
                updated.current = ScheduleDirection::ScaleDown;
            }
            None => {
                updated.finished = true;
                updated.state = ScheduleState::ScheduleCompleted;
                finished_name = Some(name.clone());
            }
        },
    }

    schedule.status = Some(updated.clone());
    schedule_store.update(schedule).await?;

    if let Some(name) = finished_name {
        schedule_store.delete(&name).await?;
    }

    *timer = if updated.is_terminal() {
        None
    } else {
        action_due_at(&updated).map(arm)
    };

    Ok(())
}

#[cfg(test)]
mod tests {
    use cluster_turndown_core::schedule::TurndownScheduleStatus;

    use super::*;

    #[test]
    fn action_due_at_follows_current_direction() {
        let down = Utc::now();
        let up = down + chrono::Duration::hours(1);

        let scaling_down = TurndownScheduleStatus {
            current: ScheduleDirection::ScaleDown,
            next_scale_down_time: Some(down),
            next_scale_up_time: Some(up),
            ..Default::default()
        };
        assert_eq!(action_due_at(&scaling_down), Some(down));

        let scaling_up = TurndownScheduleStatus {
            current: ScheduleDirection::ScaleUp,
            next_scale_down_time: Some(down),
            next_scale_up_time: Some(up),
            ..Default::default()
        };
        assert_eq!(action_due_at(&scaling_up), Some(up));
    }

    #[test]
    fn action_due_at_ignores_the_inactive_timestamp() {
        let status = TurndownScheduleStatus {
            current: ScheduleDirection::ScaleUp,
            next_scale_down_time: Some(Utc::now() - chrono::Duration::days(1)),
            next_scale_up_time: None,
            ..Default::default()
        };
        assert_eq!(action_due_at(&status), None);
    }
}
