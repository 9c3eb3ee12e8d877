use std::collections::HashMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How often a [`TurndownSchedule`] repeats once it reaches its first scaleup.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Repeat {
    #[default]
    None,
    Daily,
    Weekly,
}

impl Repeat {
    /// The wall-clock period a repeating schedule advances by on every completed cycle.
    pub fn period(&self) -> Option<chrono::Duration> {
        match self {
            Repeat::None => None,
            Repeat::Daily => Some(chrono::Duration::days(1)),
            Repeat::Weekly => Some(chrono::Duration::weeks(1)),
        }
    }
}

/// A user-declared window during which the cluster should be turned down. Cluster-scoped; at
/// most one instance is honored, extras are transitioned to `ScheduleFailed`.
#[derive(CustomResource, Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[kube(
    group = "turndown.example.io",
    version = "v1alpha1",
    kind = "TurndownSchedule",
    plural = "turndownschedules",
    status = "TurndownScheduleStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct TurndownScheduleSpec {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub repeat: Repeat,
}

/// Which half of a turndown cycle is next to fire.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScheduleDirection {
    #[default]
    ScaleDown,
    ScaleUp,
}

/// Terminal and in-progress states a schedule's reconciliation can be in.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScheduleState {
    #[default]
    ScheduleSuccess,
    ScheduleFailed,
    ScheduleCompleted,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurndownScheduleStatus {
    pub state: ScheduleState,
    pub current: ScheduleDirection,
    pub next_scale_down_time: Option<DateTime<Utc>>,
    pub next_scale_up_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished: bool,
    pub error: Option<String>,
    /// Pre-scaledown size of every non-turndown pool, keyed by the provider's pool id. Absent
    /// entries at turnup mean the pool didn't exist when the schedule turned the cluster down.
    #[serde(default)]
    pub original_pool_sizes: HashMap<String, i32>,
}

impl TurndownScheduleStatus {
    /// The earlier of the two next-fire timestamps, or `None` if the schedule never initialized
    /// its timers (first reconcile of a freshly created spec).
    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        match (self.next_scale_down_time, self.next_scale_up_time) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.state, ScheduleState::ScheduleSuccess)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Repeat::None, None)]
    #[case(Repeat::Daily, Some(chrono::Duration::days(1)))]
    #[case(Repeat::Weekly, Some(chrono::Duration::weeks(1)))]
    fn repeat_period(#[case] repeat: Repeat, #[case] expected: Option<chrono::Duration>) {
        assert_eq!(repeat.period(), expected);
    }

    #[test]
    fn next_fire_picks_the_earlier_timestamp() {
        let earlier = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().into();
        let later = DateTime::parse_from_rfc3339("2026-01-02T00:00:00Z").unwrap().into();

        let status = TurndownScheduleStatus {
            next_scale_down_time: Some(later),
            next_scale_up_time: Some(earlier),
            ..Default::default()
        };
        assert_eq!(status.next_fire(), Some(earlier));
    }

    #[test]
    fn next_fire_is_none_when_both_timers_are_unset() {
        let status = TurndownScheduleStatus::default();
        assert_eq!(status.next_fire(), None);
    }

    #[rstest]
    #[case(ScheduleState::ScheduleSuccess, false)]
    #[case(ScheduleState::ScheduleFailed, true)]
    #[case(ScheduleState::ScheduleCompleted, true)]
    fn is_terminal_for_every_state(#[case] state: ScheduleState, #[case] expected: bool) {
        let status = TurndownScheduleStatus {
            state,
            ..Default::default()
        };
        assert_eq!(status.is_terminal(), expected);
    }
}
