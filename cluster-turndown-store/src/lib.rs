use cluster_turndown_core::schedule::TurndownSchedule;
use enum_dispatch::enum_dispatch;
use snafu::Snafu;

pub mod in_memory;
pub mod kube_store;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("in-memory schedule store error"), context(false))]
    InMemory { source: in_memory::Error },

    #[snafu(display("kube-backed schedule store error"), context(false))]
    Kube { source: kube_store::Error },

    #[snafu(display(
        "schedule {name:?} changed concurrently, retried once and still conflicted"
    ))]
    ConcurrentModification { name: String },
}

impl Error {
    pub fn kind(&self) -> cluster_turndown_core::error::ErrorKind {
        use cluster_turndown_core::error::ErrorKind;
        match self {
            Error::ConcurrentModification { .. } => ErrorKind::ConcurrentModification,
            _ => ErrorKind::ProviderUnavailable,
        }
    }
}

/// Durable persistence of the current [`TurndownSchedule`] and its lifecycle state. The
/// orchestrator API is the durability layer, not local disk.
#[enum_dispatch(ScheduleStoreImplementation)]
#[trait_variant::make(SendScheduleStore: Send)]
pub trait ScheduleStore {
    /// All schedules currently in the cluster, most-recently-created last. Used only to detect
    /// the "multiple schedules" conflict; everyday reconciliation uses [`ScheduleStore::get`].
    async fn list_all(&self) -> Result<Vec<TurndownSchedule>, Error>;

    /// The singleton schedule, or `None` if absent.
    async fn get(&self) -> Result<Option<TurndownSchedule>, Error>;

    /// Replaces the current schedule with optimistic concurrency: retried once on a write
    /// conflict, surfaced as [`Error::ConcurrentModification`] if the retry also conflicts.
    async fn update(&self, schedule: TurndownSchedule) -> Result<TurndownSchedule, Error>;

    /// Transitions every schedule but `keep_name` to `ScheduleFailed` with a "multiple
    /// schedules" reason (spec scenario S6).
    async fn fail_conflicting(&self, keep_name: &str, reason: &str) -> Result<(), Error>;

    /// Deletes the named schedule (used by the HTTP `cancel` front and self-deletion after a
    /// terminal non-repeating completion).
    async fn delete(&self, name: &str) -> Result<(), Error>;
}

#[enum_dispatch]
pub enum ScheduleStoreImplementation {
    Kube(kube_store::KubeScheduleStore),
    InMemory(in_memory::InMemoryScheduleStore),
}
