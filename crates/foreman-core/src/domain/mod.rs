//! Domain model (ids, task record, payload, outcomes, events, errors).

pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod payload;
pub mod state;
pub mod task;
pub mod task_type;

pub use self::errors::{ErrorKind, ForemanError, StoreError};
pub use self::events::{DomainEvent, OpenReason};
pub use self::ids::{GoalId, RunId, TaskId};
pub use self::outcome::{
    ExecutionOutcome, FailureOutcome, RequeueOutcome, RequeueSkip, ResourceMetrics,
    ResourceSample, Violation,
};
pub use self::payload::{
    DecompositionStage, QuarantineDetails, QuarantineInfo, QuarantineReason, RoutingHint,
    TaskPayload, WatchdogState,
};
pub use self::state::TaskStatus;
pub use self::task::{HostId, Task};
pub use self::task_type::TaskType;
