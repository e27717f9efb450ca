#[macro_use]
pub mod internal;

pub mod program;

pub use crate::internal::common::ids::{CoreId, GpuId, NodeId, TaskId};
pub use crate::internal::common::setup::setup_logging;
pub use crate::internal::common::utils::format_comma_delimited;
pub use crate::internal::common::{Map, Set};

pub type Error = internal::common::error::SepiaError;
pub type Result<T> = std::result::Result<T, Error>;

pub mod resources {
    pub use crate::internal::resources::descriptor::{NodeDescriptor, ResourceInventory};
    pub use crate::internal::resources::request::{RankChunk, ResourceRequest};
    pub use crate::internal::resources::slot::{RankAllocation, Slot};
}

pub mod agent {
    pub use crate::internal::agent::allocator::{PoolStatus, SlotAllocator};
    pub use crate::internal::agent::configuration::AgentConfiguration;
    pub use crate::internal::agent::launch::{ForkLaunch, MpirunLaunch};
    pub use crate::internal::agent::launcher::{
        LaunchContext, LaunchMethod, LaunchMethodRegistry,
    };
    pub use crate::internal::agent::reactor::run_agent;
    pub use crate::internal::agent::scheduler::{
        DrainedTask, RescheduleTrigger, ScheduleOutcome, SchedulingEngine,
    };
    pub use crate::internal::agent::state::AgentState;
    pub use crate::internal::agent::supervisor::{
        CancelOutcome, ProcessOutcome, ProcessSupervisor,
    };
    pub use crate::internal::agent::task::{Task, TaskState};
    pub use crate::internal::agent::waitqueue::AdmissionQueue;
}

pub mod messages {
    pub use crate::internal::messages::{
        AgentCommand, TargetState, TaskResultMsg, TaskSpec, parse_command,
    };
}
