use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::TaskId;
use crate::internal::messages::TaskSpec;
use crate::internal::resources::request::ResourceRequest;
use crate::internal::resources::slot::Slot;
use crate::program::ProgramDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Submitted,
    Waiting,
    Launching,
    Running,
    Done,
    Failed,
    Canceled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed | TaskState::Canceled)
    }

    fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Submitted, Waiting)
                | (Submitted, Launching)
                | (Submitted, Failed)
                | (Waiting, Launching)
                | (Waiting, Canceled)
                | (Launching, Running)
                | (Launching, Failed)
                | (Running, Done)
                | (Running, Failed)
                | (Running, Canceled)
        )
    }
}

pub struct Task {
    pub id: TaskId,
    pub program: ProgramDefinition,
    pub request: ResourceRequest,
    pub submitted_at: Instant,
    pub exit_code: Option<i32>,
    state: TaskState,
    slot: Option<Slot>,
}

impl Task {
    pub fn new(spec: TaskSpec) -> Self {
        Task {
            id: spec.id,
            program: spec.program,
            request: spec.request,
            submitted_at: Instant::now(),
            exit_code: None,
            state: TaskState::Submitted,
            slot: None,
        }
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.state
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Terminal states have no outgoing edges; a forbidden transition
    /// is a state machine bug and aborts.
    pub(crate) fn set_state(&mut self, next: TaskState) {
        assert!(
            self.state.can_transition_to(next),
            "task {}: invalid state transition {:?} -> {:?}",
            self.id,
            self.state,
            next
        );
        log::debug!("Task {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }

    pub(crate) fn assign_slot(&mut self, slot: Slot) {
        debug_assert!(self.slot.is_none());
        self.slot = Some(slot);
    }

    pub(crate) fn slot(&self) -> Option<&Slot> {
        self.slot.as_ref()
    }

    /// Transfers slot ownership to the caller; the caller must hand it
    /// to the allocator. After this the task holds no resources.
    pub(crate) fn take_slot(&mut self) -> Option<Slot> {
        self.slot.take()
    }

    pub fn has_slot(&self) -> bool {
        self.slot.is_some()
    }
}
