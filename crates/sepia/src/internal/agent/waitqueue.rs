use std::collections::VecDeque;
use std::time::Instant;

use crate::TaskId;
use crate::internal::resources::request::ResourceRequest;

pub(crate) struct WaitEntry {
    pub task_id: TaskId,
    pub request: ResourceRequest,
    pub enqueued: Instant,
}

/// FIFO wait list of tasks that could not be allocated immediately.
///
/// Order is the fairness contract: an earlier task is always retried
/// before a later one, even when the later one is smaller and would fit.
#[derive(Default)]
pub struct AdmissionQueue {
    entries: VecDeque<WaitEntry>,
}

impl AdmissionQueue {
    pub(crate) fn push(&mut self, task_id: TaskId, request: ResourceRequest) {
        self.entries.push_back(WaitEntry {
            task_id,
            request,
            enqueued: Instant::now(),
        });
    }

    pub(crate) fn front(&self) -> Option<&WaitEntry> {
        self.entries.front()
    }

    pub(crate) fn pop_front(&mut self) -> Option<WaitEntry> {
        self.entries.pop_front()
    }

    /// Remove a waiting task, wherever it sits in the queue. Returns
    /// false when the task is not queued (e.g. already drained).
    pub fn remove(&mut self, task_id: TaskId) -> bool {
        match self.entries.iter().position(|e| e.task_id == task_id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.entries.iter().any(|e| e.task_id == task_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn task_ids(&self) -> Vec<TaskId> {
        self.entries.iter().map(|e| e.task_id).collect()
    }
}
