use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::TaskId;
use crate::internal::agent::allocator::{PoolStatus, SlotAllocator};
use crate::internal::agent::waitqueue::AdmissionQueue;
use crate::internal::resources::descriptor::ResourceInventory;
use crate::internal::resources::request::ResourceRequest;
use crate::internal::resources::slot::Slot;

/// Wakes up the drain whenever resources are returned to the pool.
///
/// Firing is unconditional; the consumer decides whether a freed slot
/// actually helps any waiter. Triggers are consumed in the order the
/// releases occurred.
#[derive(Clone)]
pub struct RescheduleTrigger {
    sender: UnboundedSender<()>,
}

impl RescheduleTrigger {
    pub fn channel() -> (Self, UnboundedReceiver<()>) {
        let (sender, receiver) = unbounded_channel();
        (RescheduleTrigger { sender }, receiver)
    }

    pub fn notify(&self) {
        if self.sender.send(()).is_err() {
            log::debug!("Reschedule trigger has no consumer (agent shutting down)");
        }
    }
}

/// Outcome of submitting a task to the scheduling engine.
#[derive(Debug)]
pub enum ScheduleOutcome {
    /// Resources were allocated immediately.
    Placed(Slot),
    /// The pool is too busy right now; the task was appended to the
    /// admission queue and will be retried on release events.
    Queued,
}

/// A task drained from the admission queue together with its freshly
/// allocated slot.
pub struct DrainedTask {
    pub task_id: TaskId,
    pub slot: Slot,
    pub waited: std::time::Duration,
}

/// Admission control: try to place incoming tasks, queue them under
/// resource pressure and re-drain the queue on every release.
///
/// Lock order: whenever the pool lock and the queue lock are both
/// needed, the pool lock is taken first. Holding the pool lock across
/// the queue update keeps submission atomic against concurrent
/// releases; a task can therefore never miss the trigger fired by a
/// release that happened between its failed allocation attempt and its
/// enqueue.
pub struct SchedulingEngine {
    allocator: SlotAllocator,
    queue: Mutex<AdmissionQueue>,
    inventory: Arc<ResourceInventory>,
}

impl SchedulingEngine {
    pub fn new(inventory: Arc<ResourceInventory>, trigger: RescheduleTrigger) -> Self {
        SchedulingEngine {
            allocator: SlotAllocator::new(&inventory, trigger),
            queue: Mutex::new(AdmissionQueue::default()),
            inventory,
        }
    }

    pub fn allocator(&self) -> &SlotAllocator {
        &self.allocator
    }

    /// Submit a task: allocate now if possible, otherwise queue it.
    /// Malformed requests fail here, before any lock is touched.
    pub fn submit(
        &self,
        task_id: TaskId,
        request: &ResourceRequest,
    ) -> crate::Result<ScheduleOutcome> {
        request.validate()?;
        if request.never_fits(&self.inventory) {
            log::warn!(
                "Task {task_id} requests {request}; no node can ever host a rank, it will wait forever"
            );
        }
        let mut pool = self.allocator.pool();
        if let Some(slot) = pool.try_allocate(request) {
            log::debug!("Task {task_id} allocated, pool status: {}", pool.status());
            return Ok(ScheduleOutcome::Placed(slot));
        }
        let mut queue = self.lock_queue();
        queue.push(task_id, request.clone());
        log::debug!("Task {task_id} queued ({} waiting)", queue.len());
        Ok(ScheduleOutcome::Queued)
    }

    /// Re-evaluate waiters in FIFO order, stopping at the first task
    /// that still does not fit. The head of the queue blocks everything
    /// behind it; skipping ahead to a smaller waiter would trade
    /// deterministic, starvation-free ordering for throughput.
    pub fn drain(&self) -> Vec<DrainedTask> {
        let mut pool = self.allocator.pool();
        let mut queue = self.lock_queue();
        let mut drained = Vec::new();
        let now = Instant::now();
        while let Some(entry) = queue.front() {
            match pool.try_allocate(&entry.request) {
                Some(slot) => {
                    let entry = queue.pop_front().expect("wait queue front disappeared");
                    drained.push(DrainedTask {
                        task_id: entry.task_id,
                        slot,
                        waited: now.duration_since(entry.enqueued),
                    });
                }
                None => break,
            }
        }
        if !drained.is_empty() {
            log::debug!(
                "Drained {} task(s), pool status: {}",
                drained.len(),
                pool.status()
            );
        }
        drained
    }

    /// Synchronously remove a waiting task. Returns false when the task
    /// is not queued (it may have been drained concurrently).
    pub fn cancel_waiting(&self, task_id: TaskId) -> bool {
        self.lock_queue().remove(task_id)
    }

    /// Return a slot to the pool; fires the reschedule trigger.
    pub fn release(&self, slot: Slot) {
        self.allocator.release(slot);
    }

    pub fn status(&self) -> PoolStatus {
        self.allocator.status()
    }

    pub fn n_waiting(&self) -> usize {
        self.lock_queue().len()
    }

    pub(crate) fn waiting_task_ids(&self) -> Vec<TaskId> {
        self.lock_queue().task_ids()
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, AdmissionQueue> {
        self.queue.lock().expect("admission queue lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::{ScheduleOutcome, SchedulingEngine};
    use crate::TaskId;
    use crate::internal::common::error::SepiaError;
    use crate::internal::resources::request::ResourceRequest;
    use crate::internal::tests::utils::engine_with_trigger;

    fn submit(engine: &SchedulingEngine, id: u64, cores: u32) -> ScheduleOutcome {
        engine
            .submit(TaskId::new(id), &ResourceRequest::simple(cores))
            .unwrap()
    }

    fn placed(outcome: ScheduleOutcome) -> crate::internal::resources::slot::Slot {
        match outcome {
            ScheduleOutcome::Placed(slot) => slot,
            ScheduleOutcome::Queued => panic!("expected immediate placement"),
        }
    }

    #[test]
    fn test_head_of_line_blocks_smaller_waiters() {
        let (engine, _rx) = engine_with_trigger(1, 8);
        let slot6 = placed(submit(&engine, 1, 6));
        let slot2 = placed(submit(&engine, 2, 2));
        // pool is full; A needs 8, B needs 2
        assert!(matches!(submit(&engine, 3, 8), ScheduleOutcome::Queued));
        assert!(matches!(submit(&engine, 4, 2), ScheduleOutcome::Queued));

        // 2 cores become free; B would fit, but A is the head of the queue
        engine.release(slot2);
        assert!(engine.drain().is_empty());
        assert_eq!(engine.n_waiting(), 2);

        // 8 cores free: A drains first and takes them all, B keeps waiting
        engine.release(slot6);
        let drained = engine.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].task_id, TaskId::new(3));
        assert_eq!(engine.n_waiting(), 1);

        let slot_a = drained.into_iter().next().unwrap().slot;
        engine.release(slot_a);
        let drained = engine.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].task_id, TaskId::new(4));
        assert_eq!(engine.n_waiting(), 0);
    }

    #[test]
    fn test_submit_scenario_small_pool() {
        let (engine, mut rx) = engine_with_trigger(1, 4);
        let slot1 = placed(submit(&engine, 1, 4));
        assert!(matches!(submit(&engine, 2, 1), ScheduleOutcome::Queued));

        engine.release(slot1);
        assert!(rx.try_recv().is_ok());
        let drained = engine.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].task_id, TaskId::new(2));
        engine.release(drained.into_iter().next().unwrap().slot);
        assert!(engine.status().is_all_free());
    }

    #[test]
    fn test_invalid_request_never_queued() {
        let (engine, _rx) = engine_with_trigger(1, 4);
        let result = engine.submit(TaskId::new(1), &ResourceRequest::simple(0));
        assert!(matches!(result, Err(SepiaError::InvalidRequest(_))));
        assert_eq!(engine.n_waiting(), 0);
        assert!(engine.status().is_all_free());
    }

    #[test]
    fn test_cancel_waiting() {
        let (engine, _rx) = engine_with_trigger(1, 2);
        let _held = submit(&engine, 1, 2);
        submit(&engine, 2, 1);
        submit(&engine, 3, 1);
        assert!(engine.cancel_waiting(TaskId::new(2)));
        assert!(!engine.cancel_waiting(TaskId::new(2)));
        assert_eq!(engine.waiting_task_ids(), vec![TaskId::new(3)]);
    }

    #[test]
    fn test_drain_order_is_fifo_across_releases() {
        let (engine, _rx) = engine_with_trigger(1, 4);
        let slot = placed(submit(&engine, 1, 4));
        for id in 2..6 {
            submit(&engine, id, 1);
        }
        engine.release(slot);
        let order: Vec<_> = engine.drain().into_iter().map(|d| d.task_id).collect();
        assert_eq!(
            order,
            (2..6).map(TaskId::new).collect::<Vec<_>>()
        );
    }
}
