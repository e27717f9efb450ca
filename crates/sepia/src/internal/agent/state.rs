use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::TaskId;
use crate::internal::agent::comm::AgentComm;
use crate::internal::agent::configuration::AgentConfiguration;
use crate::internal::agent::launcher::{LaunchContext, LaunchMethodRegistry};
use crate::internal::agent::scheduler::{RescheduleTrigger, ScheduleOutcome, SchedulingEngine};
use crate::internal::agent::supervisor::{ProcessOutcome, ProcessSupervisor};
use crate::internal::agent::task::{Task, TaskState};
use crate::internal::common::Map;
use crate::internal::common::error::SepiaError;
use crate::internal::messages::{TaskResultMsg, TaskSpec};
use crate::internal::resources::descriptor::ResourceInventory;
use crate::internal::resources::slot::Slot;
use crate::program::ProgramDefinition;

/// All state owned by the agent loop: the task table plus the
/// scheduling, launching and supervising components. Built once per
/// scheduling session and torn down when the loop exits.
pub struct AgentState {
    tasks: Map<TaskId, Task>,
    pub(crate) engine: Arc<SchedulingEngine>,
    pub(crate) registry: LaunchMethodRegistry,
    pub(crate) supervisor: ProcessSupervisor,
    pub(crate) comm: AgentComm,
    pub(crate) inventory: Arc<ResourceInventory>,
    pub(crate) configuration: AgentConfiguration,
}

impl AgentState {
    /// Returns the state and the reschedule trigger consumer that has
    /// to be handed to the agent loop.
    pub fn new(
        inventory: Arc<ResourceInventory>,
        configuration: AgentConfiguration,
        result_tx: UnboundedSender<TaskResultMsg>,
    ) -> (Self, UnboundedReceiver<()>) {
        let (trigger, reschedule) = RescheduleTrigger::channel();
        let engine = Arc::new(SchedulingEngine::new(inventory.clone(), trigger));
        let registry =
            LaunchMethodRegistry::with_default_methods(configuration.launch_order.clone());
        let supervisor = ProcessSupervisor::new(configuration.grace_period);
        let state = AgentState {
            tasks: Map::default(),
            engine,
            registry,
            supervisor,
            comm: AgentComm::new(result_tx),
            inventory,
            configuration,
        };
        (state, reschedule)
    }

    /// Shared handle for observability (pool status snapshots) from
    /// outside the loop.
    pub fn engine(&self) -> Arc<SchedulingEngine> {
        self.engine.clone()
    }

    pub fn task_state(&self, task_id: TaskId) -> Option<TaskState> {
        self.tasks.get(&task_id).map(|t| t.state())
    }

    pub fn n_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Admission path for a newly submitted task: allocate immediately
    /// when possible, otherwise park it in the wait queue.
    pub(crate) fn schedule_task(&mut self, spec: TaskSpec) {
        let task_id = spec.id;
        if self.tasks.contains_key(&task_id) {
            log::warn!("Task {task_id} is already tracked; ignoring duplicate submission");
            return;
        }
        let task = Task::new(spec);
        let request = task.request.clone();
        self.tasks.insert(task_id, task);

        match self.engine.submit(task_id, &request) {
            Ok(ScheduleOutcome::Placed(slot)) => self.start_task(task_id, slot),
            Ok(ScheduleOutcome::Queued) => {
                self.task_mut(task_id).set_state(TaskState::Waiting);
            }
            Err(error) => self.fail_task(task_id, error),
        }
    }

    /// Launch pipeline for an allocated task: pick a launch method,
    /// build the command, spawn. Any failure reclaims the slot and
    /// fails the task; the loop itself never aborts.
    pub(crate) fn start_task(&mut self, task_id: TaskId, slot: Slot) {
        {
            let task = self.task_mut(task_id);
            task.set_state(TaskState::Launching);
            task.assign_slot(slot);
        }
        let program = match self.build_launch_command(task_id) {
            Ok(program) => program,
            Err(error) => {
                self.fail_task(task_id, error);
                return;
            }
        };
        match self.supervisor.spawn(task_id, &program) {
            Ok(_pid) => self.task_mut(task_id).set_state(TaskState::Running),
            Err(error) => self.fail_task(task_id, error),
        }
    }

    fn build_launch_command(&self, task_id: TaskId) -> crate::Result<ProgramDefinition> {
        let task = self.tasks.get(&task_id).expect("launching unknown task");
        let slot = task.slot().expect("launching task without a slot");
        let method = self.registry.find(task, slot).ok_or_else(|| {
            SepiaError::LaunchMethodUnavailable(format!(
                "no launch method accepts a slot with {} rank(s) on {} node(s)",
                slot.n_ranks(),
                slot.node_ids().len()
            ))
        })?;
        log::debug!("Task {task_id} launching via {}", method.name());
        method.build_command(&LaunchContext {
            task,
            slot,
            inventory: &self.inventory,
        })
    }

    /// Terminal path for a process reaped by the supervisor. The slot
    /// is released before the result goes downstream, so a retry by a
    /// waiter can never observe "done but still occupied".
    pub(crate) fn finish_task(&mut self, task_id: TaskId, outcome: ProcessOutcome) {
        let task = self.task_mut(task_id);
        let slot = task.take_slot();
        let msg = match outcome {
            ProcessOutcome::Finished => {
                task.exit_code = Some(0);
                task.set_state(TaskState::Done);
                TaskResultMsg::finished(task_id)
            }
            ProcessOutcome::Failed { code } => {
                task.exit_code = Some(code);
                task.set_state(TaskState::Failed);
                TaskResultMsg::failed(
                    task_id,
                    Some(code),
                    "NonZeroExit".to_string(),
                    format!("task exited with code {code}"),
                )
            }
            ProcessOutcome::Killed { signal } => {
                task.set_state(TaskState::Failed);
                TaskResultMsg::failed(
                    task_id,
                    None,
                    "Killed".to_string(),
                    format!("task terminated by signal {signal}"),
                )
            }
            ProcessOutcome::Lost { error } => {
                task.set_state(TaskState::Failed);
                TaskResultMsg::failed(task_id, None, "ProcessLost".to_string(), error)
            }
        };
        if let Some(slot) = slot {
            self.engine.release(slot);
        }
        self.publish_result(msg);
    }

    /// Local recovery for any task-level failure: reclaim resources,
    /// mark failed, report downstream.
    pub(crate) fn fail_task(&mut self, task_id: TaskId, error: SepiaError) {
        log::debug!("Task {task_id} failed: {error}");
        let task = self.task_mut(task_id);
        let slot = task.take_slot();
        let exit_code = task.exit_code;
        task.set_state(TaskState::Failed);
        if let Some(slot) = slot {
            self.engine.release(slot);
        }
        self.publish_result(TaskResultMsg::failed(
            task_id,
            exit_code,
            exception_name(&error).to_string(),
            error.to_string(),
        ));
    }

    /// Terminal path for a running task that was canceled.
    pub(crate) fn cancel_finish(&mut self, task_id: TaskId) {
        let task = self.task_mut(task_id);
        let slot = task.take_slot();
        task.set_state(TaskState::Canceled);
        if let Some(slot) = slot {
            self.engine.release(slot);
        }
        self.publish_result(TaskResultMsg::canceled(task_id));
    }

    /// Cancel a task that sits in the wait queue; synchronous, no
    /// process is involved.
    pub(crate) fn cancel_waiting_task(&mut self, task_id: TaskId) -> bool {
        if !self.engine.cancel_waiting(task_id) {
            return false;
        }
        self.task_mut(task_id).set_state(TaskState::Canceled);
        self.publish_result(TaskResultMsg::canceled(task_id));
        true
    }

    /// Consume one reschedule trigger: drain the wait queue in FIFO
    /// order and launch everything that got a slot.
    pub(crate) fn drain_and_start(&mut self) {
        for drained in self.engine.drain() {
            log::debug!(
                "Task {} allocated after waiting {:.3}s",
                drained.task_id,
                drained.waited.as_secs_f64()
            );
            self.start_task(drained.task_id, drained.slot);
        }
    }

    /// Publish the terminal record and drop the task from tracking;
    /// a task is forgotten only after its result went downstream.
    fn publish_result(&mut self, msg: TaskResultMsg) {
        let task_id = msg.id;
        debug_assert!(
            self.tasks
                .get(&task_id)
                .map(|t| t.is_terminal())
                .unwrap_or(false)
        );
        self.comm.send_result(msg);
        self.tasks.remove(&task_id);
    }

    fn task_mut(&mut self, task_id: TaskId) -> &mut Task {
        self.tasks
            .get_mut(&task_id)
            .expect("operation on unknown task")
    }
}

fn exception_name(error: &SepiaError) -> &'static str {
    match error {
        SepiaError::IoError(_) => "IoError",
        SepiaError::InvalidRequest(_) => "InvalidRequest",
        SepiaError::LaunchMethodUnavailable(_) => "LaunchMethodUnavailable",
        SepiaError::SpawnFailed(_) => "ProcessSpawnFailure",
        SepiaError::ProcessLost(_) => "ProcessLost",
        SepiaError::GenericError(_) => "Error",
    }
}
