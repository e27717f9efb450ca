use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::MissedTickBehavior;

use crate::TaskId;
use crate::internal::agent::state::AgentState;
use crate::internal::agent::supervisor::CancelOutcome;
use crate::internal::agent::task::TaskState;
use crate::internal::common::error::SepiaError;
use crate::internal::messages::AgentCommand;

/// The supervisory loop: multiplexes inbound commands, reschedule
/// triggers and the liveness poll tick. The loop never blocks waiting
/// for new work and never aborts because of a single task failure;
/// only `stop` (or a closed command channel) ends it.
pub async fn run_agent(
    mut state: AgentState,
    mut commands: UnboundedReceiver<AgentCommand>,
    mut reschedule: UnboundedReceiver<()>,
) -> crate::Result<()> {
    log::info!("Agent loop started, pool status: {}", state.engine.status());
    let mut poll_interval = tokio::time::interval(state.configuration.poll_interval);
    poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = poll_interval.tick() => {
                for (task_id, outcome) in state.supervisor.poll() {
                    state.finish_task(task_id, outcome);
                }
            }
            Some(()) = reschedule.recv() => {
                state.drain_and_start();
            }
            command = commands.recv() => match command {
                Some(AgentCommand::Run(spec)) => state.schedule_task(*spec),
                Some(AgentCommand::Cancel(task_id)) => cancel_task(&mut state, task_id).await,
                Some(AgentCommand::Stop) => {
                    shutdown(&mut state).await;
                    break;
                }
                None => {
                    log::debug!("Command channel closed, stopping agent");
                    shutdown(&mut state).await;
                    break;
                }
            }
        }
    }

    log::info!(
        "Agent loop finished after {} result(s), pool status: {}",
        state.comm.n_results(),
        state.engine.status()
    );
    Ok(())
}

/// Route a cancellation: waiting tasks leave the queue synchronously,
/// running tasks get their process group terminated. Canceling a task
/// that already reached a terminal state is a no-op.
async fn cancel_task(state: &mut AgentState, task_id: TaskId) {
    match state.task_state(task_id) {
        None => {
            log::debug!("Cancel of unknown or finished task {task_id} is a no-op");
        }
        Some(TaskState::Waiting) => {
            if state.cancel_waiting_task(task_id) {
                log::debug!("Waiting task {task_id} canceled");
            } else {
                log::warn!("Task {task_id} is marked waiting but was not queued");
            }
        }
        Some(TaskState::Running) => match state.supervisor.cancel(task_id).await {
            Some(CancelOutcome::AlreadyExited(outcome)) => {
                // The task beat the cancel; report its real outcome.
                state.finish_task(task_id, outcome);
            }
            Some(CancelOutcome::Terminated) | Some(CancelOutcome::ForceKilled) => {
                state.cancel_finish(task_id);
            }
            Some(CancelOutcome::SignalFailed { error }) => {
                state.fail_task(
                    task_id,
                    SepiaError::ProcessLost(format!("cancel signal failed: {error}")),
                );
            }
            None => {
                log::warn!("Task {task_id} is marked running but is not supervised");
            }
        },
        Some(other) => {
            log::debug!("Cancel of task {task_id} in state {other:?} is a no-op");
        }
    }
}

/// Orderly teardown: every still-tracked task is driven to a terminal
/// state and reported downstream before the loop exits.
async fn shutdown(state: &mut AgentState) {
    log::info!(
        "Stop requested; canceling {} waiting and {} running task(s)",
        state.engine.n_waiting(),
        state.supervisor.n_running()
    );
    for task_id in state.engine.waiting_task_ids() {
        state.cancel_waiting_task(task_id);
    }
    for task_id in state.supervisor.running_task_ids() {
        cancel_task(state, task_id).await;
    }
}
