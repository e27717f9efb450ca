use std::fs::File;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use bstr::ByteSlice;
use nix::errno::Errno;
use nix::sys::signal;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::TaskId;
use crate::internal::common::Map;
use crate::internal::common::error::SepiaError;
use crate::program::{ProgramDefinition, StdioDef};

/// How a supervised process left the watch set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Exit code 0.
    Finished,
    /// Nonzero exit code, passed through verbatim.
    Failed { code: i32 },
    /// Terminated by a signal.
    Killed { signal: i32 },
    /// The OS lost track of the process; no exit code exists.
    Lost { error: String },
}

impl ProcessOutcome {
    fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(0) => ProcessOutcome::Finished,
            Some(code) => ProcessOutcome::Failed { code },
            None => ProcessOutcome::Killed {
                signal: status.signal().unwrap_or(0),
            },
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessOutcome::Finished => Some(0),
            ProcessOutcome::Failed { code } => Some(*code),
            ProcessOutcome::Killed { .. } | ProcessOutcome::Lost { .. } => None,
        }
    }
}

/// Result of a cancellation request, with the kill/exit races made
/// explicit instead of being swallowed.
#[derive(Debug)]
pub enum CancelOutcome {
    /// The process had already exited before any signal was sent.
    AlreadyExited(ProcessOutcome),
    /// The process group ended within the grace period after SIGTERM.
    Terminated,
    /// The grace period ran out and the group was SIGKILLed.
    ForceKilled,
    /// The termination signal could not be delivered.
    SignalFailed { error: String },
}

struct SupervisedProcess {
    child: Child,
    pid: u32,
    started: Instant,
}

/// Watches one OS process (group) per running task: spawn, non-blocking
/// liveness polling, cancellation and reaping.
pub struct ProcessSupervisor {
    running: Map<TaskId, SupervisedProcess>,
    grace_period: Duration,
}

impl ProcessSupervisor {
    pub fn new(grace_period: Duration) -> Self {
        ProcessSupervisor {
            running: Map::default(),
            grace_period,
        }
    }

    /// Start `program` as a child in its own session/process group.
    pub fn spawn(&mut self, task_id: TaskId, program: &ProgramDefinition) -> crate::Result<u32> {
        debug_assert!(!self.running.contains_key(&task_id));
        let mut command = command_from_program(program)?;
        let child = command
            .spawn()
            .map_err(|error| SepiaError::SpawnFailed(error.to_string()))?;
        let pid = child
            .id()
            .ok_or_else(|| SepiaError::SpawnFailed("process exited before its pid could be read".to_string()))?;
        log::debug!("Task {task_id} spawned as pid {pid}");
        self.running.insert(
            task_id,
            SupervisedProcess {
                child,
                pid,
                started: Instant::now(),
            },
        );
        Ok(pid)
    }

    /// One non-blocking sweep over the watch set. Finished or lost
    /// processes are reaped, removed and returned; every tracked task
    /// eventually shows up here or in [`ProcessSupervisor::cancel`].
    pub fn poll(&mut self) -> Vec<(TaskId, ProcessOutcome)> {
        let mut finished: Vec<(TaskId, ProcessOutcome)> = Vec::new();
        for (task_id, process) in self.running.iter_mut() {
            match process.child.try_wait() {
                Ok(Some(status)) => {
                    let outcome = ProcessOutcome::from_status(status);
                    log::debug!(
                        "Task {} (pid {}) exited after {:.3}s: {:?}",
                        task_id,
                        process.pid,
                        process.started.elapsed().as_secs_f64(),
                        outcome
                    );
                    finished.push((*task_id, outcome));
                }
                Ok(None) => {}
                Err(error) => {
                    log::error!(
                        "Task {} (pid {}) lost: {error}",
                        task_id,
                        process.pid
                    );
                    finished.push((
                        *task_id,
                        ProcessOutcome::Lost {
                            error: error.to_string(),
                        },
                    ));
                }
            }
        }
        for (task_id, _) in &finished {
            self.running.remove(task_id);
        }
        finished
    }

    /// Terminate the task's process group: SIGTERM, a reap bounded by
    /// the grace period, then SIGKILL. Returns `None` for untracked
    /// tasks.
    pub async fn cancel(&mut self, task_id: TaskId) -> Option<CancelOutcome> {
        let mut process = self.running.remove(&task_id)?;

        match process.child.try_wait() {
            Ok(Some(status)) => {
                return Some(CancelOutcome::AlreadyExited(ProcessOutcome::from_status(
                    status,
                )));
            }
            Ok(None) => {}
            Err(error) => {
                return Some(CancelOutcome::AlreadyExited(ProcessOutcome::Lost {
                    error: error.to_string(),
                }));
            }
        }

        log::debug!("Canceling task {task_id}, sending SIGTERM to pid {}", process.pid);
        match send_signal(process.pid, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => {
                // The group died between try_wait and the signal; reap.
                return Some(match process.child.wait().await {
                    Ok(status) => {
                        CancelOutcome::AlreadyExited(ProcessOutcome::from_status(status))
                    }
                    Err(error) => CancelOutcome::AlreadyExited(ProcessOutcome::Lost {
                        error: error.to_string(),
                    }),
                });
            }
            Err(error) => {
                log::error!("Cannot signal task {task_id} (pid {}): {error}", process.pid);
                return Some(CancelOutcome::SignalFailed {
                    error: error.to_string(),
                });
            }
        }

        match tokio::time::timeout(self.grace_period, process.child.wait()).await {
            Ok(Ok(_status)) => Some(CancelOutcome::Terminated),
            Ok(Err(error)) => Some(CancelOutcome::AlreadyExited(ProcessOutcome::Lost {
                error: error.to_string(),
            })),
            Err(_elapsed) => {
                log::debug!(
                    "Task {task_id} ignored SIGTERM for {:?}, sending SIGKILL",
                    self.grace_period
                );
                if let Err(error) = send_signal(process.pid, Signal::SIGKILL) {
                    log::error!("Cannot SIGKILL task {task_id}: {error}");
                }
                // SIGKILL cannot be ignored; the reap completes.
                let _ = process.child.wait().await;
                Some(CancelOutcome::ForceKilled)
            }
        }
    }

    pub fn is_supervised(&self, task_id: TaskId) -> bool {
        self.running.contains_key(&task_id)
    }

    pub fn n_running(&self) -> usize {
        self.running.len()
    }

    pub fn running_task_ids(&self) -> Vec<TaskId> {
        self.running.keys().copied().collect()
    }
}

/// Signal the whole process group of `pid`, not just the leaf process;
/// launch wrappers like `mpirun` fork their payloads into the same
/// group. Until the child has called `setsid` it still sits in the
/// agent's own group; in that window only the child itself is signaled.
fn send_signal(pid: u32, signal: Signal) -> Result<(), Errno> {
    let pgid = nix::unistd::getpgid(Some(Pid::from_raw(pid as i32)))?;
    if pgid == nix::unistd::getpgrp() {
        signal::kill(Pid::from_raw(pid as i32), signal)
    } else {
        signal::killpg(pgid, Some(signal))
    }
}

fn create_output_stream(def: &StdioDef, cwd: &Path) -> crate::Result<Stdio> {
    let stdio = match def {
        StdioDef::File(path) => {
            let stream_path = if path.is_relative() && !cwd.as_os_str().is_empty() {
                cwd.join(path)
            } else {
                path.clone()
            };
            let file = File::create(stream_path)
                .map_err(|e| format!("Creating stream file failed: {e}"))?;
            Stdio::from(file)
        }
        StdioDef::Null => Stdio::null(),
        StdioDef::Pipe => Stdio::piped(),
    };
    Ok(stdio)
}

fn command_from_program(definition: &ProgramDefinition) -> crate::Result<Command> {
    if definition.args.is_empty() {
        return Err(SepiaError::GenericError(
            "No command arguments".to_string(),
        ));
    }

    let mut command = Command::new(definition.args[0].to_os_str_lossy());

    #[cfg(target_os = "linux")]
    unsafe {
        use nix::libc;
        command.pre_exec(|| {
            // A separate session/process group lets us signal the task
            // without also signaling the agent itself.
            if let Err(error) = nix::unistd::setsid() {
                log::error!("Cannot set SID for task process: {error:?}");
            }
            // Send SIGTERM to the task when the agent dies.
            let ret = libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
            match ret {
                0 => {}
                error => log::error!("Cannot set PR_SET_PDEATHSIG for task process: {error:?}"),
            }
            Ok(())
        });
    }

    command.kill_on_drop(true);
    command.args(definition.args[1..].iter().map(|x| x.to_os_str_lossy()));

    if !definition.cwd.as_os_str().is_empty() {
        if !definition.cwd.is_dir() {
            std::fs::create_dir_all(&definition.cwd).map_err(|error| {
                SepiaError::GenericError(format!("Could not create working directory: {error:?}"))
            })?;
        }
        command.current_dir(&definition.cwd);
    }

    command.stdout(create_output_stream(&definition.stdout, &definition.cwd)?);
    command.stderr(create_output_stream(&definition.stderr, &definition.cwd)?);
    command.stdin(Stdio::null());

    for (k, v) in definition.env.iter() {
        command.env(k.to_os_str_lossy(), v.to_os_str_lossy());
    }

    Ok(command)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{CancelOutcome, ProcessOutcome, ProcessSupervisor};
    use crate::TaskId;
    use crate::internal::common::error::SepiaError;
    use crate::internal::tests::utils::shell_program;
    use crate::program::StdioDef;

    async fn wait_for_exit(
        supervisor: &mut ProcessSupervisor,
        task_id: TaskId,
    ) -> ProcessOutcome {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            for (id, outcome) in supervisor.poll() {
                if id == task_id {
                    return outcome;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "process did not finish in time"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_spawn_and_poll_success() {
        let mut supervisor = ProcessSupervisor::new(Duration::from_secs(1));
        let id = TaskId::new(1);
        supervisor.spawn(id, &shell_program("exit 0")).unwrap();
        assert!(supervisor.is_supervised(id));
        assert_eq!(wait_for_exit(&mut supervisor, id).await, ProcessOutcome::Finished);
        assert!(!supervisor.is_supervised(id));
    }

    #[tokio::test]
    async fn test_nonzero_exit_code_is_passed_through() {
        let mut supervisor = ProcessSupervisor::new(Duration::from_secs(1));
        let id = TaskId::new(2);
        supervisor.spawn(id, &shell_program("exit 3")).unwrap();
        assert_eq!(
            wait_for_exit(&mut supervisor, id).await,
            ProcessOutcome::Failed { code: 3 }
        );
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let mut supervisor = ProcessSupervisor::new(Duration::from_secs(1));
        let program = crate::program::ProgramDefinition::new(vec![
            "/nonexistent/sepia-test-binary".into(),
        ]);
        let result = supervisor.spawn(TaskId::new(3), &program);
        assert!(matches!(result, Err(SepiaError::SpawnFailed(_))));
        assert_eq!(supervisor.n_running(), 0);
    }

    #[tokio::test]
    async fn test_cancel_running_process() {
        let mut supervisor = ProcessSupervisor::new(Duration::from_secs(5));
        let id = TaskId::new(4);
        supervisor.spawn(id, &shell_program("sleep 30")).unwrap();
        let outcome = supervisor.cancel(id).await.unwrap();
        assert!(matches!(outcome, CancelOutcome::Terminated), "{outcome:?}");
        assert!(!supervisor.is_supervised(id));
    }

    #[tokio::test]
    async fn test_cancel_escalates_to_sigkill() {
        let mut supervisor = ProcessSupervisor::new(Duration::from_millis(200));
        let id = TaskId::new(5);
        // the shell ignores SIGTERM and keeps respawning its sleep child
        supervisor
            .spawn(id, &shell_program("trap '' TERM; while :; do sleep 0.1; done"))
            .unwrap();
        // give the shell a moment to install the trap
        tokio::time::sleep(Duration::from_millis(300)).await;
        let outcome = supervisor.cancel(id).await.unwrap();
        assert!(matches!(outcome, CancelOutcome::ForceKilled), "{outcome:?}");
    }

    #[tokio::test]
    async fn test_cancel_already_exited_process() {
        let mut supervisor = ProcessSupervisor::new(Duration::from_secs(1));
        let id = TaskId::new(6);
        supervisor.spawn(id, &shell_program("exit 7")).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        match supervisor.cancel(id).await.unwrap() {
            CancelOutcome::AlreadyExited(ProcessOutcome::Failed { code }) => {
                assert_eq!(code, 7)
            }
            other => panic!("unexpected cancel outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_untracked_task_is_noop() {
        let mut supervisor = ProcessSupervisor::new(Duration::from_secs(1));
        assert!(supervisor.cancel(TaskId::new(42)).await.is_none());
    }

    #[tokio::test]
    async fn test_stdout_redirection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let mut program = shell_program("echo sepia-output");
        program.stdout = StdioDef::File(path.clone());
        let mut supervisor = ProcessSupervisor::new(Duration::from_secs(1));
        let id = TaskId::new(7);
        supervisor.spawn(id, &program).unwrap();
        assert_eq!(wait_for_exit(&mut supervisor, id).await, ProcessOutcome::Finished);
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.trim(), "sepia-output");
    }
}
