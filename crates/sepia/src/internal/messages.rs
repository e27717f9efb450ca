use serde::{Deserialize, Serialize};

use crate::TaskId;
use crate::internal::resources::request::ResourceRequest;
use crate::program::ProgramDefinition;

/// Inbound task record from the orchestration boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    pub request: ResourceRequest,
    pub program: ProgramDefinition,
}

/// Commands understood by the agent loop.
#[derive(Debug)]
pub enum AgentCommand {
    Run(Box<TaskSpec>),
    Cancel(TaskId),
    Stop,
}

/// Parse one inbound command envelope.
///
/// Envelopes carry a `cmd` verb plus a verb-specific payload:
/// `{"cmd": "run", "task": {...}}`, `{"cmd": "cancel", "id": 3}`,
/// `{"cmd": "stop"}`. Unknown verbs and malformed payloads are logged
/// and dropped; they never take the agent loop down.
pub fn parse_command(raw: &str) -> Option<AgentCommand> {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(error) => {
            log::warn!("Ignoring malformed command message: {error}");
            return None;
        }
    };
    match value.get("cmd").and_then(|v| v.as_str()) {
        Some("run") => match serde_json::from_value::<TaskSpec>(value["task"].clone()) {
            Ok(spec) => Some(AgentCommand::Run(Box::new(spec))),
            Err(error) => {
                log::warn!("Ignoring run command with malformed task record: {error}");
                None
            }
        },
        Some("cancel") => match serde_json::from_value::<TaskId>(value["id"].clone()) {
            Ok(id) => Some(AgentCommand::Cancel(id)),
            Err(error) => {
                log::warn!("Ignoring cancel command without a task id: {error}");
                None
            }
        },
        Some("stop") => Some(AgentCommand::Stop),
        Some(verb) => {
            log::warn!("Ignoring unknown command verb {verb:?}");
            None
        }
        None => {
            log::warn!("Ignoring command message without a verb");
            None
        }
    }
}

/// Final state reported downstream for a terminated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetState {
    Done,
    Failed,
    Canceled,
}

/// Outbound record emitted exactly once per terminal task; the staging
/// pipeline consumes these unconditionally, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResultMsg {
    pub id: TaskId,
    pub target_state: TargetState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_detail: Option<String>,
}

impl TaskResultMsg {
    pub fn finished(id: TaskId) -> Self {
        TaskResultMsg {
            id,
            target_state: TargetState::Done,
            exit_code: Some(0),
            exception: None,
            exception_detail: None,
        }
    }

    pub fn failed(id: TaskId, exit_code: Option<i32>, exception: String, detail: String) -> Self {
        TaskResultMsg {
            id,
            target_state: TargetState::Failed,
            exit_code,
            exception: Some(exception),
            exception_detail: Some(detail),
        }
    }

    pub fn canceled(id: TaskId) -> Self {
        TaskResultMsg {
            id,
            target_state: TargetState::Canceled,
            exit_code: None,
            exception: None,
            exception_detail: None,
        }
    }
}
