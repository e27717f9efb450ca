use tokio::sync::mpsc::UnboundedSender;

use crate::internal::messages::TaskResultMsg;

/// Outbound side of the agent: hands every terminal task record to the
/// staging/output pipeline. One message per terminal task, always.
pub struct AgentComm {
    result_tx: UnboundedSender<TaskResultMsg>,
    n_results: u64,
}

impl AgentComm {
    pub fn new(result_tx: UnboundedSender<TaskResultMsg>) -> Self {
        AgentComm {
            result_tx,
            n_results: 0,
        }
    }

    pub fn send_result(&mut self, msg: TaskResultMsg) {
        self.n_results += 1;
        if self.result_tx.send(msg).is_err() {
            log::error!("Result channel closed; a task result was dropped");
        }
    }

    pub fn n_results(&self) -> u64 {
        self.n_results
    }
}
