use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AgentConfiguration {
    /// Cadence of the supervisor liveness sweep.
    pub poll_interval: Duration,

    /// How long a canceled task may outlive its SIGTERM before the
    /// process group is SIGKILLed.
    pub grace_period: Duration,

    /// Explicit launch method priority order. `None` selects in
    /// registration order.
    pub launch_order: Option<Vec<String>>,
}

impl Default for AgentConfiguration {
    fn default() -> Self {
        AgentConfiguration {
            poll_interval: Duration::from_millis(100),
            grace_period: Duration::from_secs(1),
            launch_order: None,
        }
    }
}
