use std::sync::Arc;
use std::time::Duration;

use derive_builder::Builder;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::TaskId;
use crate::internal::agent::allocator::SlotAllocator;
use crate::internal::agent::configuration::AgentConfiguration;
use crate::internal::agent::reactor::run_agent;
use crate::internal::agent::scheduler::{RescheduleTrigger, SchedulingEngine};
use crate::internal::agent::state::AgentState;
use crate::internal::agent::task::Task;
use crate::internal::messages::{AgentCommand, TaskResultMsg, TaskSpec};
use crate::internal::resources::descriptor::ResourceInventory;
use crate::internal::resources::request::ResourceRequest;
use crate::internal::resources::slot::Slot;
use crate::program::ProgramDefinition;

pub struct ReqBuilder {
    ranks: u32,
    cores: u32,
    gpus: u32,
    lfs: u64,
    mem: u64,
}

impl Default for ReqBuilder {
    fn default() -> Self {
        ReqBuilder {
            ranks: 1,
            cores: 1,
            gpus: 0,
            lfs: 0,
            mem: 0,
        }
    }
}

impl ReqBuilder {
    pub fn ranks(mut self, ranks: u32) -> Self {
        self.ranks = ranks;
        self
    }

    pub fn cores(mut self, cores: u32) -> Self {
        self.cores = cores;
        self
    }

    pub fn gpus(mut self, gpus: u32) -> Self {
        self.gpus = gpus;
        self
    }

    pub fn lfs(mut self, lfs: u64) -> Self {
        self.lfs = lfs;
        self
    }

    pub fn mem(mut self, mem: u64) -> Self {
        self.mem = mem;
        self
    }

    pub fn finish(self) -> ResourceRequest {
        ResourceRequest::new(self.ranks, self.cores, self.gpus, self.lfs, self.mem)
    }
}

pub fn uniform_inventory(n_nodes: u32, cores: u32) -> ResourceInventory {
    ResourceInventory::uniform(n_nodes, cores, 0, 0, 0)
}

pub fn engine_with_trigger(
    n_nodes: u32,
    cores: u32,
) -> (SchedulingEngine, UnboundedReceiver<()>) {
    let (trigger, rx) = RescheduleTrigger::channel();
    let engine = SchedulingEngine::new(Arc::new(uniform_inventory(n_nodes, cores)), trigger);
    (engine, rx)
}

pub fn shell_program(script: &str) -> ProgramDefinition {
    ProgramDefinition::new(vec!["/bin/sh".into(), "-c".into(), script.into()])
}

pub fn shell_spec(id: u64, cores: u32, script: &str) -> TaskSpec {
    TaskSpec {
        id: TaskId::new(id),
        request: ResourceRequest::simple(cores),
        program: shell_program(script),
    }
}

pub fn spec_with_request(id: u64, request: ResourceRequest, script: &str) -> TaskSpec {
    TaskSpec {
        id: TaskId::new(id),
        request,
        program: shell_program(script),
    }
}

/// A task plus a slot allocated for it from a fresh pool over
/// `inventory`; for exercising launch methods.
pub fn task_with_slot(inventory: &ResourceInventory, ranks: u32, cores: u32) -> (Task, Slot) {
    let request = ReqBuilder::default().ranks(ranks).cores(cores).finish();
    let task = Task::new(spec_with_request(1, request.clone(), "true"));
    let (trigger, _rx) = RescheduleTrigger::channel();
    let allocator = SlotAllocator::new(inventory, trigger);
    let slot = allocator
        .allocate(&request)
        .unwrap()
        .expect("test inventory cannot host the requested slot");
    (task, slot)
}

#[derive(Builder)]
#[builder(pattern = "owned")]
pub struct TestAgentConfig {
    #[builder(default = "1")]
    n_nodes: u32,
    #[builder(default = "4")]
    cores: u32,
    #[builder(default = "0")]
    gpus: u32,
    #[builder(default = "Duration::from_millis(10)")]
    poll_interval: Duration,
    #[builder(default = "Duration::from_secs(2)")]
    grace_period: Duration,
    #[builder(default)]
    launch_order: Option<Vec<String>>,
}

/// Full agent loop running in a background tokio task, driven through
/// the same channels the orchestration boundary would use.
pub struct AgentHarness {
    cmd_tx: UnboundedSender<AgentCommand>,
    result_rx: UnboundedReceiver<TaskResultMsg>,
    pub engine: Arc<SchedulingEngine>,
    handle: tokio::task::JoinHandle<crate::Result<()>>,
}

impl AgentHarness {
    pub fn start(config: TestAgentConfigBuilder) -> Self {
        let config = config.build().unwrap();
        let inventory = Arc::new(ResourceInventory::uniform(
            config.n_nodes,
            config.cores,
            config.gpus,
            0,
            0,
        ));
        let configuration = AgentConfiguration {
            poll_interval: config.poll_interval,
            grace_period: config.grace_period,
            launch_order: config.launch_order,
        };
        let (result_tx, result_rx) = unbounded_channel();
        let (state, reschedule) = AgentState::new(inventory, configuration, result_tx);
        let engine = state.engine();
        let (cmd_tx, cmd_rx) = unbounded_channel();
        let handle = tokio::spawn(run_agent(state, cmd_rx, reschedule));
        AgentHarness {
            cmd_tx,
            result_rx,
            engine,
            handle,
        }
    }

    pub fn run(&self, spec: TaskSpec) {
        self.cmd_tx
            .send(AgentCommand::Run(Box::new(spec)))
            .expect("agent loop is gone");
    }

    pub fn cancel(&self, id: u64) {
        self.cmd_tx
            .send(AgentCommand::Cancel(TaskId::new(id)))
            .expect("agent loop is gone");
    }

    pub async fn recv_result(&mut self) -> TaskResultMsg {
        tokio::time::timeout(Duration::from_secs(10), self.result_rx.recv())
            .await
            .expect("timed out waiting for a task result")
            .expect("result channel closed")
    }

    /// Wait until every core of the pool is occupied.
    pub async fn wait_until_fully_busy(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if self.engine.status().free_cores == 0 {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "pool never became fully busy"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Send `stop`, wait for the loop to end and return all results
    /// that were still in flight.
    pub async fn stop(mut self) -> Vec<TaskResultMsg> {
        self.cmd_tx
            .send(AgentCommand::Stop)
            .expect("agent loop is gone");
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("agent loop did not stop in time")
            .expect("agent loop panicked")
            .unwrap();
        let mut results = Vec::new();
        while let Ok(msg) = self.result_rx.try_recv() {
            results.push(msg);
        }
        results
    }
}
