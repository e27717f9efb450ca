use std::fmt;
use std::sync::{Mutex, MutexGuard};

use smallvec::SmallVec;

use crate::internal::agent::scheduler::RescheduleTrigger;
use crate::internal::resources::descriptor::ResourceInventory;
use crate::internal::resources::request::{RankChunk, ResourceRequest};
use crate::internal::resources::slot::{RankAllocation, Slot};
use crate::{CoreId, GpuId, NodeId};

/// Free resources of a single node. Owned by [`PoolState`] and mutated
/// only under the allocator lock.
///
/// Core and GPU ids are kept as stacks: a claim pops from the end and a
/// release pushes the ids back in reverse claim order, so a rolled-back
/// allocation restores the previous state exactly.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct NodeState {
    node_id: NodeId,
    name: String,
    free_cores: Vec<CoreId>,
    free_gpus: Vec<GpuId>,
    free_lfs: u64,
    free_mem: u64,
    total_cores: usize,
    total_gpus: usize,
    total_lfs: u64,
    total_mem: u64,
}

impl NodeState {
    fn new(
        node_id: NodeId,
        name: String,
        cores: Vec<CoreId>,
        gpus: Vec<GpuId>,
        lfs: u64,
        mem: u64,
    ) -> Self {
        NodeState {
            node_id,
            name,
            total_cores: cores.len(),
            total_gpus: gpus.len(),
            total_lfs: lfs,
            total_mem: mem,
            free_cores: cores,
            free_gpus: gpus,
            free_lfs: lfs,
            free_mem: mem,
        }
    }

    fn can_host(&self, chunk: &RankChunk) -> bool {
        self.free_cores.len() as u32 >= chunk.cores
            && self.free_gpus.len() as u32 >= chunk.gpus
            && self.free_lfs >= chunk.lfs
            && self.free_mem >= chunk.mem
    }

    fn claim_rank(&mut self, chunk: &RankChunk) -> RankAllocation {
        debug_assert!(self.can_host(chunk));
        let cores: SmallVec<[CoreId; 8]> = (0..chunk.cores)
            .map(|_| self.free_cores.pop().expect("core stack underflow"))
            .collect();
        let gpus: SmallVec<[GpuId; 2]> = (0..chunk.gpus)
            .map(|_| self.free_gpus.pop().expect("gpu stack underflow"))
            .collect();
        self.free_lfs -= chunk.lfs;
        self.free_mem -= chunk.mem;
        RankAllocation {
            node_id: self.node_id,
            cores,
            gpus,
            lfs: chunk.lfs,
            mem: chunk.mem,
        }
    }

    /// Double release or release of foreign units means the resource
    /// bookkeeping is corrupted; that is unrecoverable, so it aborts.
    fn release_rank(&mut self, rank: &RankAllocation) {
        for &core in rank.cores.iter().rev() {
            assert!(
                !self.free_cores.contains(&core),
                "core {} on node {} released twice",
                core,
                self.name
            );
            self.free_cores.push(core);
        }
        for &gpu in rank.gpus.iter().rev() {
            assert!(
                !self.free_gpus.contains(&gpu),
                "gpu {} on node {} released twice",
                gpu,
                self.name
            );
            self.free_gpus.push(gpu);
        }
        self.free_lfs += rank.lfs;
        self.free_mem += rank.mem;
        assert!(
            self.free_cores.len() <= self.total_cores
                && self.free_gpus.len() <= self.total_gpus
                && self.free_lfs <= self.total_lfs
                && self.free_mem <= self.total_mem,
            "node {} has more free resources than its capacity",
            self.name
        );
    }

    #[cfg(debug_assertions)]
    fn validate(&self) {
        use crate::internal::common::Set;
        assert!(self.free_cores.len() <= self.total_cores);
        assert!(self.free_gpus.len() <= self.total_gpus);
        assert_eq!(
            Set::from_iter(self.free_cores.iter()).len(),
            self.free_cores.len()
        );
        assert_eq!(
            Set::from_iter(self.free_gpus.iter()).len(),
            self.free_gpus.len()
        );
    }
}

/// Read-only snapshot of aggregate pool occupation.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PoolStatus {
    pub free_cores: u32,
    pub total_cores: u32,
    pub free_gpus: u32,
    pub total_gpus: u32,
    pub free_lfs: u64,
    pub total_lfs: u64,
    pub free_mem: u64,
    pub total_mem: u64,
}

impl PoolStatus {
    pub fn is_all_free(&self) -> bool {
        self.free_cores == self.total_cores
            && self.free_gpus == self.total_gpus
            && self.free_lfs == self.total_lfs
            && self.free_mem == self.total_mem
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "cores {}/{}, gpus {}/{}, lfs {}/{}, mem {}/{}",
            self.free_cores,
            self.total_cores,
            self.free_gpus,
            self.total_gpus,
            self.free_lfs,
            self.total_lfs,
            self.free_mem,
            self.total_mem
        )
    }
}

/// The mutable free/busy state of the whole pool.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct PoolState {
    nodes: Vec<NodeState>,
}

impl PoolState {
    fn new(inventory: &ResourceInventory) -> Self {
        PoolState {
            nodes: inventory
                .nodes()
                .iter()
                .map(|node| {
                    NodeState::new(
                        node.id,
                        node.name.clone(),
                        node.cores.clone(),
                        node.gpus.clone(),
                        node.lfs,
                        node.mem,
                    )
                })
                .collect(),
        }
    }

    /// First-fit placement of every rank chunk, in node order. If any
    /// rank cannot be placed, all ranks claimed so far are rolled back
    /// and `None` is returned; the pool is then exactly as before.
    pub(crate) fn try_allocate(&mut self, request: &ResourceRequest) -> Option<Slot> {
        let chunk = request.rank_chunk();
        let mut ranks: Vec<RankAllocation> = Vec::with_capacity(request.n_ranks() as usize);
        for _ in 0..request.n_ranks() {
            match self.nodes.iter_mut().find(|n| n.can_host(&chunk)) {
                Some(node) => ranks.push(node.claim_rank(&chunk)),
                None => {
                    for rank in ranks.iter().rev() {
                        self.node_mut(rank.node_id).release_rank(rank);
                    }
                    return None;
                }
            }
        }
        #[cfg(debug_assertions)]
        self.validate();
        Some(Slot::new(ranks))
    }

    pub(crate) fn release(&mut self, slot: Slot) {
        for rank in slot.into_ranks().iter().rev() {
            self.node_mut(rank.node_id).release_rank(rank);
        }
        #[cfg(debug_assertions)]
        self.validate();
    }

    fn node_mut(&mut self, node_id: NodeId) -> &mut NodeState {
        self.nodes
            .iter_mut()
            .find(|n| n.node_id == node_id)
            .unwrap_or_else(|| panic!("slot refers to unknown node {node_id}"))
    }

    pub(crate) fn status(&self) -> PoolStatus {
        let mut status = PoolStatus {
            free_cores: 0,
            total_cores: 0,
            free_gpus: 0,
            total_gpus: 0,
            free_lfs: 0,
            total_lfs: 0,
            free_mem: 0,
            total_mem: 0,
        };
        for node in &self.nodes {
            status.free_cores += node.free_cores.len() as u32;
            status.total_cores += node.total_cores as u32;
            status.free_gpus += node.free_gpus.len() as u32;
            status.total_gpus += node.total_gpus as u32;
            status.free_lfs += node.free_lfs;
            status.total_lfs += node.total_lfs;
            status.free_mem += node.free_mem;
            status.total_mem += node.total_mem;
        }
        status
    }

    #[cfg(debug_assertions)]
    fn validate(&self) {
        for node in &self.nodes {
            node.validate();
        }
    }
}

/// Allocates slots out of the node pool.
///
/// All mutation of [`PoolState`] happens inside a single mutex; the
/// critical sections are O(ranks × chunk size). Whenever both the pool
/// lock and the wait-queue lock are needed, the pool lock is acquired
/// first (see `SchedulingEngine`).
pub struct SlotAllocator {
    state: Mutex<PoolState>,
    trigger: RescheduleTrigger,
}

impl SlotAllocator {
    pub fn new(inventory: &ResourceInventory, trigger: RescheduleTrigger) -> Self {
        SlotAllocator {
            state: Mutex::new(PoolState::new(inventory)),
            trigger,
        }
    }

    /// Try to satisfy `request` against the current pool. `Ok(None)`
    /// means the pool cannot host the request right now; that is an
    /// expected outcome, not an error.
    pub fn allocate(&self, request: &ResourceRequest) -> crate::Result<Option<Slot>> {
        request.validate()?;
        Ok(self.pool().try_allocate(request))
    }

    /// Return all units of `slot` to the pool and fire the reschedule
    /// trigger. The trigger fires unconditionally; whether the freed
    /// resources help any waiter is decided by the drain.
    pub fn release(&self, slot: Slot) {
        {
            let mut pool = self.pool();
            pool.release(slot);
            log::debug!("Slot released, pool status: {}", pool.status());
        }
        self.trigger.notify();
    }

    pub fn status(&self) -> PoolStatus {
        self.pool().status()
    }

    pub(crate) fn pool(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().expect("slot allocator lock poisoned")
    }
}
