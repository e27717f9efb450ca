use smallvec::SmallVec;

use crate::{CoreId, GpuId, NodeId};

/// Resources claimed on one node for one rank of a task.
#[derive(Debug, Eq, PartialEq)]
pub struct RankAllocation {
    pub node_id: NodeId,
    pub cores: SmallVec<[CoreId; 8]>,
    pub gpus: SmallVec<[GpuId; 2]>,
    pub lfs: u64,
    pub mem: u64,
}

/// The concrete allocation assigned to a task; one entry per rank, in
/// rank order. A slot may span multiple nodes.
///
/// Slots are intentionally not `Clone`: a slot is owned by exactly one
/// task and is moved into `SlotAllocator::release` exactly once.
#[derive(Debug, Eq, PartialEq)]
pub struct Slot {
    ranks: Vec<RankAllocation>,
}

impl Slot {
    pub(crate) fn new(ranks: Vec<RankAllocation>) -> Self {
        debug_assert!(!ranks.is_empty());
        Slot { ranks }
    }

    pub fn ranks(&self) -> &[RankAllocation] {
        &self.ranks
    }

    pub(crate) fn into_ranks(self) -> Vec<RankAllocation> {
        self.ranks
    }

    pub fn n_ranks(&self) -> usize {
        self.ranks.len()
    }

    pub fn n_cores(&self) -> u32 {
        self.ranks.iter().map(|r| r.cores.len() as u32).sum()
    }

    /// Node ids in rank order, deduplicated, first occurrence wins.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = Vec::new();
        for rank in &self.ranks {
            if !out.contains(&rank.node_id) {
                out.push(rank.node_id);
            }
        }
        out
    }

    pub fn spans_multiple_nodes(&self) -> bool {
        self.node_ids().len() > 1
    }
}
