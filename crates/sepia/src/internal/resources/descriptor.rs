use serde::{Deserialize, Serialize};

use crate::internal::common::Set;
use crate::internal::common::error::SepiaError;
use crate::{CoreId, GpuId, NodeId};

/// Static description of one node of the pilot allocation.
///
/// The inventory is handed to the agent at startup by the resource
/// acquisition layer and never changes during a scheduling session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub id: NodeId,
    pub name: String,
    pub cores: Vec<CoreId>,
    pub gpus: Vec<GpuId>,
    /// Node-local scratch storage, in bytes.
    pub lfs: u64,
    /// Memory, in bytes.
    pub mem: u64,
}

impl NodeDescriptor {
    pub fn new(
        id: NodeId,
        name: &str,
        n_cores: u32,
        n_gpus: u32,
        lfs: u64,
        mem: u64,
    ) -> Self {
        NodeDescriptor {
            id,
            name: name.to_string(),
            cores: (0..n_cores).map(CoreId::new).collect(),
            gpus: (0..n_gpus).map(GpuId::new).collect(),
            lfs,
            mem,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInventory {
    nodes: Vec<NodeDescriptor>,
}

impl ResourceInventory {
    pub fn new(nodes: Vec<NodeDescriptor>) -> crate::Result<Self> {
        if nodes.is_empty() {
            return Err(SepiaError::GenericError(
                "Resource inventory has no nodes".to_string(),
            ));
        }
        let mut node_ids = Set::default();
        for node in &nodes {
            if !node_ids.insert(node.id) {
                return Err(SepiaError::GenericError(format!(
                    "Duplicate node id {} in resource inventory",
                    node.id
                )));
            }
            if node.cores.is_empty() {
                return Err(SepiaError::GenericError(format!(
                    "Node {} has no cores",
                    node.name
                )));
            }
            let core_ids: Set<CoreId> = node.cores.iter().copied().collect();
            if core_ids.len() != node.cores.len() {
                return Err(SepiaError::GenericError(format!(
                    "Node {} has duplicate core ids",
                    node.name
                )));
            }
            let gpu_ids: Set<GpuId> = node.gpus.iter().copied().collect();
            if gpu_ids.len() != node.gpus.len() {
                return Err(SepiaError::GenericError(format!(
                    "Node {} has duplicate gpu ids",
                    node.name
                )));
            }
        }
        Ok(ResourceInventory { nodes })
    }

    /// Inventory of `n_nodes` identical nodes, named `node0`, `node1`, ...
    pub fn uniform(n_nodes: u32, n_cores: u32, n_gpus: u32, lfs: u64, mem: u64) -> Self {
        let nodes = (0..n_nodes)
            .map(|i| {
                NodeDescriptor::new(
                    NodeId::new(i),
                    &format!("node{i}"),
                    n_cores,
                    n_gpus,
                    lfs,
                    mem,
                )
            })
            .collect();
        ResourceInventory::new(nodes).expect("uniform inventory is always valid")
    }

    pub fn nodes(&self) -> &[NodeDescriptor] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeDescriptor> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn hostname(&self, id: NodeId) -> Option<&str> {
        self.node(id).map(|n| n.name.as_str())
    }

    pub fn total_cores(&self) -> u32 {
        self.nodes.iter().map(|n| n.cores.len() as u32).sum()
    }

    pub fn total_gpus(&self) -> u32 {
        self.nodes.iter().map(|n| n.gpus.len() as u32).sum()
    }
}
