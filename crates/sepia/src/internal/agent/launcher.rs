use bstr::{BString, ByteSlice};

use crate::internal::agent::task::Task;
use crate::internal::common::Map;
use crate::internal::common::utils::format_comma_delimited;
use crate::internal::resources::descriptor::ResourceInventory;
use crate::internal::resources::slot::Slot;
use crate::program::ProgramDefinition;

/// Everything a launch method may consult when building the concrete
/// command for a task.
pub struct LaunchContext<'a> {
    pub task: &'a Task,
    pub slot: &'a Slot,
    pub inventory: &'a ResourceInventory,
}

impl LaunchContext<'_> {
    /// Hostname per rank, in rank order (repeated when several ranks
    /// share a node).
    pub fn rank_hostnames(&self) -> Vec<&str> {
        self.slot
            .ranks()
            .iter()
            .map(|rank| {
                self.inventory
                    .hostname(rank.node_id)
                    .expect("slot refers to unknown node")
            })
            .collect()
    }
}

/// A pluggable strategy for turning an allocated task into an OS-level
/// command. Selection is capability-based: the first method in the
/// configured order whose `can_launch` accepts the slot shape wins.
pub trait LaunchMethod: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_launch(&self, task: &Task, slot: &Slot) -> bool;

    fn build_command(&self, ctx: &LaunchContext) -> crate::Result<ProgramDefinition>;
}

pub struct LaunchMethodRegistry {
    methods: Map<String, Box<dyn LaunchMethod>>,
    /// Explicit priority order; falls back to registration order.
    order: Vec<String>,
    explicit_order: bool,
}

impl LaunchMethodRegistry {
    pub fn new(order: Option<Vec<String>>) -> Self {
        let (order, explicit_order) = match order {
            Some(order) => (order, true),
            None => (Vec::new(), false),
        };
        LaunchMethodRegistry {
            methods: Map::default(),
            order,
            explicit_order,
        }
    }

    /// Registry with the built-in methods (`fork`, then `mpirun`),
    /// optionally reordered/restricted by `order`.
    pub fn with_default_methods(order: Option<Vec<String>>) -> Self {
        use crate::internal::agent::launch::{ForkLaunch, MpirunLaunch};
        let mut registry = LaunchMethodRegistry::new(order);
        registry.register(Box::new(ForkLaunch));
        registry.register(Box::new(MpirunLaunch));
        registry
    }

    pub fn register(&mut self, method: Box<dyn LaunchMethod>) {
        let name = method.name().to_string();
        if self.explicit_order && !self.order.iter().any(|n| n == &name) {
            log::warn!("Launch method {name} is not in the configured order and will never be selected");
        }
        if !self.explicit_order {
            self.order.push(name.clone());
        }
        if self.methods.insert(name, method).is_some() {
            panic!("launch method registered twice");
        }
    }

    /// First method in priority order that accepts the task's slot
    /// shape. `None` is fatal for the task: it holds resources it
    /// cannot use.
    pub fn find(&self, task: &Task, slot: &Slot) -> Option<&dyn LaunchMethod> {
        self.order
            .iter()
            .filter_map(|name| self.methods.get(name))
            .find(|method| method.can_launch(task, slot))
            .map(|method| method.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Resource visibility variables shared by all launch methods, modeled
/// on what batch wrappers export for their payloads.
pub(crate) fn insert_resource_env(program: &mut ProgramDefinition, ctx: &LaunchContext) {
    let env: &mut Map<BString, BString> = &mut program.env;
    env.insert("SEPIA_TASK_ID".into(), ctx.task.id.to_string().into());
    env.insert(
        "SEPIA_NUM_RANKS".into(),
        ctx.slot.n_ranks().to_string().into(),
    );

    let rank0 = &ctx.slot.ranks()[0];
    let cpus = format_comma_delimited(rank0.cores.iter());
    env.insert("SEPIA_CPUS".into(), cpus.into());
    if !env.contains_key(b"OMP_NUM_THREADS".as_bstr()) {
        env.insert(
            "OMP_NUM_THREADS".into(),
            rank0.cores.len().to_string().into(),
        );
    }
    if !rank0.gpus.is_empty() {
        env.insert(
            "CUDA_VISIBLE_DEVICES".into(),
            format_comma_delimited(rank0.gpus.iter()).into(),
        );
        env.insert("CUDA_DEVICE_ORDER".into(), "PCI_BUS_ID".into());
    }
}

#[cfg(test)]
mod tests {
    use super::LaunchMethodRegistry;
    use crate::internal::tests::utils::{task_with_slot, uniform_inventory};

    #[test]
    fn test_find_respects_explicit_order() {
        let inventory = uniform_inventory(2, 4);
        let registry =
            LaunchMethodRegistry::with_default_methods(Some(vec!["mpirun".to_string()]));
        let (task, slot) = task_with_slot(&inventory, 1, 2);
        // fork would accept, but it is not in the configured order
        let method = registry.find(&task, &slot).unwrap();
        assert_eq!(method.name(), "mpirun");
    }

    #[test]
    fn test_find_skips_incapable_methods() {
        let inventory = uniform_inventory(2, 4);
        let registry = LaunchMethodRegistry::with_default_methods(None);
        let (task, slot) = task_with_slot(&inventory, 1, 2);
        assert_eq!(registry.find(&task, &slot).unwrap().name(), "fork");
        let (task, slot) = task_with_slot(&inventory, 2, 8);
        assert_eq!(registry.find(&task, &slot).unwrap().name(), "mpirun");
    }

    #[test]
    fn test_find_none_when_no_method_accepts() {
        let inventory = uniform_inventory(2, 4);
        let registry =
            LaunchMethodRegistry::with_default_methods(Some(vec!["fork".to_string()]));
        let (task, slot) = task_with_slot(&inventory, 2, 8);
        assert!(registry.find(&task, &slot).is_none());
    }
}
