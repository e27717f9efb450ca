use bstr::BString;

use crate::internal::agent::launcher::{LaunchContext, LaunchMethod, insert_resource_env};
use crate::internal::agent::task::Task;
use crate::internal::common::utils::format_comma_delimited;
use crate::internal::resources::slot::Slot;
use crate::program::ProgramDefinition;

/// Launch through `mpirun`: one process per rank, placed on the slot's
/// nodes via a host list. Accepts any slot shape, so it usually sits
/// behind `fork` in the priority order and picks up multi-rank tasks.
pub struct MpirunLaunch;

impl LaunchMethod for MpirunLaunch {
    fn name(&self) -> &'static str {
        "mpirun"
    }

    fn can_launch(&self, _task: &Task, _slot: &Slot) -> bool {
        true
    }

    fn build_command(&self, ctx: &LaunchContext) -> crate::Result<ProgramDefinition> {
        if ctx.task.program.args.is_empty() {
            return Err(crate::Error::GenericError(
                "task has no command arguments".to_string(),
            ));
        }
        let mut program = ctx.task.program.clone();
        let prefix: Vec<BString> = vec![
            "mpirun".into(),
            "-np".into(),
            ctx.slot.n_ranks().to_string().into(),
            "--host".into(),
            format_comma_delimited(ctx.rank_hostnames()).into(),
        ];
        program.wrap_args(prefix);
        insert_resource_env(&mut program, ctx);
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::MpirunLaunch;
    use crate::internal::agent::launcher::{LaunchContext, LaunchMethod};
    use crate::internal::tests::utils::{task_with_slot, uniform_inventory};

    #[test]
    fn test_mpirun_prefixes_command() {
        let inventory = uniform_inventory(2, 4);
        let (task, slot) = task_with_slot(&inventory, 2, 8);
        let ctx = LaunchContext {
            task: &task,
            slot: &slot,
            inventory: &inventory,
        };
        let program = MpirunLaunch.build_command(&ctx).unwrap();
        assert_eq!(program.args[0], bstr::BString::from("mpirun"));
        assert_eq!(program.args[1], bstr::BString::from("-np"));
        assert_eq!(program.args[2], bstr::BString::from("2"));
        assert_eq!(program.args[3], bstr::BString::from("--host"));
        assert_eq!(program.args[4], bstr::BString::from("node0,node1"));
        // the original argument vector follows the prefix
        assert_eq!(&program.args[5..], &task.program.args[..]);
    }
}
