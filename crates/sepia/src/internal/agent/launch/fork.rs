use crate::internal::agent::launcher::{LaunchContext, LaunchMethod, insert_resource_env};
use crate::internal::agent::task::Task;
use crate::internal::resources::slot::Slot;
use crate::program::ProgramDefinition;

/// Direct local execution of single-rank tasks: the submitted argument
/// vector is spawned as-is, with resource visibility exported through
/// the environment.
pub struct ForkLaunch;

impl LaunchMethod for ForkLaunch {
    fn name(&self) -> &'static str {
        "fork"
    }

    fn can_launch(&self, _task: &Task, slot: &Slot) -> bool {
        slot.n_ranks() == 1
    }

    fn build_command(&self, ctx: &LaunchContext) -> crate::Result<ProgramDefinition> {
        if ctx.task.program.args.is_empty() {
            return Err(crate::Error::GenericError(
                "task has no command arguments".to_string(),
            ));
        }
        let mut program = ctx.task.program.clone();
        insert_resource_env(&mut program, ctx);
        Ok(program)
    }
}
