use bstr::BString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::internal::common::Map;

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq, Default)]
pub enum StdioDef {
    #[default]
    Null,
    File(PathBuf),
    Pipe,
}

/// Description of the program a task should execute. This is the
/// launch-command input supplied by the submitter; launch methods may
/// wrap the argument vector and extend the environment before the
/// supervisor spawns it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProgramDefinition {
    pub args: Vec<BString>,

    #[serde(default)]
    pub env: Map<BString, BString>,

    #[serde(default)]
    pub stdout: StdioDef,

    #[serde(default)]
    pub stderr: StdioDef,

    #[serde(default)]
    pub cwd: PathBuf,
}

impl ProgramDefinition {
    pub fn new(args: Vec<BString>) -> Self {
        ProgramDefinition {
            args,
            env: Map::default(),
            stdout: StdioDef::Null,
            stderr: StdioDef::Null,
            cwd: PathBuf::new(),
        }
    }

    /// Prepend a launcher prefix (e.g. an `mpirun ...` preamble) to the
    /// argument vector.
    pub fn wrap_args(&mut self, prefix: Vec<BString>) {
        let mut args = prefix;
        args.append(&mut self.args);
        self.args = args;
    }
}
