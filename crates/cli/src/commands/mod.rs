pub mod migrate;

use std::process::ExitCode;

/// How a command finished when it did not error out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    /// A run halted on a failing migration
    RunFailed,
}

impl CommandStatus {
    pub fn exit_code(self) -> ExitCode {
        match self {
            CommandStatus::Success => ExitCode::SUCCESS,
            CommandStatus::RunFailed => ExitCode::from(1),
        }
    }
}
