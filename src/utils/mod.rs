pub mod command;
pub mod template;

pub use command::{CommandRunner, EnvironmentCheck, ShellRunner};
pub use template::{CommandTemplate, Placeholder};
