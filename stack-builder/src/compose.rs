//! Compose tool detection and invocation.
//!
//! Prefers the Docker compose plugin, then standalone `docker-compose`, then
//! `podman-compose`. Commands run in the stack directory and inherit stdio, so
//! the tool's own output reaches the user.

use crate::{StackError, StackResult};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// A compose invocation: program plus leading arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeCommand {
    program: String,
    base_args: Vec<String>,
}

impl ComposeCommand {
    pub fn new(program: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }

    /// `docker compose`
    pub fn docker_plugin() -> Self {
        Self::new("docker", vec!["compose".to_string()])
    }

    /// `docker-compose`
    pub fn docker_compose() -> Self {
        Self::new("docker-compose", Vec::new())
    }

    /// `podman-compose`
    pub fn podman_compose() -> Self {
        Self::new("podman-compose", Vec::new())
    }

    pub fn display(&self, args: &[&str]) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.base_args.iter().map(String::as_str))
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self, dir: &Path, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args).args(args).current_dir(dir);
        cmd
    }

    /// Run with inherited stdio; a non-zero exit becomes [`StackError::CommandFailed`]
    pub fn run(&self, dir: &Path, args: &[&str]) -> StackResult<()> {
        debug!(command = %self.display(args), "running compose");
        let status = self.command(dir, args).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(StackError::CommandFailed {
                command: self.display(args),
                code: status.code().unwrap_or(1),
            })
        }
    }

    /// Run and capture stdout
    pub fn output(&self, dir: &Path, args: &[&str]) -> StackResult<String> {
        debug!(command = %self.display(args), "running compose");
        let output = self
            .command(dir, args)
            .stderr(Stdio::inherit())
            .output()?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(StackError::CommandFailed {
                command: self.display(args),
                code: output.status.code().unwrap_or(1),
            })
        }
    }

    fn is_available(&self) -> bool {
        Command::new(&self.program)
            .args(&self.base_args)
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// First compose tool that answers `version`
pub fn detect_compose() -> StackResult<ComposeCommand> {
    [
        ComposeCommand::docker_plugin(),
        ComposeCommand::docker_compose(),
        ComposeCommand::podman_compose(),
    ]
    .into_iter()
    .find(ComposeCommand::is_available)
    .ok_or(StackError::NoComposeTool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            ComposeCommand::docker_plugin().display(&["up", "-d"]),
            "docker compose up -d"
        );
        assert_eq!(
            ComposeCommand::docker_compose().display(&["ps"]),
            "docker-compose ps"
        );
    }

    #[test]
    fn test_failing_command_propagates_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = ComposeCommand::new("sh", vec!["-c".to_string(), "exit 3".to_string()]);
        match cmd.run(dir.path(), &[]) {
            Err(StackError::CommandFailed { code, .. }) => assert_eq!(code, 3),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_output_is_captured() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = ComposeCommand::new("sh", vec!["-c".to_string(), "echo running".to_string()]);
        assert_eq!(cmd.output(dir.path(), &[]).unwrap(), "running\n");
    }

    #[test]
    fn test_missing_program_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = ComposeCommand::new("llmops-no-such-compose-tool", Vec::new());
        assert!(matches!(cmd.run(dir.path(), &["ps"]), Err(StackError::Io(_))));
        assert!(!cmd.is_available());
    }
}
