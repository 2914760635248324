//! Real command runner and small helpers shared by the tool wrappers.

use crate::error::{Error, Result, command_line};
use declarative::{CommandOutput, CommandRunner};
use std::process::Command;

/// Runs programs as real child processes.
///
/// Output is captured, never inherited: the reconciler decides what to log.
/// No timeout is imposed; a hung child blocks the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &str, args: &[&str]) -> anyhow::Result<CommandOutput> {
        log::trace!("exec: {}", command_line(cmd, args));
        let output = Command::new(cmd)
            .args(args)
            .output()
            .map_err(|e| anyhow::anyhow!("Failed to execute: {}: {e}", command_line(cmd, args)))?;
        Ok(output.into())
    }
}

/// Run a command, mapping spawn errors into [`Error::CommandFailed`].
pub(crate) fn run(runner: &dyn CommandRunner, cmd: &str, args: &[&str]) -> Result<CommandOutput> {
    runner
        .run(cmd, args)
        .map_err(|e| Error::command(cmd, args, format!("{e:#}")))
}

/// Run a command and require a zero exit.
pub(crate) fn run_checked(runner: &dyn CommandRunner, cmd: &str, args: &[&str]) -> Result<String> {
    let output = run(runner, cmd, args)?;
    if !output.success {
        return Err(Error::command(cmd, args, failure_text(&output)));
    }
    Ok(output.stdout_str())
}

/// Best description of why a command failed.
pub(crate) fn failure_text(output: &CommandOutput) -> String {
    let stderr = output.stderr_str();
    if !stderr.trim().is_empty() {
        return stderr.trim().to_string();
    }
    let stdout = output.stdout_str();
    if !stdout.trim().is_empty() {
        return stdout.trim().to_string();
    }
    match output.code {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_runner_captures_output() {
        let output = SystemRunner.run("sh", &["-c", "echo out; echo err >&2; exit 3"]).unwrap();
        assert!(!output.success);
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout_str().trim(), "out");
        assert_eq!(output.stderr_str().trim(), "err");
    }

    #[test]
    fn test_system_runner_missing_program_is_err() {
        assert!(SystemRunner.run("definitely-not-a-real-program-xyz", &[]).is_err());
    }

    #[test]
    fn test_run_checked_maps_failures() {
        let err = run_checked(&SystemRunner, "sh", &["-c", "echo nope >&2; exit 1"]).unwrap_err();
        match err {
            Error::CommandFailed { command, stderr } => {
                assert!(command.starts_with("sh -c"));
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_failure_text_falls_back_to_exit_code() {
        let output = CommandOutput::failed(7, "");
        assert_eq!(failure_text(&output), "exit status 7");
    }
}
