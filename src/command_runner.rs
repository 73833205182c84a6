//! Type-Safe Command Execution
//!
//! `run_command_safe` is the only way `SystemHost` runs external programs:
//!
//! - Process group isolation, so interrupted runs take their children down
//! - PID registration with the global `ChildRegistry`
//! - Arguments and environment come from a `CommandArgs` implementation

use std::process::{Command, Stdio};
use tracing::{debug, info};

use crate::command_traits::CommandArgs;
use crate::error::{ProvisionError, Result};
use crate::process_guard::{ChildRegistry, CommandProcessGroup};

/// Execute a command with type-safe arguments and wait for it.
///
/// Returns `Ok` whenever the program could be spawned and waited on, even
/// if it exited non-zero; use `CommandOutput::ensure_success` when a
/// non-zero exit is an error. Probes such as `dpkg-query` rely on this to
/// read "not installed" from the exit code.
pub fn run_command_safe<T: CommandArgs>(args: &T) -> Result<CommandOutput> {
    let program = args.program();
    let cli_args = args.to_cli_args();
    let env_vars = args.get_env_vars();

    debug!(command = %args.display(), env = ?env_vars, "run_command_safe");

    let mut cmd = Command::new(program);
    cmd.args(&cli_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .in_new_process_group();

    for (key, value) in &env_vars {
        cmd.env(key, value);
    }

    let child = cmd.spawn().map_err(|e| {
        ProvisionError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to spawn {}: {}", program, e),
        ))
    })?;
    let pid = child.id();

    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.register(pid);
    }

    let output = child.wait_with_output();

    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.unregister(pid);
    }

    let output = output?;
    let result = CommandOutput {
        program: program.to_string(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
        success: output.status.success(),
    };

    if result.success {
        debug!(program, "command succeeded");
    } else {
        info!(
            program,
            exit_code = result.exit_code.unwrap_or(-1),
            "command exited unsuccessfully"
        );
    }

    Ok(result)
}

/// Output from a command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub program: String,
    pub stdout: String,
    pub stderr: String,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl CommandOutput {
    /// Turn a non-zero exit into `ProvisionError::Command`.
    pub fn ensure_success(&self) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(ProvisionError::command(
                &self.program,
                self.exit_code.unwrap_or(-1),
                self.stderr.trim(),
            ))
        }
    }

    /// Trimmed stdout, or None when empty
    pub fn stdout_value(&self) -> Option<String> {
        let value = self.stdout.trim();
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(Vec<String>);

    impl CommandArgs for Echo {
        fn program(&self) -> &'static str {
            "echo"
        }

        fn to_cli_args(&self) -> Vec<String> {
            self.0.clone()
        }
    }

    struct False;

    impl CommandArgs for False {
        fn program(&self) -> &'static str {
            "false"
        }

        fn to_cli_args(&self) -> Vec<String> {
            Vec::new()
        }
    }

    struct Missing;

    impl CommandArgs for Missing {
        fn program(&self) -> &'static str {
            "devstation-no-such-program"
        }

        fn to_cli_args(&self) -> Vec<String> {
            Vec::new()
        }
    }

    #[test]
    fn test_run_command_captures_stdout() {
        let output = run_command_safe(&Echo(vec!["Europe/Amsterdam".to_string()])).unwrap();
        assert!(output.success);
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout_value().as_deref(), Some("Europe/Amsterdam"));
        assert!(output.ensure_success().is_ok());
    }

    #[test]
    fn test_run_command_reports_failure_without_error() {
        let output = run_command_safe(&False).unwrap();
        assert!(!output.success);
        assert_eq!(output.exit_code, Some(1));
        let err = output.ensure_success().unwrap_err();
        assert!(matches!(err, ProvisionError::Command { code: 1, .. }));
    }

    #[test]
    fn test_run_command_missing_program() {
        let err = run_command_safe(&Missing).unwrap_err();
        assert!(matches!(err, ProvisionError::Io(_)));
        assert!(err.to_string().contains("devstation-no-such-program"));
    }

    #[test]
    fn test_registry_is_empty_after_completion() {
        run_command_safe(&Echo(vec![])).unwrap();
        let count = ChildRegistry::global().lock().map(|r| r.count()).unwrap_or(0);
        assert_eq!(count, 0);
    }

    #[test]
    fn test_stdout_value_empty() {
        let output = CommandOutput {
            program: "git".to_string(),
            stdout: "  \n".to_string(),
            stderr: String::new(),
            exit_code: Some(1),
            success: false,
        };
        assert_eq!(output.stdout_value(), None);
    }
}
