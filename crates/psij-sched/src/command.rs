//! Running scheduler commands.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{SchedError, SchedResult};

/// Message used when a failed command printed nothing.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, or -1 when killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr, or [`UNKNOWN_ERROR`] when both are empty.
    pub fn combined(&self) -> String {
        let mut msg = String::new();
        msg.push_str(&self.stdout);
        if !self.stderr.is_empty() {
            if !msg.is_empty() {
                msg.push('\n');
            }
            msg.push_str(&self.stderr);
        }
        if msg.is_empty() {
            msg.push_str(UNKNOWN_ERROR);
        }
        msg
    }
}

/// Run `argv` to completion, capturing its output.
///
/// Spawn failures and timeouts are errors; a non-zero exit code is not.
pub async fn run_command(argv: &[String], timeout: Duration) -> SchedResult<CommandOutput> {
    let Some((program, args)) = argv.split_first() else {
        return Err(SchedError::Spawn {
            command: String::new(),
            message: "empty command line".into(),
        });
    };
    debug!("Running command: {:?}", argv);

    let output = tokio::time::timeout(
        timeout,
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| SchedError::Timeout(format!("{} timed out after {:?}", program, timeout)))?
    .map_err(|e| SchedError::Spawn {
        command: program.clone(),
        message: e.to_string(),
    })?;

    let result = CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    debug!(
        "Command {} exited with {}: {}",
        program, result.exit_code, result.stdout
    );
    Ok(result)
}

/// Run `argv` and fail on a non-zero exit code.
pub async fn run_checked(argv: &[String], timeout: Duration) -> SchedResult<CommandOutput> {
    let output = run_command(argv, timeout).await?;
    if !output.success() {
        return Err(SchedError::CommandFailed {
            command: argv.join(" "),
            exit_code: output.exit_code,
            output: output.combined(),
        });
    }
    Ok(output)
}
