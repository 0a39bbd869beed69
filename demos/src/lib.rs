//! PSI/J Demo Suite
//!
//! Small programs showing how to run jobs through PSI/J executors:
//!
//! - **Hello Job**: submit one command to any registered executor and
//!   follow its status transitions
//!
//! ```ignore
//! use psij_demos::executor_registry;
//! use psij_hal::{ExecutorConfig, Job, JobSpec};
//!
//! let registry = executor_registry()?;
//! let executor = registry.create("local", None, ExecutorConfig::from_env())?;
//! let job = Job::new(JobSpec::new("/bin/hostname", Vec::<String>::new()));
//! executor.submit(&job).await?;
//! ```

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use psij_hal::{ExecutorRegistry, HalResult, JobState, JobStatus};

/// Registry with every executor shipped in this workspace.
pub fn executor_registry() -> HalResult<ExecutorRegistry> {
    let mut registry = ExecutorRegistry::new();
    psij_adapter_local::register(&mut registry)?;
    psij_sched::register(&mut registry)?;
    Ok(registry)
}

/// Split a command line into executable and arguments.
pub fn split_command(mut command: Vec<String>) -> Option<(String, Vec<String>)> {
    if command.is_empty() {
        return None;
    }
    let executable = command.remove(0);
    Some((executable, command))
}

/// One-line description of a status, without styling.
pub fn describe_status(status: &JobStatus) -> String {
    let mut line = status.state.to_string();
    if let Some(code) = status.exit_code {
        line.push_str(&format!(" (exit code {code})"));
    }
    if let Some(message) = &status.message {
        let message = message.trim();
        if !message.is_empty() {
            line.push_str(&format!(": {message}"));
        }
    }
    line
}

/// A status line styled by state.
pub fn styled_status(status: &JobStatus) -> String {
    let text = describe_status(status);
    let styled = match status.state {
        JobState::Completed => style(text).green(),
        JobState::Failed => style(text).red(),
        JobState::Canceled => style(text).yellow(),
        _ => style(text).cyan(),
    };
    format!("{} {}", style("→").dim(), styled)
}

/// Create a spinner shown while waiting for a job.
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a demo header.
pub fn print_header(title: &str) {
    println!();
    println!("{}", style("═".repeat(60)).cyan());
    println!("{}", style(format!("  {title}")).cyan().bold());
    println!("{}", style("═".repeat(60)).cyan());
    println!();
}

/// Print a result line.
pub fn print_result(label: &str, value: impl std::fmt::Display) {
    println!("  {} {}", style(format!("{label}:")).dim(), value);
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Print a failure message.
pub fn print_failure(message: &str) {
    println!("{} {}", style("✗").red().bold(), message);
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", style("ℹ").blue(), message);
}
