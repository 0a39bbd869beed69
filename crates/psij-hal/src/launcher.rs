//! Launchers turn a job spec into the command line that starts it.
//!
//! | Launcher | Command | Reports launcher failures |
//! |----------|---------|---------------------------|
//! | `single` | the executable itself | never |
//! | `mpirun` | `mpirun -n <processes> ...` | yes |
//! | `srun` | `srun -n <processes> ...` | yes |
//!
//! Wrapping launchers run the job through a small bash script that sources
//! the pre/post-launch scripts, applies stream redirections and prints
//! [`LAUNCHER_DONE_MARKER`] once the wrapped launcher has returned. Output
//! that does not end with the marker means the launcher itself failed.

use std::fmt;

use crate::error::{HalError, HalResult};
use crate::job::Job;
use crate::spec::JobSpec;

/// Printed by wrapper scripts after the wrapped launcher returns.
pub const LAUNCHER_DONE_MARKER: &str = "_PSIJ_LAUNCHER_DONE";

/// Builds launch commands for jobs.
pub trait Launcher: Send + Sync + fmt::Debug {
    /// Name of this launcher.
    fn name(&self) -> &str;

    /// The argv that starts `job`.
    fn launch_command(&self, job: &Job) -> HalResult<Vec<String>>;

    /// Whether `output` shows that the launcher, rather than the job,
    /// failed.
    fn is_launcher_failure(&self, output: &str) -> bool;

    /// A failure message extracted from `output`.
    fn launcher_failure_message(&self, output: &str) -> String;
}

fn spec_of(job: &Job) -> HalResult<&JobSpec> {
    job.spec()
        .map(|s| s.as_ref())
        .ok_or_else(|| HalError::InvalidJob(format!("Job {} has no spec", job.id())))
}

fn path_arg(path: Option<&std::path::Path>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_default()
}

fn needs_wrapper(spec: &JobSpec) -> bool {
    spec.pre_launch.is_some()
        || spec.post_launch.is_some()
        || spec.stdin_path.is_some()
        || spec.stdout_path.is_some()
        || spec.stderr_path.is_some()
}

/// Bash wrapper body. Positional parameters: pre-launch, post-launch,
/// stdin, stdout, stderr, then the job argv.
fn wrapper_script(launcher: Option<&str>, launch_prefix: &str) -> String {
    let mut script = String::new();
    script.push_str("_pre=\"$1\"; _post=\"$2\"; _in=\"$3\"; _out=\"$4\"; _err=\"$5\"; shift 5\n");
    if let Some(launcher) = launcher {
        script.push_str(&format!(
            "command -v {launcher} >/dev/null 2>&1 || {{ echo \"{launcher}: command not found\"; exit 127; }}\n"
        ));
    }
    script.push_str("if [ -n \"$_pre\" ]; then source \"$_pre\"; fi\n");
    script.push_str("exec 3>&1 4>&2\n");
    script.push_str("if [ -n \"$_in\" ]; then exec 0<\"$_in\"; fi\n");
    script.push_str("if [ -n \"$_out\" ]; then exec 1>>\"$_out\"; fi\n");
    script.push_str("if [ -n \"$_err\" ]; then exec 2>>\"$_err\"; fi\n");
    script.push_str(&format!("{launch_prefix}\"$@\"\n"));
    script.push_str("_ec=$?\n");
    script.push_str("exec 1>&3 2>&4\n");
    script.push_str("if [ -n \"$_post\" ]; then source \"$_post\"; fi\n");
    if launcher.is_some() {
        script.push_str(&format!("echo {LAUNCHER_DONE_MARKER}\n"));
    }
    script.push_str("exit $_ec\n");
    script
}

fn wrapped_command(spec: &JobSpec, executable: &str, launcher: Option<&str>, launch_prefix: &str) -> Vec<String> {
    let mut argv = vec![
        "/bin/bash".to_string(),
        "-c".to_string(),
        wrapper_script(launcher, launch_prefix),
        "psij-launch".to_string(),
        path_arg(spec.pre_launch.as_deref()),
        path_arg(spec.post_launch.as_deref()),
        path_arg(spec.stdin_path.as_deref()),
        path_arg(spec.stdout_path.as_deref()),
        path_arg(spec.stderr_path.as_deref()),
        executable.to_string(),
    ];
    argv.extend(spec.arguments.iter().cloned());
    argv
}

fn marker_present(output: &str) -> bool {
    output.trim_end().lines().last().map(str::trim) == Some(LAUNCHER_DONE_MARKER)
}

fn strip_marker(output: &str) -> String {
    output
        .lines()
        .filter(|line| line.trim() != LAUNCHER_DONE_MARKER)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Runs a single copy of the executable.
#[derive(Debug, Default)]
pub struct SingleLauncher;

impl Launcher for SingleLauncher {
    fn name(&self) -> &str {
        "single"
    }

    fn launch_command(&self, job: &Job) -> HalResult<Vec<String>> {
        let spec = spec_of(job)?;
        let executable = spec.require_executable()?;
        if needs_wrapper(spec) {
            return Ok(wrapped_command(spec, executable, None, ""));
        }
        let mut argv = vec![executable.to_string()];
        argv.extend(spec.arguments.iter().cloned());
        Ok(argv)
    }

    fn is_launcher_failure(&self, _output: &str) -> bool {
        false
    }

    fn launcher_failure_message(&self, output: &str) -> String {
        output.to_string()
    }
}

/// Runs the job through an MPI-style launcher taking `-n <processes>`.
#[derive(Debug)]
pub struct MultipleLauncher {
    name: &'static str,
    command: &'static str,
}

impl MultipleLauncher {
    /// `mpirun -n <processes>`.
    pub fn mpirun() -> Self {
        Self {
            name: "mpirun",
            command: "mpirun",
        }
    }

    /// `srun -n <processes>`.
    pub fn srun() -> Self {
        Self {
            name: "srun",
            command: "srun",
        }
    }
}

impl Launcher for MultipleLauncher {
    fn name(&self) -> &str {
        self.name
    }

    fn launch_command(&self, job: &Job) -> HalResult<Vec<String>> {
        let spec = spec_of(job)?;
        let executable = spec.require_executable()?;
        let processes = match &spec.resources {
            Some(r) => r.computed()?.process_count,
            None => 1,
        };
        let prefix = format!("{} -n {} ", self.command, processes);
        Ok(wrapped_command(spec, executable, Some(self.command), &prefix))
    }

    fn is_launcher_failure(&self, output: &str) -> bool {
        !marker_present(output)
    }

    fn launcher_failure_message(&self, output: &str) -> String {
        strip_marker(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ResourceSpec;

    #[test]
    fn test_single_direct_exec() {
        let job = Job::new(JobSpec::new("/bin/echo", ["a", "b"]));
        let argv = SingleLauncher.launch_command(&job).unwrap();
        assert_eq!(argv, vec!["/bin/echo", "a", "b"]);
        assert!(!SingleLauncher.is_launcher_failure("anything"));
    }

    #[test]
    fn test_single_wraps_redirections() {
        let job = Job::new(JobSpec::new("/bin/echo", ["x"]).with_stdout("/tmp/out.txt"));
        let argv = SingleLauncher.launch_command(&job).unwrap();
        assert_eq!(argv[0], "/bin/bash");
        assert_eq!(argv[7], "/tmp/out.txt");
        assert_eq!(&argv[9..], &["/bin/echo".to_string(), "x".to_string()]);
        assert!(!argv[2].contains(LAUNCHER_DONE_MARKER));
    }

    #[test]
    fn test_mpirun_command() {
        let spec = JobSpec::new("./app", Vec::<String>::new())
            .with_resources(ResourceSpec::default().with_process_count(4));
        let job = Job::new(spec);
        let argv = MultipleLauncher::mpirun().launch_command(&job).unwrap();
        assert!(argv[2].contains("mpirun -n 4 \"$@\""));
        assert!(argv[2].contains(LAUNCHER_DONE_MARKER));
        assert_eq!(argv.last().map(String::as_str), Some("./app"));
    }

    #[test]
    fn test_marker_detection() {
        let l = MultipleLauncher::srun();
        assert!(!l.is_launcher_failure("hello\n_PSIJ_LAUNCHER_DONE\n"));
        assert!(l.is_launcher_failure("srun: command not found\n"));
        assert_eq!(l.launcher_failure_message("oops\n_PSIJ_LAUNCHER_DONE"), "oops");
    }

    #[test]
    fn test_missing_spec() {
        let job = Job::detached();
        assert!(SingleLauncher.launch_command(&job).is_err());
    }
}
