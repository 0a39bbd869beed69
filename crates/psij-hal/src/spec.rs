//! Job descriptions.
//!
//! A [`JobSpec`] describes *what* to run: the executable, its arguments and
//! environment, where its standard streams go, which resources it needs and
//! how long it may run. It carries no runtime state and may be shared by
//! several jobs.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HalError, HalResult};

/// Default job walltime.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(10 * 60);

/// Description of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Job name. Falls back to the executable when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The executable, such as `/bin/date`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,
    /// Arguments, excluding `argv[0]`.
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Working directory on the compute side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    /// Extra environment variables.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Whether the job inherits the submitting environment.
    #[serde(default = "default_true")]
    pub inherit_environment: bool,
    /// File fed to standard input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin_path: Option<PathBuf>,
    /// File receiving standard output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_path: Option<PathBuf>,
    /// File receiving standard error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_path: Option<PathBuf>,
    /// Script sourced before the launcher runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_launch: Option<PathBuf>,
    /// Script sourced after all ranks complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_launch: Option<PathBuf>,
    /// Launcher name (`single`, `mpirun`, `srun`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launcher: Option<String>,
    /// Resource requirements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSpec>,
    /// Ancillary attributes.
    #[serde(default)]
    pub attributes: JobAttributes,
}

fn default_true() -> bool {
    true
}

impl Default for JobSpec {
    fn default() -> Self {
        Self {
            name: None,
            executable: None,
            arguments: Vec::new(),
            directory: None,
            environment: BTreeMap::new(),
            inherit_environment: true,
            stdin_path: None,
            stdout_path: None,
            stderr_path: None,
            pre_launch: None,
            post_launch: None,
            launcher: None,
            resources: None,
            attributes: JobAttributes::default(),
        }
    }
}

impl JobSpec {
    /// A spec running `executable` with `arguments`.
    pub fn new<I, S>(executable: impl Into<String>, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            executable: Some(executable.into()),
            arguments: arguments.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// The job name, or the executable if no name was given.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.executable.as_deref())
    }

    /// The executable, or `InvalidJob` if unset.
    pub fn require_executable(&self) -> HalResult<&str> {
        self.executable
            .as_deref()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| HalError::InvalidJob("Missing executable".into()))
    }

    /// Check that the spec can be submitted.
    pub fn validate(&self) -> HalResult<()> {
        self.require_executable()?;
        if let Some(resources) = &self.resources {
            resources.validate()?;
        }
        Ok(())
    }

    /// Set the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the working directory.
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Set whether the submitting environment is inherited.
    pub fn with_inherit_environment(mut self, inherit: bool) -> Self {
        self.inherit_environment = inherit;
        self
    }

    /// Set the standard input file.
    pub fn with_stdin(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin_path = Some(path.into());
        self
    }

    /// Set the standard output file.
    pub fn with_stdout(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_path = Some(path.into());
        self
    }

    /// Set the standard error file.
    pub fn with_stderr(mut self, path: impl Into<PathBuf>) -> Self {
        self.stderr_path = Some(path.into());
        self
    }

    /// Set the pre-launch script.
    pub fn with_pre_launch(mut self, path: impl Into<PathBuf>) -> Self {
        self.pre_launch = Some(path.into());
        self
    }

    /// Set the post-launch script.
    pub fn with_post_launch(mut self, path: impl Into<PathBuf>) -> Self {
        self.post_launch = Some(path.into());
        self
    }

    /// Set the launcher.
    pub fn with_launcher(mut self, launcher: impl Into<String>) -> Self {
        self.launcher = Some(launcher.into());
        self
    }

    /// Set the resource requirements.
    pub fn with_resources(mut self, resources: ResourceSpec) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Set the attributes.
    pub fn with_attributes(mut self, attributes: JobAttributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Ancillary job information: walltime, queue, billing project, etc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAttributes {
    /// Walltime.
    #[serde(default = "default_duration")]
    pub duration: Duration,
    /// Queue (partition) name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,
    /// Project (account) billed for the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    /// Advance reservation to run in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<String>,
    /// Executor-specific attributes, such as `slurm.constraint`.
    #[serde(default)]
    pub custom_attributes: BTreeMap<String, serde_json::Value>,
}

fn default_duration() -> Duration {
    DEFAULT_DURATION
}

impl Default for JobAttributes {
    fn default() -> Self {
        Self {
            duration: DEFAULT_DURATION,
            queue_name: None,
            project_name: None,
            reservation_id: None,
            custom_attributes: BTreeMap::new(),
        }
    }
}

impl JobAttributes {
    /// Set the walltime.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the queue.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue_name = Some(queue.into());
        self
    }

    /// Set the project.
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project_name = Some(project.into());
        self
    }

    /// Set the reservation.
    pub fn with_reservation(mut self, reservation: impl Into<String>) -> Self {
        self.reservation_id = Some(reservation.into());
        self
    }

    /// Set a custom attribute.
    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.custom_attributes.insert(key.into(), value.into());
        self
    }

    /// Get a custom attribute.
    pub fn custom(&self, key: &str) -> Option<&serde_json::Value> {
        self.custom_attributes.get(key)
    }

    /// Custom attributes whose key starts with `<prefix>.`, with the prefix
    /// stripped.
    pub fn custom_with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a serde_json::Value)> + 'a {
        self.custom_attributes.iter().filter_map(move |(k, v)| {
            k.strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('.'))
                .map(|rest| (rest, v))
        })
    }
}

/// Resource requirements.
///
/// `process_count = node_count * processes_per_node`. Any two of the three
/// determine the third; specifying all three inconsistently is an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processes_per_node: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores_per_process: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_cores_per_process: Option<u32>,
    #[serde(default = "default_true")]
    pub exclusive_node_use: bool,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            node_count: None,
            process_count: None,
            processes_per_node: None,
            cpu_cores_per_process: None,
            gpu_cores_per_process: None,
            exclusive_node_use: true,
        }
    }
}

/// Node, process and per-node counts after inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputedResources {
    pub node_count: u32,
    pub process_count: u32,
    pub processes_per_node: u32,
}

impl ResourceSpec {
    /// Set the node count.
    pub fn with_node_count(mut self, n: u32) -> Self {
        self.node_count = Some(n);
        self
    }

    /// Set the process count.
    pub fn with_process_count(mut self, n: u32) -> Self {
        self.process_count = Some(n);
        self
    }

    /// Set the processes per node.
    pub fn with_processes_per_node(mut self, n: u32) -> Self {
        self.processes_per_node = Some(n);
        self
    }

    /// Set the CPU cores per process.
    pub fn with_cpu_cores_per_process(mut self, n: u32) -> Self {
        self.cpu_cores_per_process = Some(n);
        self
    }

    /// Set the GPU cores per process.
    pub fn with_gpu_cores_per_process(mut self, n: u32) -> Self {
        self.gpu_cores_per_process = Some(n);
        self
    }

    /// Set exclusive node use.
    pub fn with_exclusive_node_use(mut self, exclusive: bool) -> Self {
        self.exclusive_node_use = exclusive;
        self
    }

    /// Check the count constraint.
    pub fn validate(&self) -> HalResult<()> {
        self.computed().map(|_| ())
    }

    /// Infer the missing counts.
    pub fn computed(&self) -> HalResult<ComputedResources> {
        for (name, value) in [
            ("node_count", self.node_count),
            ("process_count", self.process_count),
            ("processes_per_node", self.processes_per_node),
        ] {
            if value == Some(0) {
                return Err(HalError::InvalidJob(format!("{name} must be positive")));
            }
        }

        let (nodes, procs, ppn) = match (self.node_count, self.process_count, self.processes_per_node) {
            (None, None, None) => (1, 1, 1),
            (None, Some(p), None) => (1, p, p),
            (Some(n), None, None) => (n, n, 1),
            (None, None, Some(ppn)) => (1, ppn, ppn),
            (Some(n), None, Some(ppn)) => (n, n * ppn, ppn),
            (None, Some(p), Some(ppn)) => {
                if p % ppn != 0 {
                    return Err(HalError::InvalidJob(format!(
                        "The process_count ({p}) must be an integral multiple of processes_per_node ({ppn})"
                    )));
                }
                (p / ppn, p, ppn)
            }
            (Some(n), Some(p), None) => {
                if p % n != 0 {
                    return Err(HalError::InvalidJob(format!(
                        "The process_count ({p}) must be an integral multiple of node_count ({n})"
                    )));
                }
                (n, p, p / n)
            }
            (Some(n), Some(p), Some(ppn)) => {
                if p != n * ppn {
                    return Err(HalError::InvalidJob(format!(
                        "The resources must satisfy the constraint process_count ({p}) = \
                         node_count ({n}) * processes_per_node ({ppn})"
                    )));
                }
                (n, p, ppn)
            }
        };

        Ok(ComputedResources {
            node_count: nodes,
            process_count: procs,
            processes_per_node: ppn,
        })
    }
}
