//! PBS batch script templates.

use psij_hal::Job;

use crate::error::SchedResult;
use crate::pbs::adapter::PbsConfig;
use crate::script::{write_launch_section, ScriptContext};

/// Generate a PBS batch script for a job.
pub fn generate_pbs_script(
    job: &Job,
    ctx: &ScriptContext<'_>,
    config: &PbsConfig,
) -> SchedResult<String> {
    let spec = ctx.spec;
    let attrs = &spec.attributes;
    let mut script = String::new();

    // Shebang
    script.push_str("#!/bin/bash\n\n");

    // PBS directives
    let name = spec.display_name().unwrap_or(job.id());
    script.push_str(&format!("#PBS -N {}\n", sanitize_name(name)));

    if let Some(resources) = &spec.resources {
        let computed = resources.computed()?;
        let mut select = format!("select={}", computed.node_count);
        if let Some(cpus) = resources.cpu_cores_per_process {
            select.push_str(&format!(":ncpus={}", cpus * computed.processes_per_node));
        }
        if let Some(gpus) = resources.gpu_cores_per_process {
            select.push_str(&format!(":ngpus={}", gpus * computed.processes_per_node));
        }
        select.push_str(&format!(":mpiprocs={}", computed.processes_per_node));
        script.push_str(&format!("#PBS -l {}\n", select));
        if resources.exclusive_node_use {
            script.push_str("#PBS -l place=scatter:excl\n");
        } else {
            script.push_str("#PBS -l place=scatter\n");
        }
    }

    // Queue selection
    if let Some(queue) = attrs.queue_name.as_ref().or(config.default_queue.as_ref()) {
        script.push_str(&format!("#PBS -q {}\n", queue));
    }

    // Account if specified
    if let Some(account) = attrs.project_name.as_ref().or(config.default_account.as_ref()) {
        script.push_str(&format!("#PBS -A {}\n", account));
    }

    script.push_str(&format!(
        "#PBS -l walltime={}\n",
        ctx.lib.format_duration(attrs.duration)
    ));

    for (key, value) in ctx.custom_attributes("pbs") {
        script.push_str(&format!("#PBS -l {}={}\n", key, value));
    }

    // Export current environment
    if spec.inherit_environment {
        script.push_str("#PBS -V\n");
    }

    // Job output goes to <native id>.out via the launch section
    script.push_str("#PBS -o /dev/null\n");
    script.push_str("#PBS -e /dev/null\n");

    if !config.modules.is_empty() {
        script.push_str("\n# Load modules\n");
        for module in &config.modules {
            script.push_str(&format!("module load {}\n", module));
        }
    }

    // PBS starts jobs in $HOME
    if spec.directory.is_none() {
        script.push_str("cd \"$PBS_O_WORKDIR\"\n");
    }

    script.push('\n');
    let mut tail = Vec::new();
    write_launch_section(ctx, "PBS_JOBID", &mut tail)?;
    script.push_str(&String::from_utf8_lossy(&tail));

    Ok(script)
}

/// Sanitize a job name for PBS (max 15 characters, must start with a letter).
fn sanitize_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(15)
        .collect();

    if sanitized.starts_with(|c: char| c.is_ascii_alphabetic()) {
        sanitized
    } else {
        format!("j{}", sanitized.chars().take(14).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionLibrary;
    use psij_hal::{JobAttributes, JobSpec, ResourceSpec};
    use std::path::Path;

    fn render(spec: JobSpec) -> String {
        let job = Job::new(spec.clone());
        let lib = FunctionLibrary;
        let ctx = ScriptContext::new(
            &job,
            &spec,
            &lib,
            vec!["/bin/hostname".into()],
            Path::new("/work/pbs"),
        );
        generate_pbs_script(&job, &ctx, &PbsConfig::default()).unwrap()
    }

    #[test]
    fn test_generate_pbs_script() {
        let spec = JobSpec::new("/bin/hostname", Vec::<String>::new())
            .with_name("sim")
            .with_resources(
                ResourceSpec::default()
                    .with_process_count(8)
                    .with_processes_per_node(4)
                    .with_cpu_cores_per_process(2),
            )
            .with_attributes(
                JobAttributes::default()
                    .with_queue("workq")
                    .with_project("proj")
                    .with_custom("pbs.mem", "8gb"),
            );
        let script = render(spec);

        assert!(script.contains("#PBS -N sim\n"));
        assert!(script.contains("#PBS -l select=2:ncpus=8:mpiprocs=4\n"));
        assert!(script.contains("#PBS -l place=scatter:excl\n"));
        assert!(script.contains("#PBS -q workq\n"));
        assert!(script.contains("#PBS -A proj\n"));
        assert!(script.contains("#PBS -l walltime=00:10:00\n"));
        assert!(script.contains("#PBS -l mem=8gb\n"));
        assert!(script.contains("#PBS -V\n"));
        assert!(script.contains("cd \"$PBS_O_WORKDIR\"\n"));
        assert!(script.contains("exec &>> /work/pbs/\"${PBS_JOBID}.out\"\n"));
    }

    #[test]
    fn test_no_environment_export() {
        let spec = JobSpec::new("/bin/hostname", Vec::<String>::new())
            .with_inherit_environment(false)
            .with_directory("/data");
        let script = render(spec);
        assert!(!script.contains("#PBS -V"));
        assert!(!script.contains("PBS_O_WORKDIR"));
        assert!(script.contains("cd /data\n"));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("simple"), "simple");
        assert_eq!(sanitize_name("a very long job name"), "a_very_long_job");
        assert_eq!(sanitize_name("123job"), "j123job");
    }
}
