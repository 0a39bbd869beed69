//! SLURM batch script templates.

use psij_hal::Job;

use crate::error::SchedResult;
use crate::script::{write_launch_section, ScriptContext};
use crate::slurm::adapter::SlurmConfig;

/// Generate a SLURM batch script for a job.
pub fn generate_batch_script(
    job: &Job,
    ctx: &ScriptContext<'_>,
    config: &SlurmConfig,
) -> SchedResult<String> {
    let spec = ctx.spec;
    let attrs = &spec.attributes;
    let lib = ctx.lib;
    let mut script = String::new();

    // Shebang
    script.push_str("#!/bin/bash\n\n");

    // SLURM directives
    let name = spec.display_name().unwrap_or(job.id());
    script.push_str(&format!("#SBATCH --job-name={}\n", sanitize_name(name)));

    if let Some(dir) = &spec.directory {
        script.push_str(&format!(
            "#SBATCH --chdir={}\n",
            lib.bash_escape(&dir.display().to_string())
        ));
    }

    if let Some(resources) = &spec.resources {
        let computed = resources.computed()?;
        if resources.exclusive_node_use {
            script.push_str("#SBATCH --exclusive\n");
        }
        script.push_str(&format!("#SBATCH --nodes={}\n", computed.node_count));
        script.push_str(&format!("#SBATCH --ntasks={}\n", computed.process_count));
        script.push_str(&format!(
            "#SBATCH --ntasks-per-node={}\n",
            computed.processes_per_node
        ));
        if let Some(cpus) = resources.cpu_cores_per_process {
            script.push_str(&format!("#SBATCH --cpus-per-task={}\n", cpus));
        }
        if let Some(gpus) = resources.gpu_cores_per_process {
            script.push_str(&format!("#SBATCH --gpus-per-task={}\n", gpus));
        }
    }

    if let Some(partition) = attrs.queue_name.as_ref().or(config.default_partition.as_ref()) {
        script.push_str(&format!("#SBATCH --partition={}\n", partition));
    }
    if let Some(account) = attrs.project_name.as_ref().or(config.default_account.as_ref()) {
        script.push_str(&format!("#SBATCH --account={}\n", account));
    }
    if let Some(reservation) = &attrs.reservation_id {
        script.push_str(&format!("#SBATCH --reservation={}\n", reservation));
    }

    script.push_str(&format!(
        "#SBATCH --time={}\n",
        lib.format_duration(attrs.duration)
    ));

    for (key, value) in ctx.custom_attributes("slurm") {
        script.push_str(&format!("#SBATCH --{}=\"{}\"\n", key, value));
    }
    for directive in &config.extra_directives {
        script.push_str(&format!("#SBATCH {}\n", directive));
    }

    if spec.inherit_environment {
        script.push_str("#SBATCH --export=ALL\n");
    } else {
        script.push_str("#SBATCH --export=NONE\n");
    }

    // Job output goes to <native id>.out via the launch section
    script.push_str("#SBATCH --output=/dev/null\n");
    script.push_str("#SBATCH --error=/dev/null\n");

    if !config.modules.is_empty() {
        script.push_str("\n# Load modules\n");
        for module in &config.modules {
            script.push_str(&format!("module load {}\n", module));
        }
    }

    script.push('\n');
    let mut tail = Vec::new();
    write_launch_section(ctx, "SLURM_JOB_ID", &mut tail)?;
    script.push_str(&String::from_utf8_lossy(&tail));

    Ok(script)
}

/// Sanitize a job name for SLURM.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(64) // SLURM has a 64 character limit for job names
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionLibrary;
    use psij_hal::{JobAttributes, JobSpec, ResourceSpec};
    use std::path::Path;
    use std::time::Duration;

    fn render(spec: JobSpec, config: &SlurmConfig) -> String {
        let job = Job::new(spec.clone());
        let lib = FunctionLibrary;
        let ctx = ScriptContext::new(
            &job,
            &spec,
            &lib,
            vec!["/bin/date".into()],
            Path::new("/work/slurm"),
        );
        generate_batch_script(&job, &ctx, config).unwrap()
    }

    #[test]
    fn test_generate_batch_script() {
        let spec = JobSpec::new("/bin/date", Vec::<String>::new())
            .with_name("my job")
            .with_directory("/scratch/run")
            .with_resources(ResourceSpec::default().with_node_count(2).with_processes_per_node(4))
            .with_attributes(
                JobAttributes::default()
                    .with_duration(Duration::from_secs(90 * 60))
                    .with_queue("debug")
                    .with_project("proj42")
                    .with_custom("slurm.constraint", "gpu"),
            );
        let config = SlurmConfig {
            modules: vec!["openmpi".into()],
            ..Default::default()
        };
        let script = render(spec, &config);

        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("#SBATCH --job-name=my_job\n"));
        assert!(script.contains("#SBATCH --chdir=/scratch/run\n"));
        assert!(script.contains("#SBATCH --exclusive\n"));
        assert!(script.contains("#SBATCH --nodes=2\n"));
        assert!(script.contains("#SBATCH --ntasks=8\n"));
        assert!(script.contains("#SBATCH --ntasks-per-node=4\n"));
        assert!(script.contains("#SBATCH --partition=debug\n"));
        assert!(script.contains("#SBATCH --account=proj42\n"));
        assert!(script.contains("#SBATCH --time=01:30:00\n"));
        assert!(script.contains("#SBATCH --constraint=\"gpu\"\n"));
        assert!(script.contains("#SBATCH --export=ALL\n"));
        assert!(script.contains("module load openmpi\n"));
        assert!(script.contains("exec &>> /work/slurm/\"${SLURM_JOB_ID}.out\"\n"));
        assert!(script.contains("/bin/date\necho \"$?\" > /work/slurm/\"${SLURM_JOB_ID}.ec\"\n"));
    }

    #[test]
    fn test_config_defaults_used_when_job_is_silent() {
        let spec = JobSpec::new("/bin/date", Vec::<String>::new())
            .with_inherit_environment(false);
        let config = SlurmConfig {
            default_partition: Some("batch".into()),
            default_account: Some("acct".into()),
            ..Default::default()
        };
        let script = render(spec, &config);
        assert!(script.contains("#SBATCH --partition=batch\n"));
        assert!(script.contains("#SBATCH --account=acct\n"));
        assert!(script.contains("#SBATCH --export=NONE\n"));
        assert!(!script.contains("--nodes"));
        assert!(script.contains("#SBATCH --time=00:10:00\n"));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("simple"), "simple");
        assert_eq!(sanitize_name("with spaces"), "with_spaces");
        assert_eq!(sanitize_name("special!@#chars"), "special___chars");
        assert_eq!(sanitize_name(&"a".repeat(100)).len(), 64);
    }
}
