//! Submit-script context and shared script sections.

use std::io::Write;
use std::path::{Path, PathBuf};

use psij_hal::{Job, JobSpec};

use crate::error::SchedResult;
use crate::functions::FunctionLibrary;

/// Inputs to submit-script generation.
#[derive(Debug)]
pub struct ScriptContext<'a> {
    /// The job being submitted.
    pub job: &'a Job,
    /// The job description.
    pub spec: &'a JobSpec,
    /// Helper functions.
    pub lib: &'a FunctionLibrary,
    /// Command line produced by the job's launcher.
    pub launch_command: Vec<String>,
    /// Directory holding the submit script and auxiliary files.
    pub script_dir: PathBuf,
}

impl<'a> ScriptContext<'a> {
    pub fn new(
        job: &'a Job,
        spec: &'a JobSpec,
        lib: &'a FunctionLibrary,
        launch_command: Vec<String>,
        script_dir: &Path,
    ) -> Self {
        Self {
            job,
            spec,
            lib,
            launch_command,
            script_dir: script_dir.to_path_buf(),
        }
    }

    /// The launch command, escaped and joined for bash.
    pub fn launch_line(&self) -> String {
        self.launch_command
            .iter()
            .map(|a| self.lib.bash_escape(a))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Custom attributes for `scheduler` (`<scheduler>.<key>`) as
    /// `(key, value)` pairs. String values are unquoted.
    pub fn custom_attributes(&self, scheduler: &str) -> Vec<(String, String)> {
        self.spec
            .attributes
            .custom_with_prefix(scheduler)
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.to_string(), value)
            })
            .collect()
    }

    /// Path of an auxiliary file named after the scheduler's job id
    /// variable, e.g. `"/work/slurm/$SLURM_JOB_ID.ec"`.
    pub fn aux_file(&self, job_id_var: &str, suffix: &str) -> String {
        format!(
            "{}/\"${{{}}}{}\"",
            self.lib.bash_escape(&self.script_dir.display().to_string()),
            job_id_var,
            suffix
        )
    }
}

/// Write the common tail of every submit script: environment, working
/// directory, the launch command with its output in `<native id>.out`, and
/// its exit code in `<native id>.ec`.
pub fn write_launch_section(
    ctx: &ScriptContext<'_>,
    job_id_var: &str,
    out: &mut dyn Write,
) -> SchedResult<()> {
    let lib = ctx.lib;
    let mut script = String::new();

    for (name, value) in &ctx.spec.environment {
        script.push_str(&format!("export {}={}\n", name, lib.bash_escape(value)));
    }
    if let Some(dir) = &ctx.spec.directory {
        script.push_str(&format!("cd {}\n", lib.bash_escape(&dir.display().to_string())));
    }
    script.push('\n');
    script.push_str(&format!("exec &>> {}\n", ctx.aux_file(job_id_var, ".out")));
    script.push_str(&ctx.launch_line());
    script.push('\n');
    script.push_str(&format!("echo \"$?\" > {}\n", ctx.aux_file(job_id_var, ".ec")));

    out.write_all(script.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use psij_hal::JobAttributes;

    #[test]
    fn test_launch_line_and_aux_file() {
        let spec = JobSpec::new("/bin/echo", ["hello world"]);
        let job = Job::new(spec.clone());
        let lib = FunctionLibrary;
        let ctx = ScriptContext::new(
            &job,
            &spec,
            &lib,
            vec!["/bin/echo".into(), "hello world".into()],
            Path::new("/work/slurm"),
        );
        assert_eq!(ctx.launch_line(), "/bin/echo 'hello world'");
        assert_eq!(ctx.aux_file("SLURM_JOB_ID", ".ec"), "/work/slurm/\"${SLURM_JOB_ID}.ec\"");
    }

    #[test]
    fn test_custom_attributes() {
        let spec = JobSpec::new("/bin/true", Vec::<String>::new()).with_attributes(
            JobAttributes::default()
                .with_custom("slurm.constraint", "gpu")
                .with_custom("slurm.mem", 4096)
                .with_custom("pbs.place", "scatter"),
        );
        let job = Job::new(spec.clone());
        let lib = FunctionLibrary;
        let ctx = ScriptContext::new(&job, &spec, &lib, Vec::new(), Path::new("/w"));
        let attrs = ctx.custom_attributes("slurm");
        assert_eq!(
            attrs,
            vec![
                ("constraint".to_string(), "gpu".to_string()),
                ("mem".to_string(), "4096".to_string())
            ]
        );
    }

    #[test]
    fn test_launch_section() {
        let spec = JobSpec::new("/bin/true", Vec::<String>::new())
            .with_env("GREETING", "hi there")
            .with_directory("/tmp");
        let job = Job::new(spec.clone());
        let lib = FunctionLibrary;
        let ctx = ScriptContext::new(&job, &spec, &lib, vec!["/bin/true".into()], Path::new("/w"));
        let mut buf = Vec::new();
        write_launch_section(&ctx, "JOBID", &mut buf).unwrap();
        let script = String::from_utf8(buf).unwrap();
        assert!(script.contains("export GREETING='hi there'\n"));
        assert!(script.contains("cd /tmp\n"));
        assert!(script.contains("exec &>> /w/\"${JOBID}.out\"\n"));
        assert!(script.contains("/bin/true\necho \"$?\" > /w/\"${JOBID}.ec\"\n"));
    }
}
