//! Hello Job Demo
//!
//! Submits one command through a PSI/J executor and prints every status
//! transition until the job finishes.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use psij_demos::{
    create_spinner, describe_status, executor_registry, print_failure, print_header, print_info,
    print_result, print_success, split_command, styled_status,
};
use psij_hal::{ExecutorConfig, Job, JobSpec, JobState};

#[derive(Parser, Debug)]
#[command(name = "demo-hello-job")]
#[command(about = "Run a command through a PSI/J executor")]
struct Args {
    /// Executor name: local, slurm or pbs
    #[arg(short, long, default_value = "local")]
    executor: String,

    /// Executor version constraint, e.g. ">= 0.3"
    #[arg(long)]
    version: Option<String>,

    /// Work directory for submit scripts and auxiliary files
    #[arg(short, long, env = "PSIJ_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Launcher: single, mpirun or srun
    #[arg(short, long)]
    launcher: Option<String>,

    /// Seconds to wait before canceling the job
    #[arg(short, long, default_value = "60")]
    timeout: u64,

    /// List the executor's native job ids instead of submitting
    #[arg(long)]
    list: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Command to run
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let filter = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let registry = executor_registry()?;
    let mut config = ExecutorConfig::from_env();
    if let Some(dir) = &args.work_dir {
        config = config.with_work_directory(dir);
    }
    let executor = registry
        .create(&args.executor, args.version.as_deref(), config)
        .with_context(|| format!("available executors: {:?}", registry.available_executors()))?;

    print_header("PSI/J Hello Job");
    print_result("Executor", format!("{} {}", executor.name(), executor.version()));

    if args.list {
        let ids = executor.list().await?;
        print_result("Jobs", ids.len());
        for id in ids {
            println!("    {id}");
        }
        return Ok(());
    }

    let command = if args.command.is_empty() {
        vec!["/bin/echo".to_string(), "Hello from PSI/J".to_string()]
    } else {
        args.command.clone()
    };
    let (executable, arguments) =
        split_command(command).context("no command given")?;
    print_result("Command", format!("{} {}", executable, arguments.join(" ")));

    let mut spec = JobSpec::new(executable, arguments).with_name("hello-job");
    if let Some(launcher) = &args.launcher {
        spec = spec.with_launcher(launcher);
    }
    let job = Job::new(spec);

    let spinner = create_spinner("Submitting");
    let pb = spinner.clone();
    job.set_status_callback(move |_, status| {
        pb.println(styled_status(status));
        pb.set_message(status.state.to_string());
    });

    executor.submit(&job).await?;
    debug!("Submitted {}", job);
    spinner.println(format!("  native id: {}", job.native_id().unwrap_or("-")));

    let status = job.wait(Some(Duration::from_secs(args.timeout))).await;
    spinner.finish_and_clear();

    match status {
        Some(status) if status.state == JobState::Completed => {
            print_success("Job completed");
        }
        Some(status) => {
            print_failure(&describe_status(&status));
            std::process::exit(1);
        }
        None => {
            print_info(&format!("No result after {}s, canceling", args.timeout));
            job.cancel().await?;
            if let Some(status) = job.wait(Some(Duration::from_secs(10))).await {
                print_info(&describe_status(&status));
            }
            std::process::exit(2);
        }
    }

    Ok(())
}
