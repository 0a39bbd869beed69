//! SLURM integration for HPC job submission.

mod adapter;
mod parser;
mod templates;

pub use adapter::{SlurmConfig, SlurmExecutor, SlurmScheduler};
