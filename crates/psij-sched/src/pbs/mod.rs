//! PBS (Portable Batch System) integration for HPC job submission.
//!
//! Targets PBS Pro and OpenPBS, whose `qstat` can report finished jobs
//! (`-x`) in JSON (`-F json`).

mod adapter;
mod parser;
mod templates;

pub use adapter::{PbsConfig, PbsExecutor, PbsScheduler};
