//! TaskRun controller.
//!
//! Reconciles TaskRuns: resolves the task and resources a run names, checks
//! them, assembles the step pipeline for its workload, and folds the
//! workload's reported status back into the run.

pub mod assembler;
pub mod client;
pub mod config;
pub mod controller;
pub mod metrics;
pub mod reconciler;
pub mod reducer;
pub mod resolver;
pub mod state;
pub mod templating;
pub mod validation;

pub use assembler::{Assembler, AssemblyError};
pub use client::{ClientError, Clients};
pub use config::Config;
pub use controller::{Controller, WorkQueue};
pub use reconciler::{ReconcileError, Reconciler};
pub use reducer::reduce;
pub use resolver::{ResolutionError, ResolvedTaskRun, Resolver};
pub use state::{InMemoryCluster, Manifest};
pub use validation::ValidationError;
