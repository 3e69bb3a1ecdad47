//! # ark test runner
//!
//! Test orchestration for the ark toolchain: the `es2abc` frontend, the
//! `ark` VM, the `ark_aot` compiler and `ark_js_vm`.
//!
//! Suites discover their cases, run each one as a pipeline of external tool
//! invocations with per-stage timeouts on a worker pool, and report
//! skiplist-aware results.

#![warn(clippy::all)]

pub mod case;
pub mod classify;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod parallel;
pub mod process;
pub mod report;
pub mod skiplist;
pub mod suite;
pub mod test262;
pub mod toolchain;
pub mod tsc;

pub use case::{CaseKind, FailKind, RunContext, TestCase, TestResult, TestStatus};
pub use config::{FileConfig, Qemu, RunnerConfig, Timeouts};
pub use descriptor::{NegativePhase, TestDescriptor};
pub use error::{Error, Result};
pub use report::{Report, RunReport, Statistics};
pub use skiplist::{Skiplist, SkiplistUpdate};
pub use suite::{Suite, SuiteKind};
pub use toolchain::Toolchain;
