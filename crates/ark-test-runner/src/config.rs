//! Runner configuration
//!
//! [`FileConfig`] is the optional TOML file; [`RunnerConfig`] is the fully
//! resolved settings object handed to every suite. Command-line flags are
//! folded into `RunnerConfig` by the binary and win over file values.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Default config file name, looked up in the test root.
pub const CONFIG_FILE_NAME: &str = "ark_test_config.toml";

/// test262 commit the skiplists are maintained against.
pub const DEFAULT_TEST262_REVISION: &str = "281eb10b2844929a7c0ac04527f5b42ce56509fd";

/// TypeScript tag providing the TSC conformance cases.
pub const DEFAULT_TSC_BRANCH: &str = "v4.2.4";

pub const DEFAULT_GC_TYPE: &str = "g1-gc";

/// Optional settings loaded from TOML
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Frontend timeout in seconds
    pub es2panda_timeout_secs: Option<u64>,
    /// AOT compiler timeout in seconds
    pub paoc_timeout_secs: Option<u64>,
    /// VM timeout in seconds
    pub timeout_secs: Option<u64>,
    /// Garbage collector passed to the VM and AOT compiler
    pub gc_type: Option<String>,
    /// Extra `ark_aot` arguments, prepended to the command-line ones
    pub aot_args: Vec<String>,
    /// Worker count
    pub jobs: Option<usize>,
    /// Pinned test262 commit
    pub test262_revision: Option<String>,
    /// Existing test262 checkout to use instead of cloning
    pub test262_path: Option<PathBuf>,
    /// Harness prelude template
    pub test262_harness: Option<PathBuf>,
    /// Pinned TypeScript tag
    pub tsc_branch: Option<String>,
    /// Scratch directory for compiled test262 artifacts
    pub tmp_dir: Option<PathBuf>,
    /// Directory for the CSV statistics
    pub statistics_dir: Option<PathBuf>,
    /// Keep the legacy behavior of exiting 0 even when tests fail
    pub exit_zero: bool,
}

impl FileConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load an explicit file, or the default one in `test_root` if present.
    pub fn load_or_default(path: Option<&Path>, test_root: &Path) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let default_path = test_root.join(CONFIG_FILE_NAME);
        if default_path.exists() {
            Self::load(&default_path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Per-stage wall-clock limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub frontend: Duration,
    pub aot: Duration,
    pub runtime: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            frontend: Duration::from_secs(60),
            aot: Duration::from_secs(600),
            runtime: Duration::from_secs(10),
        }
    }
}

/// Emulator wrapping every toolchain call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qemu {
    Arm64,
    Arm32,
}

impl Qemu {
    pub fn command_prefix(self) -> Vec<String> {
        let prefix: [&str; 3] = match self {
            Qemu::Arm64 => ["qemu-aarch64", "-L", "/usr/aarch64-linux-gnu/"],
            Qemu::Arm32 => ["qemu-arm", "-L", "/usr/arm-linux-gnueabi"],
        };
        prefix.iter().map(|s| s.to_string()).collect()
    }
}

/// Resolved settings shared by all suites
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Toolchain build directory
    pub build_dir: PathBuf,
    /// Directory holding the regression tests, skiplists and harness
    pub test_root: PathBuf,
    /// Shell glob applied to test paths
    pub filter: String,
    pub timeouts: Timeouts,
    pub gc_type: String,
    pub aot: bool,
    pub aot_args: Vec<String>,
    pub jit: bool,
    /// Bytecode optimizer (`--opt-level=2`) for test262
    pub bco: bool,
    pub run_gc_in_place: bool,
    /// Apply skiplists
    pub skip: bool,
    /// Rewrite the test262 skiplist from this run's failures
    pub update: bool,
    /// Only run ids listed in this file
    pub test_list: Option<PathBuf>,
    pub arm64_compiler_skip: bool,
    pub qemu: Option<Qemu>,
    /// Directory containing `ark_js_vm`
    pub js_runtime: Option<PathBuf>,
    pub ld_library_path: Option<String>,
    /// Existing TypeScript checkout
    pub tsc_path: Option<PathBuf>,
    pub tsc_branch: String,
    pub test262_revision: String,
    pub test262_path: Option<PathBuf>,
    pub test262_harness: PathBuf,
    pub tmp_dir: PathBuf,
    /// Print reproduction steps and errors, write CSV statistics, keep
    /// patch artifacts
    pub capture_errors: bool,
    pub statistics_dir: PathBuf,
    pub progress: bool,
    pub verbose: bool,
    pub jobs: usize,
    /// JSONL result log
    pub log_path: Option<PathBuf>,
    pub exit_zero: bool,
}

impl RunnerConfig {
    /// Defaults for a build directory and test root.
    pub fn new(build_dir: impl Into<PathBuf>, test_root: impl Into<PathBuf>) -> Self {
        let test_root = test_root.into();
        Self {
            build_dir: build_dir.into(),
            test262_harness: test_root.join("test262harness.js"),
            test_root,
            filter: "*".to_string(),
            timeouts: Timeouts::default(),
            gc_type: DEFAULT_GC_TYPE.to_string(),
            aot: false,
            aot_args: Vec::new(),
            jit: false,
            bco: true,
            run_gc_in_place: true,
            skip: true,
            update: false,
            test_list: None,
            arm64_compiler_skip: false,
            qemu: None,
            js_runtime: None,
            ld_library_path: None,
            tsc_path: None,
            tsc_branch: DEFAULT_TSC_BRANCH.to_string(),
            test262_revision: DEFAULT_TEST262_REVISION.to_string(),
            test262_path: None,
            tmp_dir: std::env::temp_dir().join("panda").join("test262"),
            capture_errors: false,
            statistics_dir: PathBuf::from("."),
            progress: true,
            verbose: false,
            jobs: num_cpus::get(),
            log_path: None,
            exit_zero: false,
        }
    }

    /// Overlay values from a config file.
    pub fn apply_file(&mut self, file: FileConfig) {
        if let Some(secs) = file.es2panda_timeout_secs {
            self.timeouts.frontend = Duration::from_secs(secs);
        }
        if let Some(secs) = file.paoc_timeout_secs {
            self.timeouts.aot = Duration::from_secs(secs);
        }
        if let Some(secs) = file.timeout_secs {
            self.timeouts.runtime = Duration::from_secs(secs);
        }
        if let Some(gc_type) = file.gc_type {
            self.gc_type = gc_type;
        }
        if !file.aot_args.is_empty() {
            let mut aot_args = file.aot_args;
            aot_args.append(&mut self.aot_args);
            self.aot_args = aot_args;
        }
        if let Some(jobs) = file.jobs {
            self.jobs = jobs.max(1);
        }
        if let Some(revision) = file.test262_revision {
            self.test262_revision = revision;
        }
        if file.test262_path.is_some() {
            self.test262_path = file.test262_path;
        }
        if let Some(harness) = file.test262_harness {
            self.test262_harness = harness;
        }
        if let Some(branch) = file.tsc_branch {
            self.tsc_branch = branch;
        }
        if let Some(tmp_dir) = file.tmp_dir {
            self.tmp_dir = tmp_dir;
        }
        if let Some(dir) = file.statistics_dir {
            self.statistics_dir = dir;
        }
        self.exit_zero |= file.exit_zero;
    }

    /// Skiplists are ignored entirely while regenerating them.
    pub fn skiplists_enabled(&self) -> bool {
        self.skip && !self.update
    }
}
