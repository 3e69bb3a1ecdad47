use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgGroup, Parser};
use colored::*;
use tracing_subscriber::filter::EnvFilter;

use ark_test_runner::config::Qemu;
use ark_test_runner::parallel::PoolConfig;
use ark_test_runner::{FileConfig, RunContext, RunReport, RunnerConfig, Statistics, Suite, SuiteKind, Toolchain};

#[derive(Parser, Debug)]
#[command(name = "ark-test-runner")]
#[command(about = "Run regression and conformance tests against the ark toolchain")]
#[command(group(
    ArgGroup::new("suites")
        .required(true)
        .multiple(true)
        .args(["regression", "test262", "compiler", "tsc", "hotfix", "hotreload", "base64"])
))]
struct Args {
    /// Toolchain build directory
    #[arg(value_parser = existing_dir)]
    build_dir: PathBuf,

    /// Run regression tests
    #[arg(short, long)]
    regression: bool,

    /// Run test262 tests
    #[arg(short, long)]
    test262: bool,

    /// Run compiler tests
    #[arg(short, long)]
    compiler: bool,

    /// Run TypeScript conformance tests
    #[arg(long)]
    tsc: bool,

    /// Run hotfix tests
    #[arg(long)]
    hotfix: bool,

    /// Run hotreload tests
    #[arg(long)]
    hotreload: bool,

    /// Run base64 tests
    #[arg(long)]
    base64: bool,

    /// Shell glob applied to test ids
    #[arg(short, long, default_value = "*")]
    filter: String,

    /// Frontend timeout in seconds
    #[arg(long, value_parser = positive_secs)]
    es2panda_timeout: Option<u64>,

    /// AOT compiler timeout in seconds
    #[arg(long, value_parser = positive_secs)]
    paoc_timeout: Option<u64>,

    /// VM timeout in seconds
    #[arg(long, value_parser = positive_secs)]
    timeout: Option<u64>,

    /// Garbage collector type
    #[arg(long)]
    gc_type: Option<String>,

    /// Compile test262 tests ahead of time before running them
    #[arg(long)]
    aot: bool,

    /// Extra argument for ark_aot (repeatable)
    #[arg(long = "aot-args", allow_hyphen_values = true)]
    aot_args: Vec<String>,

    /// Enable the JIT in the VM
    #[arg(long)]
    jit: bool,

    /// Disable the bytecode optimizer
    #[arg(long)]
    no_bco: bool,

    /// Don't pass --run-gc-in-place to the VM
    #[arg(long)]
    no_run_gc_in_place: bool,

    /// Don't use skiplists
    #[arg(long)]
    no_skip: bool,

    /// Rewrite the test262 skiplist from this run's failures
    #[arg(long)]
    update: bool,

    /// Run only the test ids listed in this file
    #[arg(long, value_parser = existing_file)]
    test_list: Option<PathBuf>,

    /// Skip tests failing on aarch64 under AOT or JIT
    #[arg(long)]
    arm64_compiler_skip: bool,

    /// Launch every binary under qemu-aarch64
    #[arg(long, conflicts_with = "arm32_qemu")]
    arm64_qemu: bool,

    /// Launch every binary under qemu-arm
    #[arg(long)]
    arm32_qemu: bool,

    /// Directory containing ark_js_vm
    #[arg(long, value_parser = existing_dir)]
    js_runtime: Option<PathBuf>,

    /// LD_LIBRARY_PATH for ark_js_vm
    #[arg(long, alias = "LD_LIBRARY_PATH")]
    ld_library_path: Option<String>,

    /// Existing TypeScript checkout
    #[arg(long, value_parser = existing_dir)]
    tsc_path: Option<PathBuf>,

    /// Print reproduction steps and errors of failures and write CSV statistics
    #[arg(long)]
    error: bool,

    /// Don't show progress bars
    #[arg(long)]
    no_progress: bool,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Worker threads (defaults to the CPU count)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Directory with regression tests, skiplists and the test262 harness
    #[arg(long, value_parser = existing_dir)]
    test_root: Option<PathBuf>,

    /// Config file (defaults to ark_test_config.toml in the test root)
    #[arg(long, value_parser = existing_file)]
    config: Option<PathBuf>,

    /// Write a JSON report to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Write one JSON line per test result to this file
    #[arg(long)]
    log: Option<PathBuf>,

    /// Exit with 0 even when tests fail
    #[arg(long)]
    exit_zero: bool,
}

fn existing_dir(arg: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(arg);
    if path.is_dir() {
        std::path::absolute(&path).map_err(|e| e.to_string())
    } else {
        Err(format!("The directory '{arg}' does not exist"))
    }
}

fn existing_file(arg: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(arg);
    if path.is_file() {
        std::path::absolute(&path).map_err(|e| e.to_string())
    } else {
        Err(format!("The file '{arg}' does not exist"))
    }
}

fn positive_secs(arg: &str) -> Result<u64, String> {
    match arg.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(format!("{arg} is an invalid timeout value")),
    }
}

impl Args {
    fn suites(&self) -> Vec<SuiteKind> {
        [
            (self.regression, SuiteKind::Regression),
            (self.test262, SuiteKind::Test262),
            (self.tsc, SuiteKind::Tsc),
            (self.compiler, SuiteKind::Compiler),
            (self.hotfix, SuiteKind::Hotfix),
            (self.hotreload, SuiteKind::Hotreload),
            (self.base64, SuiteKind::Base64),
        ]
        .into_iter()
        .filter_map(|(selected, kind)| selected.then_some(kind))
        .collect()
    }

    /// Defaults, then the config file, then command-line flags.
    fn runner_config(&self) -> anyhow::Result<RunnerConfig> {
        let test_root = match &self.test_root {
            Some(root) => root.clone(),
            None => std::env::current_dir().context("cannot determine the test root")?,
        };
        let mut config = RunnerConfig::new(&self.build_dir, &test_root);
        config.aot_args = self.aot_args.clone();
        config.apply_file(FileConfig::load_or_default(self.config.as_deref(), &test_root)?);

        if let Some(secs) = self.es2panda_timeout {
            config.timeouts.frontend = Duration::from_secs(secs);
        }
        if let Some(secs) = self.paoc_timeout {
            config.timeouts.aot = Duration::from_secs(secs);
        }
        if let Some(secs) = self.timeout {
            config.timeouts.runtime = Duration::from_secs(secs);
        }
        if let Some(ref gc_type) = self.gc_type {
            config.gc_type = gc_type.clone();
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs.max(1);
        }

        config.filter = self.filter.clone();
        config.aot = self.aot;
        config.jit = self.jit;
        config.bco = !self.no_bco;
        config.run_gc_in_place = !self.no_run_gc_in_place;
        config.skip = !self.no_skip;
        config.update = self.update;
        config.test_list = self.test_list.clone();
        config.arm64_compiler_skip = self.arm64_compiler_skip;
        config.qemu = if self.arm64_qemu {
            Some(Qemu::Arm64)
        } else if self.arm32_qemu {
            Some(Qemu::Arm32)
        } else {
            None
        };
        config.js_runtime = self.js_runtime.clone();
        config.ld_library_path = self.ld_library_path.clone();
        config.tsc_path = self.tsc_path.clone();
        config.capture_errors = self.error;
        config.progress = !self.no_progress;
        config.verbose = self.verbose;
        config.log_path = self.log.clone();
        config.exit_zero |= self.exit_zero;
        Ok(config)
    }
}

fn prepare_log(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::File::create(path).with_context(|| format!("cannot create log {}", path.display()))?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let directive = if args.verbose { "ark_test_runner=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let config = args.runner_config()?;
    let kinds = args.suites();

    let toolchain = Toolchain::locate(&config)?;

    // Every suite is discovered before anything runs, so a missing binary or
    // failed checkout stops the run up front.
    let suites = kinds
        .iter()
        .map(|&kind| Suite::discover(kind, &config, &toolchain))
        .collect::<Result<Vec<_>, _>>()?;

    std::fs::create_dir_all(&config.tmp_dir)
        .with_context(|| format!("cannot create {}", config.tmp_dir.display()))?;
    if let Some(ref log) = config.log_path {
        prepare_log(log)?;
    }

    let ctx = Arc::new(RunContext {
        toolchain,
        timeouts: config.timeouts,
        aot: config.aot,
        jit: config.jit,
        tmp_dir: config.tmp_dir.clone(),
    });
    let pool = PoolConfig {
        jobs: config.jobs,
        verbose: config.verbose,
        log_path: config.log_path.clone(),
    };

    let mut reports = Vec::with_capacity(suites.len());
    let mut statistics = Statistics::default();

    for suite in &suites {
        println!("{}", format!("Running {} ({} tests)", suite.name(), suite.cases().len()).bold().cyan());
        let results = suite.run(Arc::clone(&ctx), &pool, config.progress);
        suite.finish(&config, &results)?;

        let report = suite.report(&results);
        println!();
        if !config.update {
            report.print_failures(config.capture_errors);
        }
        report.print_summary();

        if config.capture_errors {
            statistics.record(&results);
        }
        reports.push(report);
    }

    if config.capture_errors && statistics.has_failures() {
        statistics.write(&config.statistics_dir)?;
        statistics.print_types();
    }

    let run = RunReport::new(reports);
    if let Some(ref path) = args.report {
        run.write(path)?;
    }

    // Exit with error code if there were failures
    if run.failed() > 0 && !config.exit_zero {
        std::process::exit(1);
    }
    Ok(())
}
