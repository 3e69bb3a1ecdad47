//! Test cases and their results.
//!
//! A [`TestCase`] is immutable. Running it produces a [`TestResult`] value
//! carrying the case id, which the coordinator uses to merge results coming
//! back from workers in completion order.

mod patch;
mod regression;
mod test262;

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::Timeouts;
use crate::process::{Invocation, StageOutcome, ToolEnv, ToolOutput};
use crate::toolchain::Toolchain;

pub use patch::{Base64Input, PatchMode};
pub(crate) use patch::is_patch_artifact;

/// Which stage, and how, a test failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailKind {
    FrontendFail,
    RuntimeFail,
    AotFail,
    FrontendTimeout,
    RuntimeTimeout,
    AotTimeout,
}

impl FailKind {
    pub const ALL: [FailKind; 6] = [
        FailKind::FrontendFail,
        FailKind::RuntimeFail,
        FailKind::AotFail,
        FailKind::FrontendTimeout,
        FailKind::RuntimeTimeout,
        FailKind::AotTimeout,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FailKind::FrontendFail => "FRONTEND_FAIL",
            FailKind::RuntimeFail => "RUNTIME_FAIL",
            FailKind::AotFail => "AOT_FAIL",
            FailKind::FrontendTimeout => "FRONTEND_TIMEOUT",
            FailKind::RuntimeTimeout => "RUNTIME_TIMEOUT",
            FailKind::AotTimeout => "AOT_TIMEOUT",
        }
    }

    pub fn is_timeout(self) -> bool {
        matches!(
            self,
            FailKind::FrontendTimeout | FailKind::RuntimeTimeout | FailKind::AotTimeout
        )
    }

    /// Timeout kind for a failing stage kind.
    pub fn timeout(self) -> FailKind {
        match self {
            FailKind::FrontendFail | FailKind::FrontendTimeout => FailKind::FrontendTimeout,
            FailKind::RuntimeFail | FailKind::RuntimeTimeout => FailKind::RuntimeTimeout,
            FailKind::AotFail | FailKind::AotTimeout => FailKind::AotTimeout,
        }
    }
}

impl std::fmt::Display for FailKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Terminal state of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed(FailKind),
    Skipped,
}

/// Result of running a single test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// Stable id, the path relative to the suite root
    pub id: String,
    pub path: PathBuf,
    pub status: TestStatus,
    /// Captured output of the last stage that ran
    pub output: String,
    /// Failure details
    pub error: Option<String>,
    /// Command lines, in execution order
    pub reproduce: Vec<String>,
    pub duration_ms: u64,
}

/// Error text reported for failures that left nothing on stderr.
pub const SEGFAULT_MESSAGE: &str = "Segmentation fault";

impl TestResult {
    pub fn passed(&self) -> bool {
        self.status == TestStatus::Passed
    }

    pub fn failed(&self) -> bool {
        matches!(self.status, TestStatus::Failed(_))
    }

    pub fn skipped(&self) -> bool {
        self.status == TestStatus::Skipped
    }

    pub fn fail_kind(&self) -> Option<FailKind> {
        match self.status {
            TestStatus::Failed(kind) => Some(kind),
            _ => None,
        }
    }

    /// Failure text, with the segfault placeholder when nothing was captured.
    pub fn error_text(&self) -> &str {
        match self.error.as_deref() {
            Some(err) if !err.trim().is_empty() => err,
            _ => SEGFAULT_MESSAGE,
        }
    }

    /// Coarse error category used for statistics: the message up to the
    /// first `[`, which strips source positions.
    pub fn error_class(&self) -> String {
        if self.id.contains("hotfix") {
            return "hotfix throw error failed".to_string();
        }
        let text = self.error_text();
        text.split('[').next().unwrap_or(text).trim().to_string()
    }

    /// Failure for a case whose runner code panicked or never reported.
    pub fn internal_failure(case: &TestCase, error: String) -> Self {
        Self {
            id: case.id.clone(),
            path: case.path.clone(),
            status: TestStatus::Failed(FailKind::FrontendFail),
            output: String::new(),
            error: Some(error),
            reproduce: Vec::new(),
            duration_ms: 0,
        }
    }
}

/// Suite-specific behavior of a case
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseKind {
    /// `--dump-ast` output compared against `<stem>-expected.txt`
    Regression,
    /// Three-stage conformance pipeline
    Test262 {
        /// Pass `--opt-level=2` to the frontend
        optimize: bool,
    },
    /// Parse-only TypeScript conformance
    Tsc { module: bool },
    /// Compile, then run on `ark_js_vm`, compared against expected output
    Compiler,
    /// Hotfix/hotreload patch generation
    Patch(PatchMode),
    /// Base64 output mode
    Base64(Base64Input),
}

/// A unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub id: String,
    pub path: PathBuf,
    /// Extra frontend flags
    pub flags: Vec<String>,
    pub kind: CaseKind,
}

/// Read-only state every worker runs against
#[derive(Debug, Clone)]
pub struct RunContext {
    pub toolchain: Toolchain,
    pub timeouts: Timeouts,
    pub aot: bool,
    pub jit: bool,
    /// Scratch directory for test262 artifacts
    pub tmp_dir: PathBuf,
}

impl TestCase {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>, flags: Vec<String>, kind: CaseKind) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            flags,
            kind,
        }
    }

    /// Run the case to a terminal state.
    pub async fn run(&self, ctx: &RunContext) -> TestResult {
        let attempt = Attempt::new(self);
        match &self.kind {
            CaseKind::Regression => regression::run_regression(self, ctx, attempt).await,
            CaseKind::Test262 { optimize } => test262::run(self, *optimize, ctx, attempt).await,
            CaseKind::Tsc { module } => regression::run_tsc(self, *module, ctx, attempt).await,
            CaseKind::Compiler => regression::run_compiler(self, ctx, attempt).await,
            CaseKind::Patch(mode) => patch::run_patch(self, *mode, ctx, attempt).await,
            CaseKind::Base64(input) => patch::run_base64(self, *input, ctx, attempt).await,
        }
    }

    /// Id without its extension, used to name per-test artifacts.
    pub fn artifact_stem(&self) -> &str {
        Path::new(&self.id)
            .extension()
            .and_then(|ext| self.id.strip_suffix(ext.to_str()?))
            .and_then(|s| s.strip_suffix('.'))
            .unwrap_or(&self.id)
    }
}

/// Bookkeeping for one run of one case
pub(crate) struct Attempt<'a> {
    case: &'a TestCase,
    reproduce: Vec<String>,
    output: String,
    start: Instant,
}

/// A stage that ended the attempt: timeout, or the tool never started
#[derive(Debug)]
pub(crate) struct StageFailure {
    kind: FailKind,
    error: String,
}

impl<'a> Attempt<'a> {
    fn new(case: &'a TestCase) -> Self {
        Self {
            case,
            reproduce: Vec::new(),
            output: String::new(),
            start: Instant::now(),
        }
    }

    /// Run one stage, recording its command line.
    pub(crate) async fn invoke(&mut self, argv: Vec<String>, timeout: Duration, env: &ToolEnv) -> io::Result<StageOutcome> {
        let invocation = Invocation::new(argv, timeout).with_env(env);
        let line = invocation.command_line();
        tracing::debug!(test = %self.case.id, "run: {line}");
        self.reproduce.push(line);
        invocation.run().await
    }

    /// Run one stage; a timeout or spawn error becomes a failure of
    /// `kind` (or its timeout counterpart).
    pub(crate) async fn stage(
        &mut self,
        argv: Vec<String>,
        timeout: Duration,
        env: &ToolEnv,
        kind: FailKind,
    ) -> Result<ToolOutput, StageFailure> {
        match self.invoke(argv, timeout, env).await {
            Ok(StageOutcome::Completed(output)) => Ok(output),
            Ok(StageOutcome::TimedOut) => {
                let kind = kind.timeout();
                Err(StageFailure {
                    kind,
                    error: kind.label().to_string(),
                })
            }
            Err(e) => Err(StageFailure {
                kind,
                error: format!("failed to start: {e}"),
            }),
        }
    }

    pub(crate) fn set_output(&mut self, output: impl Into<String>) {
        self.output = output.into();
    }

    fn finish(self, status: TestStatus, error: Option<String>) -> TestResult {
        TestResult {
            id: self.case.id.clone(),
            path: self.case.path.clone(),
            status,
            output: self.output,
            error,
            reproduce: self.reproduce,
            duration_ms: self.start.elapsed().as_millis() as u64,
        }
    }

    pub(crate) fn pass(self) -> TestResult {
        self.finish(TestStatus::Passed, None)
    }

    pub(crate) fn fail(self, kind: FailKind, error: impl Into<String>) -> TestResult {
        self.finish(TestStatus::Failed(kind), Some(error.into()))
    }

    pub(crate) fn abort(self, failure: StageFailure) -> TestResult {
        self.fail(failure.kind, failure.error)
    }

    pub(crate) fn skip(self) -> TestResult {
        self.finish(TestStatus::Skipped, None)
    }
}

/// Expected-output files in patch and base64 cases start with a 12-line
/// license header.
pub(crate) const LICENSE_LINES: usize = 12;

pub(crate) fn strip_license(text: &str) -> String {
    let body: String = text.split_inclusive('\n').skip(LICENSE_LINES).collect();
    body.trim_start().to_string()
}
