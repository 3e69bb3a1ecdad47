//! Test suites: discovery, filtering, execution and post-run bookkeeping.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use glob::Pattern;
use walkdir::WalkDir;

use crate::case::{Base64Input, CaseKind, PatchMode, RunContext, TestCase, TestResult};
use crate::config::RunnerConfig;
use crate::error::{ConfigError, Error, PrepareError, Result};
use crate::parallel::{PoolConfig, progress_bar, run_parallel};
use crate::report::Report;
use crate::skiplist::{Skiplist, SkiplistUpdate};
use crate::toolchain::Toolchain;
use crate::tsc::{self, TscOptions};

/// Skiplist of tests known to fail, rewritten by `--update`.
pub const TEST262_SKIPLIST: &str = "test262skiplist.txt";
/// Tests too slow to run routinely.
pub const TEST262_SKIPLIST_LONG: &str = "test262skiplist-long.txt";
/// Tests with nondeterministic outcomes.
pub const TEST262_SKIPLIST_FLAKY: &str = "test262skiplist-flaky.txt";
/// Tests compiled without the bytecode optimizer.
pub const TEST262_SKIPLIST_BCO: &str = "test262skiplist-bco.txt";
/// Tests failing on aarch64 under AOT or JIT.
pub const TEST262_SKIPLIST_ARM64: &str = "test262skiplist-compiler-arm64.txt";

/// Regression directories and the frontend flags each is run with.
const REGRESSION_DIRS: &[(&str, &str, &[&str])] = &[
    ("parser/concurrent", "js", &["--module"]),
    ("parser/js", "js", &["--parse-only"]),
    ("parser/ts", "ts", &["--parse-only", "--module", "--extension=ts"]),
    (
        "parser/ts/type_checker",
        "ts",
        &["--parse-only", "--enable-type-check", "--module", "--extension=ts"],
    ),
    ("parser/commonjs", "js", &["--commonjs", "--parse-only", "--dump-ast"]),
    ("parser/js/emptySource", "js", &["--dump-assembly"]),
];

const COMPILER_DIRS: &[(&str, &str, &[&str])] = &[
    ("compiler/js", "js", &[]),
    ("compiler/ts", "ts", &["--extension=ts"]),
    ("compiler/commonjs", "js", &["--commonjs"]),
];

const TSC_DIRS: &[&str] = &["tests/cases/conformance", "tests/cases/compiler"];

/// Suite selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuiteKind {
    Regression,
    Test262,
    Tsc,
    Compiler,
    Hotfix,
    Hotreload,
    Base64,
}

impl SuiteKind {
    pub fn name(self) -> &'static str {
        match self {
            SuiteKind::Regression => "Regression",
            SuiteKind::Test262 => "Test262 ark",
            SuiteKind::Tsc => "TSC",
            SuiteKind::Compiler => "Compiler",
            SuiteKind::Hotfix => "Hotfix",
            SuiteKind::Hotreload => "Hotreload",
            SuiteKind::Base64 => "Base64",
        }
    }
}

/// Ids relative to `root`, with `/` separators on every platform.
fn relative_id(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Sorted files with `extension` under `dir`.
fn collect_files(dir: &Path, extension: &str, recursive: bool) -> Vec<PathBuf> {
    let walker = WalkDir::new(dir).min_depth(1);
    let walker = if recursive { walker } else { walker.max_depth(1) };
    let mut files: Vec<PathBuf> = walker
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == extension))
        .collect();
    files.sort();
    files
}

/// Sorted immediate subdirectories of `dir`.
fn collect_dirs(dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();
    dirs.sort();
    dirs
}

/// User filter and test list, applied to every suite
#[derive(Debug, Clone)]
pub struct Selection {
    pattern: Pattern,
    test_list: Option<Skiplist>,
}

impl Selection {
    /// The filter is a shell glob matched against the end of a test id.
    pub fn new(filter: &str, test_list: Option<Skiplist>) -> Result<Self, ConfigError> {
        let pattern = Pattern::new(&format!("*{filter}")).map_err(|source| ConfigError::Filter {
            pattern: filter.to_string(),
            source,
        })?;
        Ok(Self { pattern, test_list })
    }

    pub fn from_config(config: &RunnerConfig) -> Result<Self> {
        let test_list = match &config.test_list {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                Some(Skiplist::parse(&text))
            }
            None => None,
        };
        Ok(Self::new(&config.filter, test_list)?)
    }

    pub fn matches(&self, id: &str) -> bool {
        self.pattern.matches(id)
    }

    /// Whether `id` survives filtering and skiplisting. Listed ids run even
    /// when skiplisted.
    pub fn admits(&self, id: &str, skiplist: &Skiplist) -> bool {
        if !self.matches(id) {
            return false;
        }
        match &self.test_list {
            Some(list) => list.contains(id),
            None => !skiplist.contains(id),
        }
    }
}

/// A discovered suite, ready to run
#[derive(Debug)]
pub struct Suite {
    kind: SuiteKind,
    cases: Vec<TestCase>,
    /// Skiplist rewritten after an update run, with its previous contents
    update: Option<(PathBuf, Skiplist)>,
    /// Patch test directories to clear of artifacts after the run
    patch_dirs: Vec<PathBuf>,
}

impl Suite {
    /// Discover the cases of `kind`. Infrastructure problems (missing
    /// binaries, failed checkouts) abort here, before anything runs.
    pub fn discover(kind: SuiteKind, config: &RunnerConfig, toolchain: &Toolchain) -> Result<Self> {
        let selection = Selection::from_config(config)?;
        let mut suite = Self {
            kind,
            cases: Vec::new(),
            update: None,
            patch_dirs: Vec::new(),
        };
        match kind {
            SuiteKind::Regression => suite.discover_regression(config, &selection),
            SuiteKind::Compiler => {
                toolchain.require_js_vm(kind.name())?;
                suite.discover_compiler(config, &selection);
            }
            SuiteKind::Test262 => {
                toolchain.require_vm()?;
                if config.aot {
                    toolchain.require_aot()?;
                }
                let dir = crate::test262::prepare(config)?;
                suite.discover_test262(config, &selection, &dir)?;
            }
            SuiteKind::Tsc => {
                let checkout =
                    tsc::ensure_checkout(config.tsc_path.as_deref(), &config.test_root, &config.tsc_branch)?;
                suite.discover_tsc(config, &selection, &checkout)?;
            }
            SuiteKind::Hotfix => {
                let dir = config.test_root.join("hotfix").join("hotfix-throwerror");
                suite.discover_patch(config, &selection, &dir, PatchMode::Hotfix);
            }
            SuiteKind::Hotreload => {
                let dir = config.test_root.join("hotreload");
                suite.discover_patch(config, &selection, &dir, PatchMode::Hotreload);
            }
            SuiteKind::Base64 => suite.discover_base64(config, &selection),
        }
        tracing::info!("{}: {} tests", kind.name(), suite.cases.len());
        Ok(suite)
    }

    pub fn kind(&self) -> SuiteKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    fn add_files(
        &mut self,
        root: &Path,
        table: &[(&str, &str, &[&str])],
        recursive: bool,
        selection: &Selection,
        kind: CaseKind,
    ) {
        let none = Skiplist::default();
        for (dir, extension, flags) in table {
            for path in collect_files(&root.join(dir), extension, recursive) {
                let id = relative_id(root, &path);
                if selection.admits(&id, &none) {
                    let flags = flags.iter().map(|f| f.to_string()).collect();
                    self.cases.push(TestCase::new(id, path, flags, kind.clone()));
                }
            }
        }
    }

    fn discover_regression(&mut self, config: &RunnerConfig, selection: &Selection) {
        self.add_files(&config.test_root, REGRESSION_DIRS, false, selection, CaseKind::Regression);
    }

    fn discover_compiler(&mut self, config: &RunnerConfig, selection: &Selection) {
        self.add_files(&config.test_root, COMPILER_DIRS, true, selection, CaseKind::Compiler);
    }

    fn discover_test262(&mut self, config: &RunnerConfig, selection: &Selection, dir: &Path) -> Result<()> {
        let root = &config.test_root;
        let mut lists = vec![root.join(TEST262_SKIPLIST_LONG), root.join(TEST262_SKIPLIST_FLAKY)];
        if config.skiplists_enabled() {
            lists.push(root.join(TEST262_SKIPLIST));
            if config.arm64_compiler_skip {
                lists.push(root.join(TEST262_SKIPLIST_ARM64));
            }
        } else if !config.update {
            lists.clear();
        }
        let skiplist = Skiplist::load(&lists)?;

        let bco_list = if config.skiplists_enabled() && config.bco {
            Skiplist::load(&[root.join(TEST262_SKIPLIST_BCO)])?
        } else {
            Skiplist::default()
        };

        if config.update {
            let path = root.join(TEST262_SKIPLIST);
            let previous = Skiplist::load(&[&path])?;
            self.update = Some((path, previous));
        }

        for path in collect_files(dir, "js", true) {
            let id = relative_id(dir, &path);
            if !selection.admits(&id, &skiplist) {
                continue;
            }
            let optimize = config.bco && !bco_list.contains(&id);
            self.cases
                .push(TestCase::new(id, path, Vec::new(), CaseKind::Test262 { optimize }));
        }
        Ok(())
    }

    fn discover_tsc(&mut self, config: &RunnerConfig, selection: &Selection, checkout: &Path) -> Result<()> {
        let ignored = if config.skip {
            Skiplist::load(&[config.test_root.join(tsc::IGNORE_LIST)])?
        } else {
            Skiplist::default()
        };

        for dir in TSC_DIRS {
            for path in collect_files(&checkout.join(dir), "ts", true) {
                let id = relative_id(checkout, &path);
                if !selection.admits(&id, &ignored) {
                    continue;
                }
                let source = std::fs::read(&path).map_err(|e| PrepareError::io(&path, e))?;
                let options = TscOptions::parse(&String::from_utf8_lossy(&source));
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy())
                    .unwrap_or_default();
                let name = name.split(".ts").next().unwrap_or_default();
                if options.contains("filename") || tsc::has_negative_baseline(checkout, name, &options) {
                    continue;
                }
                let module = options.is_module();
                self.cases
                    .push(TestCase::new(id, path, Vec::new(), CaseKind::Tsc { module }));
            }
        }
        Ok(())
    }

    fn discover_patch(&mut self, config: &RunnerConfig, selection: &Selection, dir: &Path, mode: PatchMode) {
        let none = Skiplist::default();
        for path in collect_dirs(dir) {
            let id = relative_id(&config.test_root, &path);
            if selection.admits(&id, &none) {
                self.patch_dirs.push(path.clone());
                self.cases
                    .push(TestCase::new(id, path, Vec::new(), CaseKind::Patch(mode)));
            }
        }
    }

    fn discover_base64(&mut self, config: &RunnerConfig, selection: &Selection) {
        let none = Skiplist::default();
        let dir = config.test_root.join("base64");
        for (name, input) in [("inputFile", Base64Input::File), ("inputString", Base64Input::String)] {
            let path = dir.join(name);
            let id = relative_id(&config.test_root, &path);
            if selection.admits(&id, &none) {
                self.cases
                    .push(TestCase::new(id, path, Vec::new(), CaseKind::Base64(input)));
            }
        }
    }

    /// Run every case through the pool and merge the results by id, in
    /// discovery order.
    pub fn run(&self, ctx: Arc<RunContext>, pool: &PoolConfig, progress: bool) -> Vec<TestResult> {
        let pb = (progress && !self.cases.is_empty()).then(|| progress_bar(self.cases.len()));
        let results = run_parallel(self.cases.clone(), ctx, pool, pb);
        merge(&self.cases, results)
    }

    /// Post-run bookkeeping: skiplist rewrite in update mode and patch
    /// artifact cleanup unless errors are being captured.
    pub fn finish(&self, config: &RunnerConfig, results: &[TestResult]) -> Result<Option<SkiplistUpdate>> {
        if !config.capture_errors {
            for dir in &self.patch_dirs {
                clear_patch_artifacts(dir)?;
            }
        }

        let Some((path, previous)) = &self.update else {
            return Ok(None);
        };
        let update = SkiplistUpdate::compute(previous, results);
        update.print();
        update.write(path)?;
        Ok(Some(update))
    }

    /// Aggregate report for this suite's results.
    pub fn report(&self, results: &[TestResult]) -> Report {
        Report::from_results(self.name(), results)
    }
}

/// Order results like `cases`; a case without a result is a failure.
pub fn merge(cases: &[TestCase], results: Vec<TestResult>) -> Vec<TestResult> {
    let mut by_id: std::collections::HashMap<String, TestResult> =
        results.into_iter().map(|r| (r.id.clone(), r)).collect();
    cases
        .iter()
        .map(|case| {
            by_id.remove(&case.id).unwrap_or_else(|| {
                tracing::error!(test = %case.id, "no result reported");
                TestResult::internal_failure(case, "not executed".to_string())
            })
        })
        .collect()
}

fn clear_patch_artifacts(dir: &Path) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::Io(e)),
    };
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && crate::case::is_patch_artifact(&path) {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::{FailKind, TestStatus};
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[test]
    fn test_selection_filter_and_test_list() {
        let skiplist = Skiplist::parse("a/skipped.js\n");
        let all = Selection::new("*", None).unwrap();
        assert!(all.admits("a/run.js", &skiplist));
        assert!(!all.admits("a/skipped.js", &skiplist));

        let filtered = Selection::new("Array/*", None).unwrap();
        assert!(filtered.admits("built-ins/Array/from.js", &skiplist));
        assert!(!filtered.admits("built-ins/Map/get.js", &skiplist));

        let listed = Selection::new("*", Some(Skiplist::parse("a/skipped.js\n"))).unwrap();
        assert!(listed.admits("a/skipped.js", &skiplist));
        assert!(!listed.admits("a/run.js", &skiplist));
    }

    #[test]
    fn test_bad_filter_is_a_config_error() {
        assert!(matches!(
            Selection::new("[", None),
            Err(ConfigError::Filter { .. })
        ));
    }

    #[test]
    fn test_regression_discovery_is_sorted_and_flat() {
        let root = TempDir::new().unwrap();
        touch(root.path(), "parser/js/b.js");
        touch(root.path(), "parser/js/a.js");
        touch(root.path(), "parser/js/a-expected.txt");
        touch(root.path(), "parser/js/emptySource/empty.js");
        touch(root.path(), "parser/ts/t.ts");

        let mut suite = Suite {
            kind: SuiteKind::Regression,
            cases: Vec::new(),
            update: None,
            patch_dirs: Vec::new(),
        };
        let config = RunnerConfig::new(root.path(), root.path());
        suite.discover_regression(&config, &Selection::new("*", None).unwrap());

        let ids: Vec<&str> = suite.cases.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["parser/js/a.js", "parser/js/b.js", "parser/ts/t.ts", "parser/js/emptySource/empty.js"]
        );
        assert_eq!(suite.cases[0].flags, vec!["--parse-only"]);
        assert_eq!(suite.cases[3].flags, vec!["--dump-assembly"]);
    }

    #[test]
    fn test_test262_skiplists() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("flat");
        for id in ["a.js", "long.js", "skipped.js", "bco.js", "flaky.js"] {
            touch(&dir, id);
        }
        std::fs::write(root.path().join(TEST262_SKIPLIST), "# FRONTEND_FAIL\nskipped.js\n").unwrap();
        std::fs::write(root.path().join(TEST262_SKIPLIST_LONG), "long.js\n").unwrap();
        std::fs::write(root.path().join(TEST262_SKIPLIST_FLAKY), "flaky.js\n").unwrap();
        std::fs::write(root.path().join(TEST262_SKIPLIST_BCO), "bco.js\n").unwrap();

        let discover = |config: &RunnerConfig| {
            let mut suite = Suite {
                kind: SuiteKind::Test262,
                cases: Vec::new(),
                update: None,
                patch_dirs: Vec::new(),
            };
            suite
                .discover_test262(config, &Selection::from_config(config).unwrap(), &dir)
                .unwrap();
            suite
        };

        let config = RunnerConfig::new(root.path(), root.path());
        let suite = discover(&config);
        let ids: Vec<&str> = suite.cases.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a.js", "bco.js"]);
        assert_eq!(suite.cases[0].kind, CaseKind::Test262 { optimize: true });
        assert_eq!(suite.cases[1].kind, CaseKind::Test262 { optimize: false });

        // Update mode runs the normal skiplist but keeps long and flaky out.
        let mut config = RunnerConfig::new(root.path(), root.path());
        config.update = true;
        let suite = discover(&config);
        let ids: Vec<&str> = suite.cases.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a.js", "bco.js", "skipped.js"]);
        assert!(suite.update.as_ref().unwrap().1.contains("skipped.js"));

        let mut config = RunnerConfig::new(root.path(), root.path());
        config.skip = false;
        assert_eq!(discover(&config).cases.len(), 5);
    }

    #[test]
    fn test_merge_fills_missing_results() {
        let cases = vec![
            TestCase::new("a.js", "/t/a.js", vec![], CaseKind::Regression),
            TestCase::new("b.js", "/t/b.js", vec![], CaseKind::Regression),
        ];
        let results = vec![TestResult {
            id: "b.js".to_string(),
            path: PathBuf::from("/t/b.js"),
            status: TestStatus::Passed,
            output: String::new(),
            error: None,
            reproduce: Vec::new(),
            duration_ms: 1,
        }];
        let merged = merge(&cases, results);
        assert_eq!(merged[0].id, "a.js");
        assert_eq!(merged[0].fail_kind(), Some(FailKind::FrontendFail));
        assert_eq!(merged[0].error.as_deref(), Some("not executed"));
        assert!(merged[1].passed());
    }

    #[test]
    fn test_patch_artifacts_cleared() {
        let root = TempDir::new().unwrap();
        for file in ["base.js", "base.map", "base.abc", "patch.abc", "expected.txt"] {
            touch(root.path(), &format!("hotreload/case1/{file}"));
        }
        clear_patch_artifacts(&root.path().join("hotreload/case1")).unwrap();
        let mut left: Vec<String> = std::fs::read_dir(root.path().join("hotreload/case1"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["base.js", "expected.txt"]);
    }
}
