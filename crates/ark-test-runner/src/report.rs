//! Test result reporting

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::case::{FailKind, TestResult, TestStatus};

pub const TEST_STATISTICS_CSV: &str = "test_statistics.csv";
pub const TYPE_STATISTICS_CSV: &str = "type_statistics.csv";

/// Per-suite report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Suite name
    pub suite: String,
    /// Tests discovered, skipped ones included
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Failure count per kind
    pub by_kind: BTreeMap<FailKind, usize>,
    /// Failed tests, sorted by path
    pub failures: Vec<FailureInfo>,
}

/// Information about a failed test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureInfo {
    pub id: String,
    pub path: PathBuf,
    pub kind: FailKind,
    pub error: String,
    /// Command lines that reproduce the failure
    pub reproduce: Vec<String>,
}

impl Report {
    /// Generate a report from test results
    pub fn from_results(suite: &str, results: &[TestResult]) -> Self {
        let mut report = Self {
            suite: suite.to_string(),
            total: results.len(),
            passed: 0,
            failed: 0,
            skipped: 0,
            by_kind: BTreeMap::new(),
            failures: Vec::new(),
        };

        for result in results {
            match result.status {
                TestStatus::Passed => report.passed += 1,
                TestStatus::Skipped => report.skipped += 1,
                TestStatus::Failed(kind) => {
                    report.failed += 1;
                    *report.by_kind.entry(kind).or_default() += 1;
                    report.failures.push(FailureInfo {
                        id: result.id.clone(),
                        path: result.path.clone(),
                        kind,
                        error: result.error_text().to_string(),
                        reproduce: result.reproduce.clone(),
                    });
                }
            }
        }
        report.failures.sort_by(|a, b| a.path.cmp(&b.path));
        report
    }

    /// Tests that actually ran.
    pub fn executed(&self) -> usize {
        self.total - self.skipped
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Failures of one kind, in path order.
    pub fn failures_of(&self, kind: FailKind) -> impl Iterator<Item = &FailureInfo> {
        self.failures.iter().filter(move |f| f.kind == kind)
    }

    /// Failure listing grouped by kind under `# KIND` headers. With
    /// `details`, each entry is followed by its reproduction steps and error.
    pub fn render_failures(&self, details: bool) -> String {
        let mut out = String::new();
        for kind in FailKind::ALL {
            let mut failures = self.failures_of(kind).peekable();
            if failures.peek().is_none() {
                continue;
            }
            let _ = writeln!(out, "# {kind}");
            for failure in failures {
                let _ = writeln!(out, "{}", failure.id);
                if details {
                    let _ = writeln!(out, "steps:");
                    for step in &failure.reproduce {
                        let _ = writeln!(out, "  {step}");
                    }
                    let _ = writeln!(out, "error:");
                    let _ = writeln!(out, "{}", failure.error);
                }
            }
            out.push('\n');
        }
        out
    }

    pub fn print_failures(&self, details: bool) {
        if self.has_failures() {
            print!("{}", self.render_failures(details));
        }
    }

    /// Print a summary to stdout
    pub fn print_summary(&self) {
        println!("Summary({}):", self.suite);
        println!("{}", format!("Total:   {:5}", self.executed()).white());
        println!("{}", format!("Passed:  {:5}", self.passed).bright_green());
        println!("{}", format!("Failed:  {:5}", self.failed).bright_red());
        if self.skipped > 0 {
            println!("{}", format!("Skipped: {:5}", self.skipped).yellow());
        }
        println!();
    }
}

/// Reports of one invocation, persisted with `--report`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub timestamp: DateTime<Utc>,
    pub suites: Vec<Report>,
}

impl RunReport {
    pub fn new(suites: Vec<Report>) -> Self {
        Self {
            timestamp: Utc::now(),
            suites,
        }
    }

    pub fn failed(&self) -> usize {
        self.suites.iter().map(|s| s.failed).sum()
    }

    /// Export to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn write(&self, path: &Path) -> crate::Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Per-test rows and error-type counts collected under `--error`
#[derive(Debug, Default)]
pub struct Statistics {
    rows: Vec<[String; 4]>,
}

impl Statistics {
    /// Record executed tests; skipped ones are left out.
    pub fn record(&mut self, results: &[TestResult]) {
        for result in results {
            let path = result.path.display().to_string();
            match result.status {
                TestStatus::Passed => {
                    let ok = "success".to_string();
                    self.rows.push([path, ok.clone(), ok.clone(), ok]);
                }
                TestStatus::Failed(_) => {
                    self.rows.push([
                        path,
                        "fail".to_string(),
                        result.error_text().to_string(),
                        result.error_class(),
                    ]);
                }
                TestStatus::Skipped => {}
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether any recorded test failed. The CSV files are only written then.
    pub fn has_failures(&self) -> bool {
        self.rows.iter().any(|row| row[1] == "fail")
    }

    /// Occurrences per error type, most frequent first.
    pub fn type_counts(&self) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for row in &self.rows {
            *counts.entry(row[3].as_str()).or_default() += 1;
        }
        let mut counts: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(ty, n)| (ty.to_string(), n))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts
    }

    pub fn render_tests(&self) -> String {
        let mut out = String::from("path,status,error,type\n");
        for row in &self.rows {
            let fields: Vec<String> = row.iter().map(|f| csv_field(f)).collect();
            out.push_str(&fields.join(","));
            out.push('\n');
        }
        out
    }

    pub fn render_types(&self) -> String {
        let mut out = String::from("error,count\n");
        for (ty, count) in self.type_counts() {
            let _ = writeln!(out, "{},{count}", csv_field(&ty));
        }
        out
    }

    /// Write both CSV files into `dir`.
    pub fn write(&self, dir: &Path) -> crate::Result<()> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join(TEST_STATISTICS_CSV), self.render_tests())?;
        std::fs::write(dir.join(TYPE_STATISTICS_CSV), self.render_types())?;
        tracing::info!("wrote statistics to {}", dir.display());
        Ok(())
    }

    pub fn print_types(&self) {
        println!("Type statistics:");
        for (ty, count) in self.type_counts() {
            println!("{count:>6}  {ty}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn result(id: &str, status: TestStatus, error: Option<&str>) -> TestResult {
        TestResult {
            id: id.to_string(),
            path: PathBuf::from(format!("/t/{id}")),
            status,
            output: String::new(),
            error: error.map(str::to_string),
            reproduce: vec![format!("es2abc /t/{id}")],
            duration_ms: 3,
        }
    }

    fn sample() -> Vec<TestResult> {
        vec![
            result("b.js", TestStatus::Failed(FailKind::RuntimeFail), Some("TypeError: x [b.js:1]")),
            result("a.js", TestStatus::Passed, None),
            result("c.js", TestStatus::Skipped, None),
            result("a2.js", TestStatus::Failed(FailKind::RuntimeFail), None),
            result("d.js", TestStatus::Failed(FailKind::FrontendTimeout), Some("FRONTEND_TIMEOUT")),
        ]
    }

    #[test]
    fn test_report_generation() {
        let report = Report::from_results("Test262 ark", &sample());
        assert_eq!(report.total, 5);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.executed(), 4);
        assert_eq!(report.by_kind[&FailKind::RuntimeFail], 2);
        assert_eq!(report.by_kind[&FailKind::FrontendTimeout], 1);
        let ids: Vec<&str> = report.failures.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a2.js", "b.js", "d.js"]);
    }

    #[test]
    fn test_grouped_listing_is_deterministic() {
        let mut results = sample();
        let first = Report::from_results("s", &results).render_failures(false);
        results.reverse();
        let second = Report::from_results("s", &results).render_failures(false);
        assert_eq!(first, second);
        assert_eq!(first, "# RUNTIME_FAIL\na2.js\nb.js\n\n# FRONTEND_TIMEOUT\nd.js\n\n");
    }

    #[test]
    fn test_details_include_steps_and_error() {
        let report = Report::from_results("s", &sample());
        let text = report.render_failures(true);
        assert!(text.contains("steps:\n  es2abc /t/b.js\nerror:\nTypeError: x [b.js:1]\n"));
        assert!(text.contains("a2.js\nsteps:\n  es2abc /t/a2.js\nerror:\nSegmentation fault\n"));
    }

    #[test]
    fn test_no_failures() {
        let report = Report::from_results("s", &[result("a.js", TestStatus::Passed, None)]);
        assert!(!report.has_failures());
        assert_eq!(report.render_failures(true), "");
    }

    #[test]
    fn test_statistics_csv() {
        let mut stats = Statistics::default();
        stats.record(&sample());
        let dir = TempDir::new().unwrap();
        stats.write(dir.path()).unwrap();

        let tests = std::fs::read_to_string(dir.path().join(TEST_STATISTICS_CSV)).unwrap();
        let lines: Vec<&str> = tests.lines().collect();
        assert_eq!(lines[0], "path,status,error,type");
        assert_eq!(lines[1], "/t/b.js,fail,TypeError: x [b.js:1],TypeError: x");
        assert_eq!(lines[2], "/t/a.js,success,success,success");
        assert_eq!(lines.len(), 5);

        let types = std::fs::read_to_string(dir.path().join(TYPE_STATISTICS_CSV)).unwrap();
        assert_eq!(
            types,
            "error,count\nFRONTEND_TIMEOUT,1\nSegmentation fault,1\nTypeError: x,1\nsuccess,1\n"
        );
    }

    #[test]
    fn test_statistics_need_a_failure() {
        let mut stats = Statistics::default();
        stats.record(&[
            result("a.js", TestStatus::Passed, None),
            result("c.js", TestStatus::Skipped, None),
        ]);
        assert!(!stats.is_empty());
        assert!(!stats.has_failures());

        stats.record(&[result("b.js", TestStatus::Failed(FailKind::FrontendFail), Some("boom"))]);
        assert!(stats.has_failures());
    }

    #[test]
    fn test_csv_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\"\n"), "\"say \"\"hi\"\"\n\"");
    }

    #[test]
    fn test_run_report_json() {
        let report = RunReport::new(vec![Report::from_results("s", &sample())]);
        assert_eq!(report.failed(), 3);
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["suites"][0]["failed"], 3);
        assert_eq!(json["suites"][0]["by_kind"]["RUNTIME_FAIL"], 2);
        assert!(json["timestamp"].is_string());
    }
}
