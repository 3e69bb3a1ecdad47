//! TypeScript conformance cases: checkout and `// @option: value` directives.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::PrepareError;
use crate::test262::git;

pub const TYPESCRIPT_REPOSITORY: &str = "https://github.com/microsoft/TypeScript.git";

/// Per-test exclusions, kept in the test root. Ids are relative to the
/// TypeScript checkout.
pub const IGNORE_LIST: &str = "test_tsc_ignore_list.txt";

/// Matches directives anywhere in the file, commented-out ones included.
static OPTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"//\s?@\w+:.*\n").unwrap());
static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").unwrap());
static EXPORT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"export ").unwrap());

/// Value of one compiler directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

/// Compiler directives of a test, keyed by lowercase option name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TscOptions {
    options: BTreeMap<String, OptionValue>,
}

impl TscOptions {
    /// Parse directives from source text.
    ///
    /// Any `export ` in the file, even inside a comment, marks the test as a
    /// module when no explicit `@module` is given. Only the last `@filename`
    /// of a multi-file test is kept.
    pub fn parse(source: &str) -> Self {
        let mut options = BTreeMap::new();
        for directive in OPTION_RE.find_iter(source) {
            let mut parts = directive.as_str().split(':');
            let name = parts.next().unwrap_or_default();
            let value = parts.next().unwrap_or_default().trim().to_lowercase();
            let Some(name) = WORD_RE.find(name) else {
                continue;
            };
            let name = name.as_str().to_lowercase();

            let value = match name.as_str() {
                // Each `@filename` replaces the previous one. Discovery only
                // checks that the key is present.
                "filename" => OptionValue::List(vec![value]),
                "lib" | "module" => {
                    OptionValue::List(value.split(',').map(|s| s.trim().to_string()).collect())
                }
                _ if value == "true" || value == "false" => OptionValue::Bool(value == "true"),
                _ => OptionValue::Text(value),
            };
            options.insert(name, value);
        }

        if !options.contains_key("module") && EXPORT_RE.is_match(source) {
            options.insert("module".to_string(), OptionValue::List(Vec::new()));
        }
        Self { options }
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.options.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    pub fn is_module(&self) -> bool {
        self.contains("module")
    }

    /// Targets named by `@target`, whitespace removed.
    pub fn targets(&self) -> Vec<String> {
        match self.get("target") {
            Some(OptionValue::Text(text)) => text
                .replace(' ', "")
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            Some(OptionValue::List(list)) => list.clone(),
            _ => Vec::new(),
        }
    }
}

/// Whether the TypeScript baselines expect `name` to produce errors.
pub fn has_negative_baseline(checkout: &Path, name: &str, options: &TscOptions) -> bool {
    let reference = checkout.join("tests/baselines/reference");
    if reference.join(format!("{name}.errors.txt")).is_file() {
        return true;
    }
    options
        .targets()
        .iter()
        .any(|target| reference.join(format!("{name}(target={target}).errors.txt")).is_file())
}

/// Existing TypeScript checkout, or one cloned into `test_root/TypeScript`
/// at `branch`. A reused checkout is cleaned of untracked files.
pub fn ensure_checkout(tsc_path: Option<&Path>, test_root: &Path, branch: &str) -> Result<PathBuf, PrepareError> {
    if let Some(path) = tsc_path {
        return Ok(path.to_path_buf());
    }
    let dir = test_root.join("TypeScript");
    if dir.is_dir() {
        git(&["clean", "-f", "-q"], Some(&dir))?;
    } else {
        let target = dir.display().to_string();
        git(&["clone", TYPESCRIPT_REPOSITORY, &target], None)?;
        git(&["checkout", "-q", branch], Some(&dir))?;
    }
    Ok(dir)
}
