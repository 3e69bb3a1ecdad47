//! Skiplists: plain-text sets of test ids, one per line, grouped under
//! `# LABEL` headers.

use std::collections::BTreeSet;
use std::path::Path;

use colored::Colorize;

use crate::case::{FailKind, TestResult};

/// Set of skipped test ids
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Skiplist {
    ids: BTreeSet<String>,
}

impl Skiplist {
    /// Parse skiplist text. Blank lines and `#` comments are ignored.
    pub fn parse(text: &str) -> Self {
        let ids = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
        Self { ids }
    }

    /// Union of the given files. A missing file contributes nothing.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> std::io::Result<Self> {
        let mut list = Self::default();
        for path in paths {
            let path = path.as_ref();
            match std::fs::read_to_string(path) {
                Ok(text) => list.extend(Self::parse(&text)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::warn!("skiplist {} not found, treating as empty", path.display());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(list)
    }

    pub fn extend(&mut self, other: Skiplist) {
        self.ids.extend(other.ids);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

/// Skiplist recomputed from a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkiplistUpdate {
    /// Ids failing in the frontend, sorted
    pub frontend: Vec<String>,
    /// Ids failing in the VM, sorted
    pub runtime: Vec<String>,
    /// Previously listed ids missing from the rewritten list, including ids
    /// that were not run at all
    pub removed: Vec<String>,
    /// Failing ids that were not listed before
    pub added: Vec<String>,
}

impl SkiplistUpdate {
    pub fn compute(previous: &Skiplist, results: &[TestResult]) -> Self {
        let mut update = Self::default();
        for result in results {
            // Timeouts and AOT failures are curated by hand in the long and
            // flaky lists.
            match result.fail_kind() {
                Some(FailKind::FrontendFail) => update.frontend.push(result.id.clone()),
                Some(FailKind::RuntimeFail) => update.runtime.push(result.id.clone()),
                _ => continue,
            }
            if !previous.contains(&result.id) {
                update.added.push(result.id.clone());
            }
        }
        update.frontend.sort();
        update.frontend.dedup();
        update.runtime.sort();
        update.runtime.dedup();
        update.added.sort();
        update.added.dedup();

        let listed: BTreeSet<&str> = update
            .frontend
            .iter()
            .chain(&update.runtime)
            .map(String::as_str)
            .collect();
        update.removed = previous
            .iter()
            .filter(|id| !listed.contains(id))
            .map(str::to_string)
            .collect();
        update
    }

    /// File contents: two labeled sections, trailing newline.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("# ");
        out.push_str(FailKind::FrontendFail.label());
        out.push('\n');
        for id in &self.frontend {
            out.push_str(id);
            out.push('\n');
        }
        out.push_str("\n# ");
        out.push_str(FailKind::RuntimeFail.label());
        out.push('\n');
        for id in &self.runtime {
            out.push_str(id);
            out.push('\n');
        }
        out
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.render())?;
        tracing::info!(
            "wrote {} ({} frontend, {} runtime)",
            path.display(),
            self.frontend.len(),
            self.runtime.len()
        );
        Ok(())
    }

    pub fn print(&self) {
        if !self.removed.is_empty() {
            println!("{}", "Removed from skiplist:".green().bold());
            for id in &self.removed {
                println!("  {id}");
            }
        }
        if !self.added.is_empty() {
            println!("{}", "New tests on skiplist:".red().bold());
            for id in &self.added {
                println!("  {id}");
            }
        }
    }
}
