//! Test262 test descriptor parsing
//!
//! Every conformance test carries a YAML frontmatter block between `/*---`
//! and `---*/`. Only three things in it matter to the runner: the flags, the
//! harness includes and the negative expectation.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DescriptorError;

const HEADER_START: &str = "/*---";
const HEADER_END: &str = "---*/";

/// Harness files every test needs, appended after the explicit includes.
pub const DEFAULT_INCLUDES: [&str; 2] = ["assert.js", "sta.js"];

/// Harness file that reports `$DONE` for async tests.
pub const ASYNC_INCLUDE: &str = "doneprintHandle.js";

/// Phase in which a negative test is expected to fail
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NegativePhase {
    /// Not a negative test
    #[default]
    Pass,
    /// Parse-time (and early) errors, reported by the frontend
    #[serde(alias = "early")]
    Parse,
    /// Module resolution errors
    Resolution,
    /// Runtime errors
    Runtime,
}

impl NegativePhase {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "parse" | "early" => Some(NegativePhase::Parse),
            "resolution" => Some(NegativePhase::Resolution),
            "runtime" => Some(NegativePhase::Runtime),
            _ => None,
        }
    }
}

impl std::fmt::Display for NegativePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NegativePhase::Pass => write!(f, "pass"),
            NegativePhase::Parse => write!(f, "parse"),
            NegativePhase::Resolution => write!(f, "resolution"),
            NegativePhase::Runtime => write!(f, "runtime"),
        }
    }
}

/// Parsed test header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TestDescriptor {
    /// Test flags (`module`, `async`, `noStrict`, ...)
    pub flags: Vec<String>,
    /// Expected failure phase, `Pass` for ordinary tests
    pub negative_phase: NegativePhase,
    /// Expected error name, empty for ordinary tests
    pub negative_type: String,
    /// Harness files to prepend, in order
    pub includes: Vec<String>,
}

/// Raw frontmatter as written in the test file
#[derive(Debug, Default, Deserialize)]
struct Frontmatter {
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    includes: Vec<String>,
    #[serde(default)]
    negative: Option<Negative>,
}

#[derive(Debug, Deserialize)]
struct Negative {
    phase: NegativePhase,
    #[serde(rename = "type")]
    error_type: String,
}

/// Locate the header comment, delimiters included.
pub fn extract_header(source: &str) -> Result<&str, DescriptorError> {
    let start = source.find(HEADER_START).ok_or(DescriptorError::MissingHeader)?;
    let end = source[start..]
        .find(HEADER_END)
        .ok_or(DescriptorError::MissingHeader)?;
    Ok(&source[start..start + end + HEADER_END.len()])
}

impl TestDescriptor {
    /// Parse the descriptor of a full test source.
    pub fn from_source(source: &str) -> Result<Self, DescriptorError> {
        Ok(Self::from_header(extract_header(source)?))
    }

    /// Parse a header as returned by [`extract_header`].
    pub fn from_header(header: &str) -> Self {
        let body = header
            .trim_start_matches(HEADER_START)
            .trim_end_matches(HEADER_END);

        let raw = match serde_yaml::from_str::<Frontmatter>(body) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!("frontmatter is not valid YAML ({e}), scanning lines instead");
                scan_frontmatter(body)
            }
        };

        let mut descriptor = TestDescriptor {
            flags: Vec::new(),
            negative_phase: NegativePhase::Pass,
            negative_type: String::new(),
            includes: Vec::new(),
        };
        for flag in raw.flags {
            push_unique(&mut descriptor.flags, flag);
        }
        if let Some(negative) = raw.negative {
            descriptor.negative_phase = negative.phase;
            descriptor.negative_type = negative.error_type;
        }
        for include in raw.includes {
            push_unique(&mut descriptor.includes, include);
        }
        for include in DEFAULT_INCLUDES {
            push_unique(&mut descriptor.includes, include.to_string());
        }
        if descriptor.is_async() {
            push_unique(&mut descriptor.includes, ASYNC_INCLUDE.to_string());
        }
        descriptor
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn is_module(&self) -> bool {
        self.has_flag("module")
    }

    pub fn is_async(&self) -> bool {
        self.has_flag("async")
    }

    /// Sloppy-mode-only tests cannot be expressed by the frontend.
    pub fn is_no_strict(&self) -> bool {
        self.has_flag("noStrict")
    }

    pub fn expects_parse_error(&self) -> bool {
        self.negative_phase == NegativePhase::Parse
    }

    pub fn expects_runtime_error(&self) -> bool {
        matches!(
            self.negative_phase,
            NegativePhase::Runtime | NegativePhase::Resolution
        )
    }
}

fn push_unique(list: &mut Vec<String>, item: String) {
    let item = item.trim().to_string();
    if !item.is_empty() && !list.contains(&item) {
        list.push(item);
    }
}

static FLAGS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"flags:\s*\[(?P<list>[^\]]*)\]").unwrap());
static INCLUDES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"includes:\s*\[(?P<list>[^\]]*)\]").unwrap());
static INCLUDES_BULLETS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"includes:[ \t]*(?P<list>(?:\r?\n[ \t]+-[ \t]*[^\n]+)+)").unwrap());
static NEGATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)negative:(?P<block>(?:\s*(?:phase|type):[ \t]*[\w$]+)+)").unwrap()
});
static PHASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"phase:[ \t]*(?P<phase>\w+)").unwrap());
static TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"type:[ \t]*(?P<type>[\w$]+)").unwrap());

/// Line-oriented fallback for headers serde_yaml rejects.
fn scan_frontmatter(body: &str) -> Frontmatter {
    let split_list = |list: &str| -> Vec<String> {
        list.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    };

    let flags = FLAGS_RE
        .captures(body)
        .map(|c| split_list(&c["list"]))
        .unwrap_or_default();

    let mut includes = INCLUDES_RE
        .captures(body)
        .map(|c| split_list(&c["list"]))
        .unwrap_or_default();
    if let Some(c) = INCLUDES_BULLETS_RE.captures(body) {
        includes.extend(
            c["list"]
                .lines()
                .filter_map(|line| line.trim().strip_prefix('-'))
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty()),
        );
    }

    let negative = NEGATIVE_RE.captures(body).and_then(|c| {
        let block = &c["block"];
        let phase = PHASE_RE.captures(block)?;
        let error_type = TYPE_RE.captures(block)?;
        let phase = NegativePhase::from_name(&phase["phase"]).or_else(|| {
            tracing::warn!("unknown negative phase '{}'", &phase["phase"]);
            None
        })?;
        Some(Negative {
            phase,
            error_type: error_type["type"].to_string(),
        })
    });

    Frontmatter {
        flags,
        includes,
        negative,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_header() {
        let err = TestDescriptor::from_source("var x = 1;\n").unwrap_err();
        assert!(matches!(err, DescriptorError::MissingHeader));

        // An unterminated header is just as broken
        assert!(extract_header("/*--- flags: [module]\nvar x;").is_err());
    }

    #[test]
    fn test_extract_header_keeps_delimiters() {
        let source = "// Copyright\n/*---\nflags: [module]\n---*/\nexport {};\n";
        assert_eq!(extract_header(source).unwrap(), "/*---\nflags: [module]\n---*/");
    }

    #[test]
    fn test_defaults() {
        let desc = TestDescriptor::from_source("/*---\ndescription: plain\n---*/\n1;").unwrap();
        assert!(desc.flags.is_empty());
        assert_eq!(desc.negative_phase, NegativePhase::Pass);
        assert_eq!(desc.negative_type, "");
        assert_eq!(desc.includes, vec!["assert.js", "sta.js"]);
    }

    #[test]
    fn test_flags_and_bracketed_includes() {
        let content = r#"
/*---
description: Test addition
includes: [compareArray.js, propertyHelper.js]
flags: [module, onlyStrict]
---*/
"#;
        let desc = TestDescriptor::from_source(content).unwrap();
        assert_eq!(desc.flags, vec!["module", "onlyStrict"]);
        assert!(desc.is_module());
        assert_eq!(
            desc.includes,
            vec!["compareArray.js", "propertyHelper.js", "assert.js", "sta.js"]
        );
    }

    #[test]
    fn test_bulleted_includes() {
        let content = r#"
/*---
includes:
  - promiseHelper.js
  - compareArray.js
---*/
"#;
        let desc = TestDescriptor::from_source(content).unwrap();
        assert_eq!(
            desc.includes,
            vec!["promiseHelper.js", "compareArray.js", "assert.js", "sta.js"]
        );
    }

    #[test]
    fn test_async_appends_done_handler() {
        let desc = TestDescriptor::from_source("/*---\nflags: [async]\n---*/").unwrap();
        assert!(desc.is_async());
        assert_eq!(desc.includes, vec!["assert.js", "sta.js", "doneprintHandle.js"]);
    }

    #[test]
    fn test_negative_expectation() {
        let content = r#"
/*---
description: Test syntax error
negative:
  phase: parse
  type: SyntaxError
---*/
{{{
"#;
        let desc = TestDescriptor::from_source(content).unwrap();
        assert!(desc.expects_parse_error());
        assert!(!desc.expects_runtime_error());
        assert_eq!(desc.negative_type, "SyntaxError");
    }

    #[test]
    fn test_early_phase_is_parse() {
        let desc = TestDescriptor::from_source(
            "/*---\nnegative:\n  phase: early\n  type: ReferenceError\n---*/",
        )
        .unwrap();
        assert_eq!(desc.negative_phase, NegativePhase::Parse);
    }

    #[test]
    fn test_resolution_counts_as_runtime() {
        let desc = TestDescriptor::from_source(
            "/*---\nnegative:\n  phase: resolution\n  type: SyntaxError\nflags: [module]\n---*/",
        )
        .unwrap();
        assert!(desc.expects_runtime_error());
    }

    #[test]
    fn test_fallback_on_invalid_yaml() {
        // The unclosed flow sequence makes this invalid YAML
        let content = "/*---\ndescription: [unclosed\nnegative:\n  phase: runtime\n  type: TypeError\nflags: [async]\nincludes:\n  - asyncHelpers.js\n---*/";
        assert!(serde_yaml::from_str::<Frontmatter>(
            content.trim_start_matches(HEADER_START).trim_end_matches(HEADER_END)
        )
        .is_err());

        let desc = TestDescriptor::from_source(content).unwrap();
        assert_eq!(desc.negative_phase, NegativePhase::Runtime);
        assert_eq!(desc.negative_type, "TypeError");
        assert_eq!(desc.flags, vec!["async"]);
        assert_eq!(
            desc.includes,
            vec!["asyncHelpers.js", "assert.js", "sta.js", "doneprintHandle.js"]
        );
    }
}
