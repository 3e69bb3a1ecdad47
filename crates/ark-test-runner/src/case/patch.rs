//! Directory-based cases: hotfix/hotreload patch generation and base64
//! output. Each test is a directory with fixed file names and an
//! `expected.txt` carrying a license header.

use std::path::Path;

use super::{Attempt, FailKind, RunContext, TestCase, TestResult, strip_license};

const SYMBOL_TABLE: &str = "base.map";
const BASE_INPUT: &str = "base.js";
const BASE_OUTPUT: &str = "base.abc";
const MODIFIED_INPUT: &str = "base_mod.js";
const PATCH_OUTPUT: &str = "patch.abc";
const EXPECTED: &str = "expected.txt";

/// Patch flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchMode {
    Hotfix,
    Hotreload,
}

impl PatchMode {
    fn flag(self) -> &'static str {
        match self {
            PatchMode::Hotfix => "--generate-patch",
            PatchMode::Hotreload => "--hot-reload",
        }
    }
}

/// Where the base64 case takes its source from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base64Input {
    /// `input.js` passed by path
    File,
    /// `input.txt` contents passed on the command line
    String,
}

fn arg(path: &Path) -> String {
    path.display().to_string()
}

async fn read_expected(dir: &Path) -> Option<String> {
    tokio::fs::read_to_string(dir.join(EXPECTED))
        .await
        .ok()
        .map(|text| strip_license(&text))
}

fn mismatch(expected: Option<&str>, actual: &str) -> String {
    match expected {
        Some(expected) => format!("expected output:\n{expected}\nactual output:\n{actual}"),
        None => format!("missing {EXPECTED}\nactual output:\n{actual}"),
    }
}

pub(super) async fn run_patch(case: &TestCase, mode: PatchMode, ctx: &RunContext, mut attempt: Attempt<'_>) -> TestResult {
    let dir = &case.path;
    let toolchain = &ctx.toolchain;
    let timeout = ctx.timeouts.frontend;

    let mut base = toolchain.es2abc();
    base.push("--module".to_string());
    base.extend([
        "--dump-symbol-table".to_string(),
        arg(&dir.join(SYMBOL_TABLE)),
        "--output".to_string(),
        arg(&dir.join(BASE_OUTPUT)),
        arg(&dir.join(BASE_INPUT)),
    ]);

    let output = match attempt.stage(base, timeout, toolchain.env(), FailKind::FrontendFail).await {
        Ok(output) => output,
        Err(failure) => return attempt.abort(failure),
    };
    if !output.stderr.is_empty() {
        return attempt.fail(FailKind::FrontendFail, output.stderr);
    }

    let mut patch = toolchain.es2abc();
    patch.push("--module".to_string());
    patch.push(mode.flag().to_string());
    patch.extend([
        "--input-symbol-table".to_string(),
        arg(&dir.join(SYMBOL_TABLE)),
        "--output".to_string(),
        arg(&dir.join(PATCH_OUTPUT)),
        arg(&dir.join(MODIFIED_INPUT)),
    ]);

    let output = match attempt.stage(patch, timeout, toolchain.env(), FailKind::FrontendFail).await {
        Ok(output) => output,
        Err(failure) => return attempt.abort(failure),
    };
    // Patch diagnostics go to stderr and are part of the expected output.
    let actual = output.combined();
    attempt.set_output(actual.clone());

    let expected = read_expected(dir).await;
    if expected.as_deref() == Some(actual.as_str()) {
        attempt.pass()
    } else {
        attempt.fail(FailKind::FrontendFail, mismatch(expected.as_deref(), &actual))
    }
}

pub(super) async fn run_base64(case: &TestCase, input: Base64Input, ctx: &RunContext, mut attempt: Attempt<'_>) -> TestResult {
    let dir = &case.path;
    let toolchain = &ctx.toolchain;

    let mut cmd = toolchain.es2abc();
    cmd.push("--base64Output".to_string());
    match input {
        Base64Input::File => {
            cmd.extend([
                "--source-file".to_string(),
                "input.js".to_string(),
                arg(&dir.join("input.js")),
            ]);
        }
        Base64Input::String => {
            let path = dir.join("input.txt");
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => {
                    cmd.push("--base64Input".to_string());
                    cmd.push(strip_license(&text));
                }
                Err(e) => {
                    return attempt.fail(FailKind::FrontendFail, format!("{}: {e}", path.display()));
                }
            }
        }
    }

    let output = match attempt
        .stage(cmd, ctx.timeouts.frontend, toolchain.env(), FailKind::FrontendFail)
        .await
    {
        Ok(output) => output,
        Err(failure) => return attempt.abort(failure),
    };
    if !output.stderr.is_empty() {
        return attempt.fail(FailKind::FrontendFail, output.stderr);
    }
    attempt.set_output(output.stdout.clone());

    let expected = read_expected(dir).await;
    if expected.as_deref() == Some(output.stdout.as_str()) {
        attempt.pass()
    } else {
        attempt.fail(FailKind::FrontendFail, mismatch(expected.as_deref(), &output.stdout))
    }
}

/// Artifacts a patch run leaves in its test directory.
pub(crate) fn is_patch_artifact(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("map") | Some("abc")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_artifacts() {
        assert!(is_patch_artifact(Path::new("hotreload/case/base.map")));
        assert!(is_patch_artifact(Path::new("hotreload/case/patch.abc")));
        assert!(!is_patch_artifact(Path::new("hotreload/case/base.js")));
        assert!(!is_patch_artifact(Path::new("hotreload/case/expected.txt")));
    }

    #[test]
    fn test_mismatch_message() {
        assert_eq!(
            mismatch(Some("a\n"), "b\n"),
            "expected output:\na\n\nactual output:\nb\n"
        );
        assert!(mismatch(None, "b").starts_with("missing expected.txt"));
    }
}
