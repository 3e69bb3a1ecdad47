//! Cases judged by the frontend alone or by comparing against an
//! `-expected.txt` file: regression, TSC and compiler tests.

use std::path::{Path, PathBuf};

use crate::process::ToolOutput;

use super::{Attempt, FailKind, RunContext, TestCase, TestResult};

/// `parser/js/foo.js` → `parser/js/foo-expected.txt`
pub(crate) fn expected_path(path: &Path) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    path.with_file_name(format!("{stem}-expected.txt"))
}

/// Matches only when the expected file exists, the output is identical and
/// the tool exited normally (0 or 1).
async fn matches_expected(path: &Path, output: &ToolOutput, actual: &str) -> bool {
    let Ok(expected) = tokio::fs::read_to_string(expected_path(path)).await else {
        return false;
    };
    expected == actual && matches!(output.code, Some(0 | 1))
}

pub(super) async fn run_regression(case: &TestCase, ctx: &RunContext, mut attempt: Attempt<'_>) -> TestResult {
    let toolchain = &ctx.toolchain;
    let mut cmd = toolchain.es2abc();
    cmd.push("--dump-ast".to_string());
    cmd.extend(case.flags.iter().cloned());
    cmd.push(case.path.display().to_string());

    let output = match attempt
        .stage(cmd, ctx.timeouts.frontend, toolchain.env(), FailKind::FrontendFail)
        .await
    {
        Ok(output) => output,
        Err(failure) => return attempt.abort(failure),
    };
    let actual = output.combined();
    attempt.set_output(actual.clone());

    if matches_expected(&case.path, &output, &actual).await {
        attempt.pass()
    } else {
        attempt.fail(FailKind::FrontendFail, output.stderr)
    }
}

pub(super) async fn run_tsc(case: &TestCase, module: bool, ctx: &RunContext, mut attempt: Attempt<'_>) -> TestResult {
    let toolchain = &ctx.toolchain;
    let mut cmd = toolchain.es2abc();
    cmd.push("--parse-only".to_string());
    cmd.push("--extension=ts".to_string());
    cmd.extend(case.flags.iter().cloned());
    if module {
        cmd.push("--module".to_string());
    }
    cmd.push(case.path.display().to_string());

    let output = match attempt
        .stage(cmd, ctx.timeouts.frontend, toolchain.env(), FailKind::FrontendFail)
        .await
    {
        Ok(output) => output,
        Err(failure) => return attempt.abort(failure),
    };
    attempt.set_output(output.stdout.clone());

    if output.success() {
        attempt.pass()
    } else {
        attempt.fail(FailKind::FrontendFail, output.stderr)
    }
}

pub(super) async fn run_compiler(case: &TestCase, ctx: &RunContext, mut attempt: Attempt<'_>) -> TestResult {
    let toolchain = &ctx.toolchain;
    let abc = toolchain
        .build_dir()
        .join(format!("{}.abc", case.artifact_stem().replace('/', "_")));

    let mut cmd = toolchain.es2abc();
    cmd.extend(case.flags.iter().cloned());
    cmd.push(format!("--output={}", abc.display()));
    cmd.push(case.path.display().to_string());

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

    let mut cmd = toolchain.ark_js_vm();
    cmd.push(abc.display().to_string());
    let stage = attempt
        .stage(cmd, ctx.timeouts.runtime, &toolchain.js_vm_env(), FailKind::RuntimeFail)
        .await;

    if let Err(e) = tokio::fs::remove_file(&abc).await {
        tracing::warn!("failed to remove {}: {e}", abc.display());
    }

    let output = match stage {
        Ok(output) => output,
        Err(failure) => return attempt.abort(failure),
    };
    let actual = output.combined();
    attempt.set_output(actual.clone());

    if matches_expected(&case.path, &output, &actual).await {
        attempt.pass()
    } else {
        attempt.fail(FailKind::RuntimeFail, output.stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_path() {
        assert_eq!(
            expected_path(Path::new("/t/parser/js/test-array.js")),
            PathBuf::from("/t/parser/js/test-array-expected.txt")
        );
        assert_eq!(
            expected_path(Path::new("compiler/ts/a.b.ts")),
            PathBuf::from("compiler/ts/a.b-expected.txt")
        );
    }
}
