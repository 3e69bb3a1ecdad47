//! Conformance pipeline: es2abc, then optionally ark_aot, then ark.

use std::path::Path;

use crate::classify::{frontend_verdict, runtime_verdict};
use crate::descriptor::TestDescriptor;
use crate::toolchain::ENTRY_POINT;

use super::{Attempt, FailKind, RunContext, TestCase, TestResult};

pub(super) async fn run(case: &TestCase, optimize: bool, ctx: &RunContext, mut attempt: Attempt<'_>) -> TestResult {
    let source = match tokio::fs::read_to_string(&case.path).await {
        Ok(source) => source,
        Err(e) => return attempt.fail(FailKind::FrontendFail, format!("Failed to read test: {e}")),
    };
    let desc = match TestDescriptor::from_source(&source) {
        Ok(desc) => desc,
        Err(e) => return attempt.fail(FailKind::FrontendFail, format!("{}: {e}", case.path.display())),
    };

    if desc.is_no_strict() {
        return attempt.skip();
    }

    let stem = case.artifact_stem();
    let abc = ctx.tmp_dir.join(format!("{stem}.abc"));
    let an = ctx.tmp_dir.join(format!("{stem}.an"));
    if let Some(dir) = abc.parent() {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            return attempt.fail(FailKind::FrontendFail, format!("{}: {e}", dir.display()));
        }
    }

    let toolchain = &ctx.toolchain;
    let env = toolchain.env();

    // Frontend
    let mut cmd = toolchain.es2abc();
    if optimize {
        cmd.push("--opt-level=2".to_string());
    }
    cmd.push("--thread=0".to_string());
    cmd.push(format!("--output={}", abc.display()));
    if desc.is_module() {
        cmd.push("--module".to_string());
    }
    cmd.extend(case.flags.iter().cloned());
    cmd.push(case.path.display().to_string());

    let output = match attempt
        .stage(cmd, ctx.timeouts.frontend, env, FailKind::FrontendFail)
        .await
    {
        Ok(output) => output,
        Err(failure) => return attempt.abort(failure),
    };
    attempt.set_output(output.combined());
    let verdict = frontend_verdict(output.code, &output.stderr, &desc);
    if !verdict.passed {
        return attempt.fail(FailKind::FrontendFail, output.describe());
    }
    if !verdict.proceed {
        return attempt.pass();
    }

    // Ahead-of-time compilation
    if ctx.aot {
        if let Err(e) = remove_stale(&an).await {
            return attempt.fail(FailKind::AotFail, format!("{}: {e}", an.display()));
        }

        let mut cmd = toolchain.ark_aot();
        cmd.push("--paoc-panda-files".to_string());
        cmd.push(abc.display().to_string());
        cmd.push("--paoc-output".to_string());
        cmd.push(an.display().to_string());

        let output = match attempt.stage(cmd, ctx.timeouts.aot, env, FailKind::AotFail).await {
            Ok(output) => output,
            Err(failure) => return attempt.abort(failure),
        };
        attempt.set_output(output.combined());
        if !output.success() {
            return attempt.fail(FailKind::AotFail, output.stderr);
        }
    }

    // Execution
    let mut cmd = toolchain.ark();
    if ctx.aot {
        cmd.push("--aot-files".to_string());
        cmd.push(an.display().to_string());
    }
    if ctx.jit {
        cmd.push("--compiler-enable-jit=true".to_string());
        cmd.push("--compiler-hotness-threshold=0".to_string());
    } else {
        cmd.push("--compiler-enable-jit=false".to_string());
    }
    cmd.push(abc.display().to_string());
    cmd.push(ENTRY_POINT.to_string());

    let output = match attempt
        .stage(cmd, ctx.timeouts.runtime, env, FailKind::RuntimeFail)
        .await
    {
        Ok(output) => output,
        Err(failure) => return attempt.abort(failure),
    };
    attempt.set_output(output.combined());
    if runtime_verdict(output.code, &output.stdout, &output.stderr, &desc) {
        attempt.pass()
    } else {
        attempt.fail(FailKind::RuntimeFail, output.describe())
    }
}

/// A leftover artifact from an earlier run would let a failed AOT
/// compilation look like a success.
async fn remove_stale(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
