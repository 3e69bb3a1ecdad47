//! test262 checkout and flattening.
//!
//! The VM has no module loader for harness files, so every test is rewritten
//! into a self-contained source: the test header, the harness prelude,
//! each include wrapped in start/end markers, then the test body. The result
//! lives in `<build_dir>/test262` and is reused while its stamp matches the
//! pinned revision.

use std::path::{Path, PathBuf};
use std::process::Command;

use walkdir::WalkDir;

use crate::config::RunnerConfig;
use crate::descriptor::{TestDescriptor, extract_header};
use crate::error::PrepareError;
use crate::parallel::progress_bar;

pub const TEST262_REPOSITORY: &str = "https://github.com/tc39/test262.git";

/// Records which revision the flattened tree was generated from.
pub const STAMP_FILE: &str = "test262.stamp";

/// Placeholder in the harness prelude replaced by the prelude's own text.
const SOURCE_PLACEHOLDER: &str = "$SOURCE";

/// Fixture files are imported by other tests and never run on their own.
const FIXTURE_MARKER: &str = "_FIXTURE";

/// Run git, failing with its stderr.
pub(crate) fn git(args: &[&str], cwd: Option<&Path>) -> Result<(), PrepareError> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let command = format!("git {}", args.join(" "));
    tracing::info!("{command}");
    let output = cmd.output().map_err(|e| PrepareError::Git {
        command: command.clone(),
        detail: e.to_string(),
    })?;
    if output.status.success() {
        Ok(())
    } else {
        Err(PrepareError::Git {
            command,
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Clone test262 into `dir` if needed and check out `revision`.
fn checkout(dir: &Path, revision: &str) -> Result<(), PrepareError> {
    if !dir.join(".git").is_dir() {
        let target = dir.display().to_string();
        git(&["clone", TEST262_REPOSITORY, &target], None)?;
    }
    if git(&["checkout", "-q", revision], Some(dir)).is_err() {
        git(&["fetch", "-q", "origin"], Some(dir))?;
        git(&["checkout", "-q", revision], Some(dir))?;
    }
    Ok(())
}

/// Harness prelude with its placeholder substituted.
pub fn harness_prelude(template: &str) -> String {
    template.replace(SOURCE_PLACEHOLDER, &format!("`{template}`"))
}

/// Flattened source of one test.
///
/// `read_include` resolves a harness file name to its contents. A test with
/// no header is returned unchanged; running it reports the missing header.
pub fn flatten<F>(source: &str, prelude: &str, mut read_include: F) -> std::io::Result<String>
where
    F: FnMut(&str) -> std::io::Result<String>,
{
    let Ok(header) = extract_header(source) else {
        return Ok(source.to_string());
    };
    let desc = TestDescriptor::from_header(header);

    let mut out = String::with_capacity(source.len() + prelude.len());
    out.push_str(header);
    out.push('\n');
    out.push_str(prelude);
    for include in &desc.includes {
        out.push_str(&format!("//------------ {include} start ------------\n"));
        out.push_str(&read_include(include)?);
        out.push_str(&format!("//------------ {include} end ------------\n"));
        out.push('\n');
    }
    out.push_str(source);
    Ok(out)
}

fn is_stamped(out_dir: &Path, revision: &str) -> bool {
    std::fs::read_to_string(out_dir.join(STAMP_FILE))
        .map(|stamp| stamp.trim() == revision)
        .unwrap_or(false)
}

/// Flatten every test under `checkout/test` into `out_dir`.
pub fn generate(checkout: &Path, harness: &Path, out_dir: &Path, progress: bool) -> Result<usize, PrepareError> {
    let template = std::fs::read_to_string(harness).map_err(|e| PrepareError::io(harness, e))?;
    let prelude = harness_prelude(&template);
    let test_dir = checkout.join("test");
    let harness_dir = checkout.join("harness");

    let mut files: Vec<PathBuf> = WalkDir::new(&test_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "js"))
        .filter(|p| !p.to_string_lossy().contains(FIXTURE_MARKER))
        .collect();
    files.sort();

    let pb = progress.then(|| {
        let pb = progress_bar(files.len());
        pb.set_message("flattening test262");
        pb
    });
    for file in &files {
        let Ok(rel) = file.strip_prefix(&test_dir) else {
            continue;
        };
        let dest = out_dir.join(rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PrepareError::io(parent, e))?;
        }

        let source = std::fs::read_to_string(file).map_err(|e| PrepareError::io(file, e))?;
        let flattened = flatten(&source, &prelude, |include| {
            std::fs::read_to_string(harness_dir.join(include))
        })
        .map_err(|e| PrepareError::io(file, e))?;
        std::fs::write(&dest, flattened).map_err(|e| PrepareError::io(&dest, e))?;

        if let Some(ref pb) = pb {
            pb.inc(1);
        }
    }
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    Ok(files.len())
}

/// Directory of flattened tests for the configured revision, generating it
/// when the stamp is missing or stale.
pub fn prepare(config: &RunnerConfig) -> Result<PathBuf, PrepareError> {
    let out_dir = config.build_dir.join("test262");
    let revision = config.test262_revision.as_str();
    if is_stamped(&out_dir, revision) {
        tracing::debug!("test262 at {revision} already prepared in {}", out_dir.display());
        return Ok(out_dir);
    }

    let checkout_dir = match &config.test262_path {
        Some(path) => path.clone(),
        None => {
            let dir = config.build_dir.join("test262-git");
            checkout(&dir, revision)?;
            dir
        }
    };

    if out_dir.exists() {
        std::fs::remove_dir_all(&out_dir).map_err(|e| PrepareError::io(&out_dir, e))?;
    }
    std::fs::create_dir_all(&out_dir).map_err(|e| PrepareError::io(&out_dir, e))?;

    let count = generate(&checkout_dir, &config.test262_harness, &out_dir, config.progress)?;
    let stamp = out_dir.join(STAMP_FILE);
    std::fs::write(&stamp, format!("{revision}\n")).map_err(|e| PrepareError::io(&stamp, e))?;
    tracing::info!("flattened {count} test262 tests into {}", out_dir.display());
    Ok(out_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEST: &str = "/*---\nflags: [async]\nincludes: [compareArray.js]\n---*/\nbody();\n";

    #[test]
    fn test_prelude_substitutes_itself() {
        assert_eq!(harness_prelude("eval($SOURCE);\n"), "eval(`eval($SOURCE);\n`);\n");
        assert_eq!(harness_prelude("plain\n"), "plain\n");
    }

    #[test]
    fn test_flatten_layout() {
        let flattened = flatten(TEST, "PRELUDE\n", |name| Ok(format!("/* {name} */\n"))).unwrap();
        let expected = "/*---\nflags: [async]\nincludes: [compareArray.js]\n---*/\n\
PRELUDE\n\
//------------ compareArray.js start ------------\n/* compareArray.js */\n//------------ compareArray.js end ------------\n\n\
//------------ assert.js start ------------\n/* assert.js */\n//------------ assert.js end ------------\n\n\
//------------ sta.js start ------------\n/* sta.js */\n//------------ sta.js end ------------\n\n\
//------------ doneprintHandle.js start ------------\n/* doneprintHandle.js */\n//------------ doneprintHandle.js end ------------\n\n"
            .to_string()
            + TEST;
        assert_eq!(flattened, expected);
    }

    #[test]
    fn test_flatten_without_header_is_unchanged() {
        let flattened = flatten("no header\n", "PRELUDE\n", |_| panic!("no includes")).unwrap();
        assert_eq!(flattened, "no header\n");
    }

    #[test]
    fn test_missing_include_is_an_error() {
        let err = flatten(TEST, "", |_| {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))
        });
        assert!(err.is_err());
    }

    #[test]
    fn test_prepare_from_local_checkout() {
        let checkout = TempDir::new().unwrap();
        let build = TempDir::new().unwrap();
        let harness_dir = checkout.path().join("harness");
        let test_dir = checkout.path().join("test/built-ins/Array");
        std::fs::create_dir_all(&harness_dir).unwrap();
        std::fs::create_dir_all(&test_dir).unwrap();
        for name in ["assert.js", "sta.js"] {
            std::fs::write(harness_dir.join(name), "// helper\n").unwrap();
        }
        std::fs::write(test_dir.join("from.js"), "/*---\n---*/\nok();\n").unwrap();
        std::fs::write(test_dir.join("helper_FIXTURE.js"), "export default 1;\n").unwrap();
        let harness = checkout.path().join("test262harness.js");
        std::fs::write(&harness, "var $262 = {};\n").unwrap();

        let mut config = RunnerConfig::new(build.path(), checkout.path());
        config.test262_path = Some(checkout.path().to_path_buf());
        config.test262_harness = harness;
        config.progress = false;

        let out = prepare(&config).unwrap();
        let flattened = std::fs::read_to_string(out.join("built-ins/Array/from.js")).unwrap();
        assert!(flattened.starts_with("/*---\n---*/\nvar $262 = {};\n"));
        assert!(flattened.ends_with("ok();\n"));
        assert!(!out.join("built-ins/Array/helper_FIXTURE.js").exists());
        assert!(is_stamped(&out, &config.test262_revision));

        // Stamped trees are reused as-is.
        std::fs::write(out.join("built-ins/Array/from.js"), "kept").unwrap();
        prepare(&config).unwrap();
        assert_eq!(std::fs::read_to_string(out.join("built-ins/Array/from.js")).unwrap(), "kept");
    }
}
