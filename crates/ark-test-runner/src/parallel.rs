//! Parallel execution pool.
//!
//! Distributes test cases across N worker threads over bounded crossbeam
//! channels. Each worker owns a current-thread tokio runtime that is only
//! used to await child processes under a timeout. Results come back in
//! completion order; callers merge them by id.

use std::io::{BufWriter, Write};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use crossbeam_channel::{Receiver, Sender, bounded};
use indicatif::{ProgressBar, ProgressStyle};

use crate::case::{RunContext, TestCase, TestResult, TestStatus};

/// Pool settings
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Worker thread count
    pub jobs: usize,
    /// Print one line per finished test
    pub verbose: bool,
    /// JSONL result log, appended to
    pub log_path: Option<PathBuf>,
}

/// Progress bar in the style used for every long-running step.
pub fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) | {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb.set_message("starting...");
    pb
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown".to_string()
    }
}

/// Run `cases` across `config.jobs` worker threads.
///
/// Blocks until every case has finished. A case that panics is reported as
/// a failure; it never takes the pool down.
pub fn run_parallel(
    cases: Vec<TestCase>,
    ctx: Arc<RunContext>,
    config: &PoolConfig,
    pb: Option<ProgressBar>,
) -> Vec<TestResult> {
    let jobs = config.jobs.max(1);
    let total = cases.len();
    let (job_tx, job_rx) = bounded::<TestCase>(jobs * 4);
    let (result_tx, result_rx) = bounded::<TestResult>(jobs * 8);

    let mut handles = Vec::with_capacity(jobs);
    for i in 0..jobs {
        let job_rx = job_rx.clone();
        let result_tx = result_tx.clone();
        let ctx = Arc::clone(&ctx);

        match std::thread::Builder::new()
            .name(format!("ark-test-worker-{i}"))
            .spawn(move || worker_main(job_rx, result_tx, ctx))
        {
            Ok(handle) => handles.push(handle),
            Err(e) => tracing::error!("failed to spawn worker thread {i}: {e}"),
        }
    }
    drop(job_rx);
    drop(result_tx);

    let send_handle = std::thread::spawn(move || {
        for case in cases {
            if job_tx.send(case).is_err() {
                break;
            }
        }
    });

    let mut log_writer = config.log_path.as_ref().and_then(|p| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(p)
            .map_err(|e| tracing::warn!("cannot open log {}: {e}", p.display()))
            .ok()
            .map(BufWriter::new)
    });

    let mut results = Vec::with_capacity(total);
    let (mut passed, mut failed, mut skipped) = (0usize, 0usize, 0usize);

    for result in &result_rx {
        if let Some(ref mut writer) = log_writer {
            if let Ok(line) = serde_json::to_string(&result) {
                let _ = writeln!(writer, "{line}");
            }
        }

        match result.status {
            TestStatus::Passed => passed += 1,
            TestStatus::Failed(_) => failed += 1,
            TestStatus::Skipped => skipped += 1,
        }

        if config.verbose {
            let status = match result.status {
                TestStatus::Passed => "PASS".green().to_string(),
                TestStatus::Failed(kind) if kind.is_timeout() => "TIME".magenta().to_string(),
                TestStatus::Failed(_) => "FAIL".red().to_string(),
                TestStatus::Skipped => "SKIP".yellow().to_string(),
            };
            let line = format!("[{status}] {} {}ms", result.id, result.duration_ms);
            match pb {
                Some(ref pb) => pb.println(line),
                None => eprintln!("{line}"),
            }
        }

        if let Some(ref pb) = pb {
            pb.inc(1);
            pb.set_message(format!(
                "Pass: {passed} Fail: {failed} Skip: {skipped} [{jobs}j]"
            ));
        }
        results.push(result);
    }

    if let Some(ref mut writer) = log_writer {
        let _ = writer.flush();
    }
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let _ = send_handle.join();
    for handle in handles {
        if let Err(e) = handle.join() {
            tracing::error!("worker thread panicked: {}", panic_message(e.as_ref()));
        }
    }

    results
}

fn worker_main(job_rx: Receiver<TestCase>, result_tx: Sender<TestResult>, ctx: Arc<RunContext>) {
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("failed to build worker runtime: {e}");
            return;
        }
    };

    for case in &job_rx {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| rt.block_on(case.run(&ctx))));
        let result = outcome.unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            tracing::error!(test = %case.id, "runner panicked: {message}");
            TestResult::internal_failure(&case, format!("runner panicked: {message}"))
        });

        if result_tx.send(result).is_err() {
            break;
        }
    }
}
