//! External tool invocation with a wall-clock timeout.
//!
//! Every toolchain call goes through [`Invocation::run`]. The child is
//! spawned with `kill_on_drop`, so when the timeout fires and the output
//! future is dropped, the process is killed and reaped by the runtime.

use std::collections::BTreeMap;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Command;

/// Sanitizer option variables forced on every child.
pub const SANITIZER_VARS: [&str; 4] = [
    "ASAN_OPTIONS",
    "TSAN_OPTIONS",
    "MSAN_OPTIONS",
    "LSAN_OPTIONS",
];

/// Sanitizer reports exit with 255 instead of 1, so they can never pass as
/// an expected `SyntaxError`.
pub const SANITIZER_EXIT_OVERRIDE: &str = ":exitcode=255";

/// Environment overrides applied on top of the inherited environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolEnv {
    vars: BTreeMap<String, String>,
}

impl ToolEnv {
    /// Environment with sanitizer exit codes moved out of the 0/1 range.
    pub fn hardened() -> Self {
        let mut env = Self::default();
        for var in SANITIZER_VARS {
            env.vars
                .insert(var.to_string(), SANITIZER_EXIT_OVERRIDE.to_string());
        }
        env
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    fn apply(&self, cmd: &mut Command) {
        cmd.envs(&self.vars);
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    /// Terminating signal, if any
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    fn from_output(output: std::process::Output) -> Self {
        Self {
            code: output.status.code(),
            signal: exit_signal(&output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by stderr, the form expected-output files use.
    pub fn combined(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len());
        out.push_str(&self.stdout);
        out.push_str(&self.stderr);
        out
    }

    /// Exit status as shown in failure reports.
    pub fn status_text(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => code.to_string(),
            (None, Some(signal)) => format!("killed by signal {signal}"),
            (None, None) => "unknown".to_string(),
        }
    }

    /// Full failure description: both streams and the status.
    pub fn describe(&self) -> String {
        format!(
            "out:{}\nerr:{}\ncode:{}",
            self.stdout,
            self.stderr,
            self.status_text()
        )
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// How a stage ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed(ToolOutput),
    TimedOut,
}

/// A fully-specified external command
#[derive(Debug, Clone)]
pub struct Invocation {
    argv: Vec<String>,
    env: ToolEnv,
    timeout: Duration,
}

impl Invocation {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self {
            argv,
            env: ToolEnv::default(),
            timeout,
        }
    }

    pub fn with_env(mut self, env: &ToolEnv) -> Self {
        self.env = env.clone();
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Shell-pasteable reproduction line.
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }

    /// Run to completion or until the timeout expires.
    ///
    /// Spawn failures (missing binary, permissions) are returned as errors;
    /// everything the child itself does is reported through the outcome.
    pub async fn run(&self) -> io::Result<StageOutcome> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        self.env.apply(&mut cmd);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(output) => Ok(StageOutcome::Completed(ToolOutput::from_output(output?))),
            Err(_) => {
                tracing::debug!(
                    "timed out after {:?}: {}",
                    self.timeout,
                    self.command_line()
                );
                Ok(StageOutcome::TimedOut)
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> Invocation {
        Invocation::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            timeout,
        )
    }

    #[tokio::test]
    async fn test_captures_streams_and_code() {
        let outcome = sh("echo out; echo err >&2; exit 1", Duration::from_secs(10))
            .run()
            .await
            .unwrap();
        let StageOutcome::Completed(output) = outcome else {
            panic!("unexpected timeout");
        };
        assert_eq!(output.code, Some(1));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.combined(), "out\nerr\n");
    }

    #[tokio::test]
    async fn test_timeout_kills() {
        let start = std::time::Instant::now();
        let outcome = sh("sleep 30", Duration::from_millis(200)).run().await.unwrap();
        assert_eq!(outcome, StageOutcome::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_signal_is_abnormal() {
        let outcome = sh("kill -SEGV $$", Duration::from_secs(10)).run().await.unwrap();
        let StageOutcome::Completed(output) = outcome else {
            panic!("unexpected timeout");
        };
        assert_eq!(output.code, None);
        assert_eq!(output.signal, Some(11));
        assert_eq!(output.status_text(), "killed by signal 11");
    }

    #[tokio::test]
    async fn test_env_overrides() {
        let env = ToolEnv::hardened().with("ARK_MARKER", "42");
        let outcome = sh("echo $ASAN_OPTIONS $ARK_MARKER", Duration::from_secs(10))
            .with_env(&env)
            .run()
            .await
            .unwrap();
        let StageOutcome::Completed(output) = outcome else {
            panic!("unexpected timeout");
        };
        assert_eq!(output.stdout, ":exitcode=255 42\n");
    }

    #[tokio::test]
    async fn test_missing_binary_is_error() {
        let inv = Invocation::new(
            vec!["/nonexistent/es2abc".to_string()],
            Duration::from_secs(1),
        );
        assert!(inv.run().await.is_err());
        assert!(Invocation::new(vec![], Duration::from_secs(1)).run().await.is_err());
    }
}
