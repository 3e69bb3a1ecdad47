//! Pass/fail classification of frontend and VM runs.
//!
//! The toolchain speaks through return codes: 0 is success, 1 is an
//! ordinary (expected or unexpected) error, anything else, including death
//! by signal, is an abnormal exit and always fails.

use crate::descriptor::TestDescriptor;

/// Printed by `doneprintHandle.js` once an async test settles successfully.
pub const ASYNC_TEST_COMPLETE: &str = "Test262:AsyncTestComplete";

/// Outcome of the frontend stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrontendVerdict {
    /// The stage met the descriptor's expectation
    pub passed: bool,
    /// Later stages still have to run
    pub proceed: bool,
}

impl FrontendVerdict {
    const FAIL: Self = Self {
        passed: false,
        proceed: false,
    };
}

/// Classify an `es2abc` run against the descriptor.
///
/// `code` is `None` when the compiler was killed by a signal.
pub fn frontend_verdict(code: Option<i32>, stderr: &str, desc: &TestDescriptor) -> FrontendVerdict {
    let negative = desc.expects_parse_error();
    match code {
        Some(0) if negative => FrontendVerdict::FAIL,
        Some(0) => FrontendVerdict {
            passed: true,
            proceed: true,
        },
        // A negative parse test is complete once the right error shows up
        Some(1) => FrontendVerdict {
            passed: negative && stderr.contains(&desc.negative_type),
            proceed: false,
        },
        _ => FrontendVerdict::FAIL,
    }
}

/// Classify an `ark` run against the descriptor.
pub fn runtime_verdict(code: Option<i32>, stdout: &str, stderr: &str, desc: &TestDescriptor) -> bool {
    let negative = desc.expects_runtime_error();
    match code {
        Some(0) if negative => false,
        Some(0) => stderr.is_empty() && (!desc.is_async() || stdout.contains(ASYNC_TEST_COMPLETE)),
        Some(1) => negative && stderr.contains(&desc.negative_type),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::NegativePhase;

    fn desc(phase: NegativePhase, error_type: &str, flags: &[&str]) -> TestDescriptor {
        TestDescriptor {
            flags: flags.iter().map(|f| f.to_string()).collect(),
            negative_phase: phase,
            negative_type: error_type.to_string(),
            includes: Vec::new(),
        }
    }

    #[test]
    fn test_frontend_positive_test() {
        let d = desc(NegativePhase::Pass, "", &[]);
        assert_eq!(
            frontend_verdict(Some(0), "", &d),
            FrontendVerdict {
                passed: true,
                proceed: true
            }
        );
        assert!(!frontend_verdict(Some(1), "SyntaxError: oops", &d).passed);
        assert!(!frontend_verdict(Some(2), "", &d).passed);
        assert!(!frontend_verdict(None, "", &d).passed);
    }

    #[test]
    fn test_frontend_negative_parse_test() {
        let d = desc(NegativePhase::Parse, "SyntaxError", &[]);

        // Compiled cleanly although an error was expected
        assert_eq!(frontend_verdict(Some(0), "", &d), FrontendVerdict::FAIL);

        assert_eq!(
            frontend_verdict(Some(1), "SyntaxError: Unexpected token [1:4]", &d),
            FrontendVerdict {
                passed: true,
                proceed: false
            }
        );
        assert!(!frontend_verdict(Some(1), "ReferenceError: x", &d).passed);

        // Crashes never count, even with the right text
        assert!(!frontend_verdict(Some(134), "SyntaxError", &d).passed);
        assert!(!frontend_verdict(None, "SyntaxError", &d).passed);
    }

    #[test]
    fn test_frontend_runtime_negative_proceeds() {
        let d = desc(NegativePhase::Runtime, "TypeError", &[]);
        assert!(frontend_verdict(Some(0), "", &d).proceed);
    }

    #[test]
    fn test_runtime_positive_ignores_stdout() {
        let d = desc(NegativePhase::Pass, "", &[]);
        assert!(runtime_verdict(Some(0), "", "", &d));
        assert!(runtime_verdict(Some(0), "anything at all", "", &d));
        assert!(!runtime_verdict(Some(0), "", "warning", &d));
        assert!(!runtime_verdict(Some(1), "", "", &d));
        assert!(!runtime_verdict(Some(255), "", "", &d));
    }

    #[test]
    fn test_runtime_async_needs_marker() {
        let d = desc(NegativePhase::Pass, "", &["async"]);
        assert!(runtime_verdict(Some(0), "Test262:AsyncTestComplete\n", "", &d));
        assert!(!runtime_verdict(Some(0), "", "", &d));
        assert!(!runtime_verdict(
            Some(0),
            "Test262:AsyncTestFailure:Test262Error: boom",
            "",
            &d
        ));
    }

    #[test]
    fn test_runtime_negative() {
        for phase in [NegativePhase::Runtime, NegativePhase::Resolution] {
            let d = desc(phase, "TypeError", &[]);
            assert!(!runtime_verdict(Some(0), "", "", &d));
            assert!(runtime_verdict(Some(1), "", "Uncaught TypeError: x is not a function", &d));
            assert!(!runtime_verdict(Some(1), "", "Uncaught RangeError", &d));
            assert!(!runtime_verdict(None, "", "TypeError", &d));
        }
    }
}
