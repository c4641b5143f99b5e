//! Pure verdict classification over an execution report. No processes are
//! spawned here, so every branch is unit-testable with synthetic reports.

use crate::sandbox::ExecutionReport;
use shared::Verdict;

/// Deterministic mapping from an observed run to a verdict. Limit breaches
/// win over exit status, which wins over output comparison.
pub fn classify(report: &ExecutionReport, expected_output: &str) -> Verdict {
    if report.timed_out {
        return Verdict::TimeLimitExceeded;
    }
    if report.memory_exceeded {
        return Verdict::MemoryLimitExceeded;
    }
    if report.signal_killed || report.exit_code != 0 {
        return Verdict::RuntimeError;
    }
    if outputs_match(&report.stdout, expected_output) {
        Verdict::Accepted
    } else {
        Verdict::WrongAnswer
    }
}

/// Trailing whitespace on either side is forgiven; nothing else is.
pub fn outputs_match(actual: &str, expected: &str) -> bool {
    let trim = [' ', '\t', '\r', '\n'];
    actual.trim_end_matches(trim) == expected.trim_end_matches(trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_run(stdout: &str) -> ExecutionReport {
        ExecutionReport {
            stdout: stdout.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn matching_output_is_accepted() {
        assert_eq!(classify(&clean_run("15\n"), "15\n"), Verdict::Accepted);
    }

    #[test]
    fn mismatched_output_is_wrong_answer() {
        assert_eq!(classify(&clean_run("14\n"), "15\n"), Verdict::WrongAnswer);
    }

    #[test]
    fn extra_trailing_whitespace_is_accepted() {
        assert_eq!(classify(&clean_run("15 \t\r\n\n"), "15\n"), Verdict::Accepted);
    }

    #[test]
    fn leading_whitespace_is_not_forgiven() {
        assert_eq!(classify(&clean_run("  15\n"), "15\n"), Verdict::WrongAnswer);
        assert_eq!(classify(&clean_run("\n15\n"), "15\n"), Verdict::WrongAnswer);
    }

    #[test]
    fn cpu_limit_takes_priority() {
        let report = ExecutionReport {
            timed_out: true,
            signal_killed: false,
            ..Default::default()
        };
        assert_eq!(classify(&report, ""), Verdict::TimeLimitExceeded);
    }

    #[test]
    fn memory_limit_beats_runtime_error() {
        let report = ExecutionReport {
            memory_exceeded: true,
            signal_killed: true,
            signal: Some(libc::SIGABRT),
            ..Default::default()
        };
        assert_eq!(classify(&report, ""), Verdict::MemoryLimitExceeded);
    }

    #[test]
    fn signals_classify_as_runtime_error() {
        let report = ExecutionReport {
            signal_killed: true,
            signal: Some(libc::SIGSEGV),
            ..Default::default()
        };
        assert_eq!(classify(&report, ""), Verdict::RuntimeError);
    }

    #[test]
    fn nonzero_exit_classifies_as_runtime_error_even_with_correct_output() {
        let report = ExecutionReport {
            exit_code: 1,
            stdout: "15\n".to_string(),
            ..Default::default()
        };
        assert_eq!(classify(&report, "15\n"), Verdict::RuntimeError);
    }

    #[test]
    fn empty_output_against_empty_expectation_is_accepted() {
        assert_eq!(classify(&clean_run(""), ""), Verdict::Accepted);
        assert_eq!(classify(&clean_run("\n"), ""), Verdict::Accepted);
    }
}
