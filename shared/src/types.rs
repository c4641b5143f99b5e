use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal states a submission can reach, plus the initial `Pending`.
///
/// The database stores verdicts as the human-readable labels returned by
/// [`Verdict::as_str`]; a `Judge Error` row may carry a reason suffix
/// (`"Judge Error: No test cases"`), which [`Verdict::from_label`] accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Pending,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompilationError,
    JudgeError,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pending => "Pending",
            Verdict::Accepted => "Accepted",
            Verdict::WrongAnswer => "Wrong Answer",
            Verdict::TimeLimitExceeded => "Time Limit Exceeded",
            Verdict::MemoryLimitExceeded => "Memory Limit Exceeded",
            Verdict::RuntimeError => "Runtime Error",
            Verdict::CompilationError => "Compilation Error",
            Verdict::JudgeError => "Judge Error",
        }
    }

    pub fn from_label(label: &str) -> Option<Verdict> {
        match label {
            "Pending" => Some(Verdict::Pending),
            "Accepted" => Some(Verdict::Accepted),
            "Wrong Answer" => Some(Verdict::WrongAnswer),
            "Time Limit Exceeded" => Some(Verdict::TimeLimitExceeded),
            "Memory Limit Exceeded" => Some(Verdict::MemoryLimitExceeded),
            "Runtime Error" => Some(Verdict::RuntimeError),
            "Compilation Error" => Some(Verdict::CompilationError),
            other if other.starts_with("Judge Error") => Some(Verdict::JudgeError),
            _ => None,
        }
    }

    /// The verdict column transitions exactly once, from `Pending` to one of
    /// these.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Verdict::Pending)
    }

    /// Label with an operator-facing reason attached, used for the
    /// `Judge Error` catch-all.
    pub fn with_reason(&self, reason: &str) -> String {
        format!("{}: {}", self.as_str(), reason)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Verdict; 8] = [
        Verdict::Pending,
        Verdict::Accepted,
        Verdict::WrongAnswer,
        Verdict::TimeLimitExceeded,
        Verdict::MemoryLimitExceeded,
        Verdict::RuntimeError,
        Verdict::CompilationError,
        Verdict::JudgeError,
    ];

    #[test]
    fn labels_round_trip() {
        for verdict in ALL {
            assert_eq!(Verdict::from_label(verdict.as_str()), Some(verdict));
        }
    }

    #[test]
    fn judge_error_reason_still_parses() {
        let label = Verdict::JudgeError.with_reason("No test cases");
        assert_eq!(label, "Judge Error: No test cases");
        assert_eq!(Verdict::from_label(&label), Some(Verdict::JudgeError));
    }

    #[test]
    fn only_pending_is_non_terminal() {
        for verdict in ALL {
            assert_eq!(verdict.is_terminal(), verdict != Verdict::Pending);
        }
    }

    #[test]
    fn unknown_labels_rejected() {
        assert_eq!(Verdict::from_label("Presentation Error"), None);
        assert_eq!(Verdict::from_label(""), None);
    }
}
