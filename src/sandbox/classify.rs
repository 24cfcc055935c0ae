use super::PhaseOutcome;

pub const NO_OUTPUT_PLACEHOLDER: &str = "(No output)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    CompileError,
    RuntimeError,
}

impl FailureReason {
    pub fn label(self) -> &'static str {
        match self {
            Self::CompileError => "Compilation Error",
            Self::RuntimeError => "Runtime Error",
        }
    }
}

/// Final verdict of one compile-and-run request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileResult {
    Failure {
        reason: FailureReason,
        message: String,
    },
    Success {
        output: String,
    },
}

impl CompileResult {
    fn failure(reason: FailureReason, stderr: &str) -> Self {
        Self::Failure {
            reason,
            message: format!("{}:\n{stderr}", reason.label()),
        }
    }
}

/// Maps the phase outcomes to a single result
///
/// Any compiler stderr counts as a failure, warnings included. `run` is only
/// absent when compilation failed; a missing run after a clean compile is
/// treated as a program with no output.
pub fn classify(compile: &PhaseOutcome, run: Option<&PhaseOutcome>) -> CompileResult {
    if !compile.stderr.is_empty() {
        return CompileResult::failure(FailureReason::CompileError, &compile.stderr);
    }

    let Some(run) = run else {
        return CompileResult::Success {
            output: NO_OUTPUT_PLACEHOLDER.to_string(),
        };
    };

    if !run.stderr.is_empty() {
        return CompileResult::failure(FailureReason::RuntimeError, &run.stderr);
    }

    let output = if run.stdout.is_empty() {
        NO_OUTPUT_PLACEHOLDER.to_string()
    } else {
        run.stdout.clone()
    };
    CompileResult::Success { output }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn outcome(stdout: &str, stderr: &str) -> PhaseOutcome {
        PhaseOutcome {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_compile_error_takes_precedence() {
        let result = classify(
            &outcome("", "Main.java:1: error: ';' expected\n"),
            Some(&outcome("ignored", "ignored")),
        );
        assert_eq!(
            result,
            CompileResult::Failure {
                reason: FailureReason::CompileError,
                message: "Compilation Error:\nMain.java:1: error: ';' expected\n".to_string(),
            }
        );
    }

    #[test]
    fn test_runtime_error() {
        let result = classify(
            &outcome("", ""),
            Some(&outcome("partial\n", "Exception in thread \"main\"\n")),
        );
        assert_eq!(
            result,
            CompileResult::Failure {
                reason: FailureReason::RuntimeError,
                message: "Runtime Error:\nException in thread \"main\"\n".to_string(),
            }
        );
    }

    #[test]
    fn test_success_output() {
        let result = classify(&outcome("", ""), Some(&outcome("hi\n", "")));
        assert_eq!(
            result,
            CompileResult::Success {
                output: "hi\n".to_string()
            }
        );
    }

    #[test]
    fn test_empty_output_placeholder() {
        let result = classify(&outcome("", ""), Some(&outcome("", "")));
        assert_eq!(
            result,
            CompileResult::Success {
                output: NO_OUTPUT_PLACEHOLDER.to_string()
            }
        );
    }

    #[test]
    fn test_compiler_stdout_is_not_a_failure() {
        let result = classify(&outcome("Note: something\n", ""), Some(&outcome("ok", "")));
        assert_eq!(
            result,
            CompileResult::Success {
                output: "ok".to_string()
            }
        );
    }
}
