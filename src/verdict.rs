/// Verdict record, wire serialization, and termination classification
use serde::{Deserialize, Serialize};

use crate::config::Limits;

/// Final classification of one judged run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "TLE")]
    TimeLimit,
    #[serde(rename = "MLE")]
    MemoryLimit,
    #[serde(rename = "OLE")]
    OutputLimit,
    #[serde(rename = "RE")]
    RuntimeError,
    #[serde(rename = "CE")]
    CompileError,
    #[serde(rename = "SE")]
    SystemError,
}

/// The verdict object emitted on stdout. Field names and renames match the
/// wire contract exactly; times are milliseconds, sizes bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub time_used: u64,
    pub mem_used: u64,
    pub exit_code: i32,
    pub error_message: String,
    #[serde(rename = "stdout")]
    pub stdout_content: String,
    pub output_len: u64,
    pub allocated_cpu: String,
}

impl Verdict {
    /// A failure of the sandbox itself, before or instead of a run.
    pub fn system_error(message: impl Into<String>) -> Self {
        Verdict {
            status: VerdictStatus::SystemError,
            time_used: 0,
            mem_used: 0,
            exit_code: -1,
            error_message: message.into(),
            stdout_content: String::new(),
            output_len: 0,
            allocated_cpu: String::new(),
        }
    }

    /// A toolchain failure; carries the compiler's combined output and how
    /// long compilation ran before failing.
    pub fn compile_error(message: impl Into<String>, elapsed_ms: u64) -> Self {
        Verdict {
            status: VerdictStatus::CompileError,
            time_used: elapsed_ms,
            mem_used: 0,
            exit_code: -1,
            error_message: message.into(),
            stdout_content: String::new(),
            output_len: 0,
            allocated_cpu: String::new(),
        }
    }
}

/// How the child left the process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited(i32),
    Signaled(i32),
}

/// Program exit code for the verdict: the code itself for a normal exit,
/// `128 + signal` for a signalled one.
pub fn exit_code(wait: WaitOutcome) -> i32 {
    match wait {
        WaitOutcome::Exited(code) => code,
        WaitOutcome::Signaled(signal) => 128 + signal,
    }
}

/// Everything the classifier needs about a finished run.
#[derive(Debug)]
pub struct RunEvidence {
    pub wait: WaitOutcome,
    pub time_used_ms: u64,
    pub mem_used_bytes: u64,
    pub output_len: u64,
    /// True when the kernel recorded an OOM kill inside the run's cgroup.
    pub oom_killed: bool,
    pub stderr_tail: String,
}

/// Classification outcome before flattening to the wire shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ruling {
    Accepted,
    TimeExceeded { message: String },
    MemoryExceeded { message: String },
    OutputExceeded,
    RuntimeFault { message: String },
}

impl Ruling {
    pub fn status(&self) -> VerdictStatus {
        match self {
            Ruling::Accepted => VerdictStatus::Ok,
            Ruling::TimeExceeded { .. } => VerdictStatus::TimeLimit,
            Ruling::MemoryExceeded { .. } => VerdictStatus::MemoryLimit,
            Ruling::OutputExceeded => VerdictStatus::OutputLimit,
            Ruling::RuntimeFault { .. } => VerdictStatus::RuntimeError,
        }
    }

    pub fn into_message(self) -> String {
        match self {
            Ruling::Accepted | Ruling::OutputExceeded => String::new(),
            Ruling::TimeExceeded { message }
            | Ruling::MemoryExceeded { message }
            | Ruling::RuntimeFault { message } => message,
        }
    }
}

/// Map a finished run to a ruling. Pure and total: first matching row wins.
///
/// A clean exit is checked against the limits in time → memory → output
/// order. A signalled exit is interpreted by signal: SIGXCPU is the CPU
/// rlimit backstop; SIGKILL is the kernel OOM killer when the cgroup
/// recorded one (or the peak exceeds the limit), the output cap when the
/// pump stopped reading at the stdout bound, and otherwise the wall-deadline
/// kill; SIGABRT with the peak over the limit is a failed allocation.
pub fn classify(evidence: &RunEvidence, limits: &Limits) -> Ruling {
    match evidence.wait {
        WaitOutcome::Exited(0) => {
            if evidence.time_used_ms > limits.time_limit_ms {
                Ruling::TimeExceeded {
                    message: String::new(),
                }
            } else if evidence.mem_used_bytes > limits.memory_limit_bytes {
                Ruling::MemoryExceeded {
                    message: String::new(),
                }
            } else if evidence.output_len > limits.output_limit_bytes {
                Ruling::OutputExceeded
            } else {
                Ruling::Accepted
            }
        }
        WaitOutcome::Exited(code) => {
            let mut message = format!("Program exited with non-zero code: {}", code);
            if !evidence.stderr_tail.is_empty() {
                message.push_str("\nStderr: ");
                message.push_str(&evidence.stderr_tail);
            }
            Ruling::RuntimeFault { message }
        }
        WaitOutcome::Signaled(signal) => classify_signal(signal, evidence, limits),
    }
}

fn classify_signal(signal: i32, evidence: &RunEvidence, limits: &Limits) -> Ruling {
    match signal {
        libc::SIGXCPU => Ruling::TimeExceeded {
            message: "Time limit exceeded (SIGXCPU)".to_string(),
        },
        libc::SIGKILL => {
            if evidence.oom_killed || evidence.mem_used_bytes > limits.memory_limit_bytes {
                Ruling::MemoryExceeded {
                    message: "Memory limit exceeded (cgroup)".to_string(),
                }
            } else if evidence.output_len > limits.output_limit_bytes {
                Ruling::OutputExceeded
            } else {
                Ruling::TimeExceeded {
                    message: "Time limit exceeded (SIGKILL)".to_string(),
                }
            }
        }
        libc::SIGSEGV => Ruling::RuntimeFault {
            message: "Segmentation fault".to_string(),
        },
        libc::SIGFPE => Ruling::RuntimeFault {
            message: "Floating point exception".to_string(),
        },
        libc::SIGABRT => {
            if evidence.mem_used_bytes > limits.memory_limit_bytes {
                Ruling::MemoryExceeded {
                    message: "Memory limit exceeded (allocation failed)".to_string(),
                }
            } else {
                Ruling::RuntimeFault {
                    message: "Program aborted".to_string(),
                }
            }
        }
        other => Ruling::RuntimeFault {
            message: format!("Program terminated by signal {}", other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Limits {
        Limits {
            time_limit_ms: 1000,
            memory_limit_bytes: 64 * 1024 * 1024,
            output_limit_bytes: 64_000_000,
            compile_timeout_ms: 30_000,
            stack_limit_bytes: 8 * 1024 * 1024,
        }
    }

    fn evidence(wait: WaitOutcome) -> RunEvidence {
        RunEvidence {
            wait,
            time_used_ms: 10,
            mem_used_bytes: 1024 * 1024,
            output_len: 6,
            oom_killed: false,
            stderr_tail: String::new(),
        }
    }

    #[test]
    fn test_clean_exit_within_limits_is_accepted() {
        let ruling = classify(&evidence(WaitOutcome::Exited(0)), &limits());
        assert_eq!(ruling, Ruling::Accepted);
        assert_eq!(ruling.status(), VerdictStatus::Ok);
    }

    #[test]
    fn test_accepted_is_monotone_under_the_limits() {
        // any combination at or under every ceiling stays OK
        let limits = limits();
        for time in [0, 500, 1000] {
            for mem in [0, 1024, limits.memory_limit_bytes] {
                for out in [0, 4096, limits.output_limit_bytes] {
                    let mut ev = evidence(WaitOutcome::Exited(0));
                    ev.time_used_ms = time;
                    ev.mem_used_bytes = mem;
                    ev.output_len = out;
                    assert_eq!(classify(&ev, &limits), Ruling::Accepted);
                }
            }
        }
    }

    #[test]
    fn test_clean_exit_checks_time_before_memory_before_output() {
        let limits = limits();
        let mut ev = evidence(WaitOutcome::Exited(0));
        ev.time_used_ms = limits.time_limit_ms + 1;
        ev.mem_used_bytes = limits.memory_limit_bytes + 1;
        ev.output_len = limits.output_limit_bytes + 1;
        assert_eq!(classify(&ev, &limits).status(), VerdictStatus::TimeLimit);

        ev.time_used_ms = 10;
        assert_eq!(classify(&ev, &limits).status(), VerdictStatus::MemoryLimit);

        ev.mem_used_bytes = 10;
        assert_eq!(classify(&ev, &limits).status(), VerdictStatus::OutputLimit);
    }

    #[test]
    fn test_non_zero_exit_is_runtime_error_with_stderr() {
        let mut ev = evidence(WaitOutcome::Exited(3));
        ev.stderr_tail = "boom".to_string();
        let ruling = classify(&ev, &limits());
        assert_eq!(ruling.status(), VerdictStatus::RuntimeError);
        let message = ruling.into_message();
        assert!(message.contains("non-zero code: 3"));
        assert!(message.contains("Stderr: boom"));
    }

    #[test]
    fn test_sigxcpu_is_time_limit() {
        let ruling = classify(&evidence(WaitOutcome::Signaled(libc::SIGXCPU)), &limits());
        assert_eq!(ruling.status(), VerdictStatus::TimeLimit);
        assert!(ruling.into_message().contains("SIGXCPU"));
    }

    #[test]
    fn test_sigkill_defaults_to_time_limit() {
        let ruling = classify(&evidence(WaitOutcome::Signaled(libc::SIGKILL)), &limits());
        assert_eq!(ruling.status(), VerdictStatus::TimeLimit);
        assert!(ruling.into_message().contains("SIGKILL"));
    }

    #[test]
    fn test_sigkill_with_memory_over_limit_is_memory_limit() {
        let limits = limits();
        let mut ev = evidence(WaitOutcome::Signaled(libc::SIGKILL));
        ev.mem_used_bytes = limits.memory_limit_bytes + 1;
        assert_eq!(classify(&ev, &limits).status(), VerdictStatus::MemoryLimit);
    }

    #[test]
    fn test_sigkill_after_oom_event_is_memory_limit() {
        // memory.peak saturates at memory.max, so the oom_kill event is what
        // distinguishes an OOM kill from a deadline kill
        let mut ev = evidence(WaitOutcome::Signaled(libc::SIGKILL));
        ev.oom_killed = true;
        assert_eq!(classify(&ev, &limits()).status(), VerdictStatus::MemoryLimit);
    }

    #[test]
    fn test_sigkill_past_output_cap_is_output_limit() {
        let limits = limits();
        let mut ev = evidence(WaitOutcome::Signaled(libc::SIGKILL));
        ev.output_len = limits.output_limit_bytes + 1;
        assert_eq!(classify(&ev, &limits).status(), VerdictStatus::OutputLimit);

        // exactly at the cap is acceptable output, so the kill reads as a
        // deadline kill
        ev.output_len = limits.output_limit_bytes;
        assert_eq!(classify(&ev, &limits).status(), VerdictStatus::TimeLimit);
    }

    #[test]
    fn test_fault_signals_are_runtime_errors() {
        let limits = limits();
        let segv = classify(&evidence(WaitOutcome::Signaled(libc::SIGSEGV)), &limits);
        assert_eq!(segv.status(), VerdictStatus::RuntimeError);
        assert_eq!(segv.into_message(), "Segmentation fault");

        let fpe = classify(&evidence(WaitOutcome::Signaled(libc::SIGFPE)), &limits);
        assert_eq!(fpe.into_message(), "Floating point exception");
    }

    #[test]
    fn test_sigabrt_depends_on_memory() {
        let limits = limits();
        let plain = classify(&evidence(WaitOutcome::Signaled(libc::SIGABRT)), &limits);
        assert_eq!(plain.status(), VerdictStatus::RuntimeError);
        assert_eq!(plain.into_message(), "Program aborted");

        let mut ev = evidence(WaitOutcome::Signaled(libc::SIGABRT));
        ev.mem_used_bytes = limits.memory_limit_bytes + 1;
        let oom = classify(&ev, &limits);
        assert_eq!(oom.status(), VerdictStatus::MemoryLimit);
        assert!(oom.into_message().contains("allocation failed"));
    }

    #[test]
    fn test_unknown_signal_names_the_number() {
        let ruling = classify(&evidence(WaitOutcome::Signaled(libc::SIGUSR1)), &limits());
        assert_eq!(ruling.status(), VerdictStatus::RuntimeError);
        assert_eq!(
            ruling.into_message(),
            format!("Program terminated by signal {}", libc::SIGUSR1)
        );
    }

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(exit_code(WaitOutcome::Exited(0)), 0);
        assert_eq!(exit_code(WaitOutcome::Exited(42)), 42);
        assert_eq!(exit_code(WaitOutcome::Signaled(libc::SIGSEGV)), 128 + 11);
        assert_eq!(exit_code(WaitOutcome::Signaled(libc::SIGKILL)), 128 + 9);
    }

    #[test]
    fn test_status_wire_names() {
        let names = [
            (VerdictStatus::Ok, "\"OK\""),
            (VerdictStatus::TimeLimit, "\"TLE\""),
            (VerdictStatus::MemoryLimit, "\"MLE\""),
            (VerdictStatus::OutputLimit, "\"OLE\""),
            (VerdictStatus::RuntimeError, "\"RE\""),
            (VerdictStatus::CompileError, "\"CE\""),
            (VerdictStatus::SystemError, "\"SE\""),
        ];
        for (status, expected) in names {
            assert_eq!(serde_json::to_string(&status).unwrap(), expected);
        }
    }

    #[test]
    fn test_verdict_json_round_trip_with_escaping() {
        let verdict = Verdict {
            status: VerdictStatus::RuntimeError,
            time_used: 12,
            mem_used: 4096,
            exit_code: 139,
            error_message: "tab\there \"quoted\" back\\slash\r\n".to_string(),
            stdout_content: "line one\nline two\t\"end\"\\".to_string(),
            output_len: 25,
            allocated_cpu: "3".to_string(),
        };
        let json = serde_json::to_string(&verdict).unwrap();
        let parsed: Verdict = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, verdict);
    }

    #[test]
    fn test_verdict_wire_field_names() {
        let verdict = Verdict::system_error("cgroup v2 not mounted");
        let json = serde_json::to_string(&verdict).unwrap();
        for field in [
            "\"status\"",
            "\"time_used\"",
            "\"mem_used\"",
            "\"exit_code\"",
            "\"error_message\"",
            "\"stdout\"",
            "\"output_len\"",
            "\"allocated_cpu\"",
        ] {
            assert!(json.contains(field), "missing {} in {}", field, json);
        }
        assert!(!json.contains("stdout_content"));
    }

    #[test]
    fn test_constructor_shapes() {
        let se = Verdict::system_error("fork failed");
        assert_eq!(se.status, VerdictStatus::SystemError);
        assert_eq!(se.exit_code, -1);
        assert_eq!(se.mem_used, 0);

        let ce = Verdict::compile_error("expected ')'", 812);
        assert_eq!(ce.status, VerdictStatus::CompileError);
        assert_eq!(ce.time_used, 812);
        assert_eq!(ce.mem_used, 0);
        assert_eq!(ce.output_len, 0);
    }
}
