/// Toolchain invocation for the compile step
///
/// External boundary of the sandbox core: compile one source file into an
/// executable, capture the toolchain's combined output, and enforce a wall
/// deadline. Exit semantics: zero is success, anything else (including a
/// deadline kill) is a compile failure carrying the output as its message.
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::config::Limits;

pub const COMPILER: &str = "g++";
pub const COMPILER_FLAGS: &[&str] = &[
    "-g",
    "-std=c++20",
    "-O2",
    "-Wall",
    "-Wextra",
    "-Wshadow",
    "-Wconversion",
    "-Wfloat-equal",
];

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub enum CompileOutcome {
    Success { elapsed_ms: u64 },
    Failure { message: String, elapsed_ms: u64 },
}

/// Compile `source` into `output` under the configured compile deadline.
pub fn compile(source: &Path, output: &Path, limits: &Limits) -> CompileOutcome {
    let start = Instant::now();

    let mut command = Command::new(COMPILER);
    command
        .args(COMPILER_FLAGS)
        .arg(source)
        .arg("-o")
        .arg(output)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return CompileOutcome::Failure {
                message: format!("Failed to create compilation process: {}", e),
                elapsed_ms: start.elapsed().as_millis() as u64,
            }
        }
    };

    // drain both streams off-thread so a chatty compiler cannot fill the
    // pipe buffer and deadlock against try_wait
    let stdout_handle = child.stdout.take().map(|mut stream| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stream.read_to_end(&mut buf);
            buf
        })
    });
    let stderr_handle = child.stderr.take().map(|mut stream| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stream.read_to_end(&mut buf);
            buf
        })
    });

    let deadline = start + Duration::from_millis(limits.compile_timeout_ms);
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    break None;
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return CompileOutcome::Failure {
                    message: format!("Failed to monitor compilation process: {}", e),
                    elapsed_ms: start.elapsed().as_millis() as u64,
                };
            }
        }
    };

    let mut combined = Vec::new();
    if let Some(handle) = stdout_handle {
        combined.extend(handle.join().unwrap_or_default());
    }
    if let Some(handle) = stderr_handle {
        combined.extend(handle.join().unwrap_or_default());
    }

    let elapsed_ms = start.elapsed().as_millis() as u64;

    let status = match status {
        Some(status) => status,
        None => {
            return CompileOutcome::Failure {
                message: "Compilation timeout".to_string(),
                elapsed_ms,
            }
        }
    };

    if !status.success() {
        return CompileOutcome::Failure {
            message: String::from_utf8_lossy(&combined).into_owned(),
            elapsed_ms,
        };
    }
    if elapsed_ms > limits.compile_timeout_ms {
        return CompileOutcome::Failure {
            message: "Compilation timeout".to_string(),
            elapsed_ms,
        };
    }

    debug!("compiled {} in {} ms", source.display(), elapsed_ms);
    CompileOutcome::Success { elapsed_ms }
}
