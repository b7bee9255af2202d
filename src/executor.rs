/// Sandboxed execution of one compiled submission
///
/// The parent configures an ephemeral cgroup, forks, attaches the child to
/// the cgroup before draining any output, pumps the child's stdout/stderr
/// under a wall deadline, reaps it, and classifies the termination.
use std::ffi::{CStr, CString};
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::{Duration, Instant};

use log::{debug, warn};
use nix::sched::{sched_setaffinity, CpuSet};
use nix::unistd::{self, ForkResult, Pid};

use crate::cgroup::Cgroup;
use crate::config::Limits;
use crate::types::{Result, SandboxError};
use crate::verdict::{classify, exit_code, RunEvidence, Verdict, WaitOutcome};

/// Read granularity for the output pump.
const PIPE_READ_CHUNK: usize = 4096;

/// Grace added to the wall deadline so a just-over-limit program is still
/// reaped cleanly instead of racing the classifier.
const REAP_GRACE_MS: u64 = 1000;

/// Run a compiled executable against an input file under the given limits.
/// Infrastructure failures (cgroup, fork, pipes, wait) surface as errors;
/// everything the child itself does comes back inside the verdict.
pub fn run_program(executable: &Path, input_file: &Path, limits: &Limits) -> Result<Verdict> {
    if !unistd::Uid::effective().is_root() {
        return Err(SandboxError::Privilege(
            "root is required to manage the cgroup v2 hierarchy".to_string(),
        ));
    }

    let mut cgroup = Cgroup::new();
    cgroup.create()?;
    // limits must be in place before any process joins the group
    cgroup.set_memory_limit(limits.memory_limit_bytes)?;
    cgroup.set_cpu_limit()?;
    let allocated_cpu = cgroup.allocated_cpu();

    let (stdout_read, stdout_write) = unistd::pipe()
        .map_err(|e| SandboxError::Process(format!("Failed to create stdout pipe: {}", e)))?;
    let (stderr_read, stderr_write) = unistd::pipe()
        .map_err(|e| SandboxError::Process(format!("Failed to create stderr pipe: {}", e)))?;

    // everything the child touches is prepared before fork; the child must
    // stay on async-signal-safe ground until exec
    let exec_path = c_path(executable)?;
    let input_path = c_path(input_file)?;

    let start = Instant::now();

    match unsafe { unistd::fork() } {
        Ok(ForkResult::Child) => child_exec(
            &exec_path,
            &input_path,
            [
                stdout_read.as_raw_fd(),
                stdout_write.as_raw_fd(),
                stderr_read.as_raw_fd(),
                stderr_write.as_raw_fd(),
            ],
            limits,
        ),
        Ok(ForkResult::Parent { child }) => {
            drop(stdout_write);
            drop(stderr_write);
            supervise(
                child,
                cgroup,
                stdout_read,
                stderr_read,
                start,
                limits,
                allocated_cpu,
            )
        }
        Err(e) => Err(SandboxError::Process(format!("Failed to fork: {}", e))),
    }
}

fn c_path(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| SandboxError::Config(format!("path contains NUL byte: {}", path.display())))
}

/// Child side, between fork and exec. Order is fixed: stdin from the input
/// file, pipe write ends onto fd 1/2, every pipe fd closed, rlimits, exec.
/// Raw libc only; the process image is about to be replaced and exits with
/// code 1 if it cannot be.
fn child_exec(exec_path: &CStr, input_path: &CStr, pipe_fds: [RawFd; 4], limits: &Limits) -> ! {
    let [stdout_read, stdout_write, stderr_read, stderr_write] = pipe_fds;

    unsafe {
        let input_fd = libc::open(input_path.as_ptr(), libc::O_RDONLY);
        if input_fd < 0 {
            libc::_exit(1);
        }
        libc::dup2(input_fd, libc::STDIN_FILENO);
        libc::close(input_fd);

        libc::dup2(stdout_write, libc::STDOUT_FILENO);
        libc::dup2(stderr_write, libc::STDERR_FILENO);
        libc::close(stdout_read);
        libc::close(stdout_write);
        libc::close(stderr_read);
        libc::close(stderr_write);
    }

    install_rlimits(limits);

    // no arguments forwarded; environment inherited
    let argv = [exec_path];
    let _ = unistd::execv(exec_path, &argv);
    unsafe { libc::_exit(1) }
}

fn set_rlimit(resource: libc::__rlimit_resource_t, soft: u64, hard: u64) {
    let limit = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    // best-effort: the cgroup and the pump enforce the authoritative limits
    unsafe { libc::setrlimit(resource, &limit) };
}

/// Rlimits installed in the child. The CPU rlimit is a coarse backstop (the
/// pump holds the precise wall deadline); FSIZE bounds file writes; NPROC=1
/// forbids fork bombs, although as a per-user limit it is only best-effort.
fn install_rlimits(limits: &Limits) {
    let cpu_secs = limits.time_limit_ms.div_ceil(1000);
    set_rlimit(libc::RLIMIT_CPU, cpu_secs, cpu_secs + 1);
    set_rlimit(
        libc::RLIMIT_STACK,
        limits.stack_limit_bytes,
        limits.stack_limit_bytes,
    );
    set_rlimit(
        libc::RLIMIT_FSIZE,
        limits.output_limit_bytes,
        limits.output_limit_bytes,
    );
    set_rlimit(libc::RLIMIT_NPROC, 1, 1);
}

/// Parent side: attach, pin, pump, reap, classify, tear down.
fn supervise(
    child: Pid,
    mut cgroup: Cgroup,
    stdout_read: OwnedFd,
    stderr_read: OwnedFd,
    start: Instant,
    limits: &Limits,
    allocated_cpu: String,
) -> Result<Verdict> {
    let mut warnings: Vec<&str> = Vec::new();

    // the child may run a few instructions outside the group, but it must be
    // a member before we drain a single byte so its memory is all accounted
    if let Err(e) = cgroup.add_process(child.as_raw()) {
        unsafe {
            libc::kill(child.as_raw(), libc::SIGKILL);
            let mut status: libc::c_int = 0;
            libc::waitpid(child.as_raw(), &mut status, 0);
        }
        return Err(e);
    }

    // the cpuset already confines the child, so affinity failure is
    // non-fatal
    match allocated_cpu.parse::<usize>() {
        Ok(cpu_id) => {
            let mut cpu_set = CpuSet::new();
            let pinned = cpu_set
                .set(cpu_id)
                .and_then(|_| sched_setaffinity(child, &cpu_set));
            if let Err(e) = pinned {
                warn!("sched_setaffinity to cpu {} failed: {}", cpu_id, e);
                warnings.push("Warning: Failed to set CPU affinity");
            }
        }
        Err(_) => debug!("cpuset.cpus not a single id ({:?}), skipping affinity", allocated_cpu),
    }

    let deadline = start + Duration::from_millis(limits.time_limit_ms + REAP_GRACE_MS);
    let pump = pump_output(
        stdout_read.as_raw_fd(),
        stderr_read.as_raw_fd(),
        deadline,
        limits.output_limit_bytes,
    );

    if !pump.drained {
        // deadline or output cap hit with the streams still open
        unsafe { libc::kill(child.as_raw(), libc::SIGKILL) };
    }

    let mut status: libc::c_int = 0;
    let mut rusage = MaybeUninit::<libc::rusage>::zeroed();
    let rc = unsafe { libc::wait4(child.as_raw(), &mut status, 0, rusage.as_mut_ptr()) };
    if rc == -1 {
        return Err(SandboxError::Process(format!(
            "Failed to wait for child process: {}",
            std::io::Error::last_os_error()
        )));
    }
    let rusage = unsafe { rusage.assume_init() };

    let time_used_ms = start.elapsed().as_millis() as u64;

    // the child has terminated, so the kernel's accounting is final
    let mem_used_bytes = match cgroup.memory_peak() {
        Ok(peak) => peak,
        Err(e) => {
            debug!("memory.peak unavailable ({}), falling back to rusage", e);
            // ru_maxrss is kilobytes on Linux
            (rusage.ru_maxrss as u64) * 1024
        }
    };
    let oom_killed = cgroup.oom_kill_count() > 0;

    let evidence = RunEvidence {
        wait: decode_wait_status(status)?,
        time_used_ms,
        mem_used_bytes,
        output_len: pump.stdout.len() as u64,
        oom_killed,
        stderr_tail: String::from_utf8_lossy(&pump.stderr).into_owned(),
    };
    let ruling = classify(&evidence, limits);

    // rmdir needs the group empty, which wait4 just guaranteed
    if let Err(e) = cgroup.cleanup() {
        warn!("cgroup removal failed: {}", e);
        warnings.push("Warning: Failed to remove cgroup");
    }

    let mut error_message = ruling.clone().into_message();
    for warning in warnings {
        if !error_message.is_empty() {
            error_message.push('\n');
        }
        error_message.push_str(warning);
    }

    Ok(Verdict {
        status: ruling.status(),
        time_used: time_used_ms,
        mem_used: mem_used_bytes,
        exit_code: exit_code(evidence.wait),
        error_message,
        stdout_content: String::from_utf8_lossy(&pump.stdout).into_owned(),
        output_len: evidence.output_len,
        allocated_cpu,
    })
}

fn decode_wait_status(status: libc::c_int) -> Result<WaitOutcome> {
    if libc::WIFEXITED(status) {
        Ok(WaitOutcome::Exited(libc::WEXITSTATUS(status)))
    } else if libc::WIFSIGNALED(status) {
        Ok(WaitOutcome::Signaled(libc::WTERMSIG(status)))
    } else {
        Err(SandboxError::Process(format!(
            "unexpected wait status {:#x}",
            status
        )))
    }
}

struct PumpResult {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    /// Both streams reached EOF before the loop stopped.
    drained: bool,
}

/// Drain both pipes until EOF, the deadline, or the stdout byte cap. Never
/// blocks past the remaining wall budget and never buffers more than the cap
/// plus one read, so a misbehaving child cannot stall or balloon the parent.
/// Stderr past the cap keeps draining but is discarded, which bounds the
/// retained tail without blocking the child on a full pipe. Killing is the
/// reaper's job, not the pump's.
fn pump_output(stdout_fd: RawFd, stderr_fd: RawFd, deadline: Instant, stdout_cap: u64) -> PumpResult {
    let mut stdout_buf: Vec<u8> = Vec::new();
    let mut stderr_buf: Vec<u8> = Vec::new();
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut chunk = [0u8; PIPE_READ_CHUNK];

    while stdout_open || stderr_open {
        if stdout_buf.len() as u64 > stdout_cap {
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let timeout_ms = deadline
            .duration_since(now)
            .as_millis()
            .min(i32::MAX as u128) as libc::c_int;

        let mut fds: Vec<libc::pollfd> = Vec::with_capacity(2);
        if stdout_open {
            fds.push(libc::pollfd {
                fd: stdout_fd,
                events: libc::POLLIN,
                revents: 0,
            });
        }
        if stderr_open {
            fds.push(libc::pollfd {
                fd: stderr_fd,
                events: libc::POLLIN,
                revents: 0,
            });
        }

        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc == 0 {
            break; // wall budget exhausted
        }
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            break;
        }

        for pfd in &fds {
            if pfd.revents == 0 {
                continue;
            }
            let (buf, open) = if pfd.fd == stdout_fd {
                (&mut stdout_buf, &mut stdout_open)
            } else {
                (&mut stderr_buf, &mut stderr_open)
            };
            let n = unsafe {
                libc::read(pfd.fd, chunk.as_mut_ptr() as *mut libc::c_void, chunk.len())
            };
            if n > 0 {
                buf.extend_from_slice(&chunk[..n as usize]);
                if pfd.fd == stderr_fd && buf.len() as u64 > stdout_cap {
                    buf.truncate(stdout_cap as usize);
                }
            } else if n == 0 {
                *open = false;
            } else {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::EINTR) {
                    *open = false;
                }
            }
        }
    }

    PumpResult {
        stdout: stdout_buf,
        stderr: stderr_buf,
        drained: !stdout_open && !stderr_open,
    }
}
