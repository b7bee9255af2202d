/// Ephemeral cgroup v2 directory owning one sandboxed run
use std::fmt::Display;
use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::PathBuf;

use log::{debug, warn};
use rand::Rng;

use crate::cpu;
use crate::types::{Result, SandboxError};

/// Mount point of the unified cgroup v2 hierarchy.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Handle for one `judge_<6 digits>` cgroup directory. Construction picks a
/// name but touches nothing on disk; only `create()` does. Teardown removes
/// the directory at most once and swallows errors, so the handle is safe to
/// drop on every exit path.
pub struct Cgroup {
    root: PathBuf,
    name: String,
    created: bool,
}

impl Cgroup {
    pub fn new() -> Self {
        Self::with_root(CGROUP_ROOT)
    }

    /// Same handle against an alternate hierarchy root. Tests point this at
    /// a scratch directory instead of the live kernel filesystem.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let suffix: u32 = rand::thread_rng().gen_range(100_000..=999_999);
        Cgroup {
            root: root.into(),
            name: format!("judge_{}", suffix),
            created: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(&self.name)
    }

    /// Make the cgroup directory. Fails if it already exists, if the caller
    /// lacks privilege, or if cgroup v2 is not mounted at the root; mkdir is
    /// atomic, so failure leaves the handle in the not-created state.
    pub fn create(&mut self) -> Result<()> {
        let path = self.path();
        fs::DirBuilder::new()
            .mode(0o755)
            .create(&path)
            .map_err(|e| {
                SandboxError::Cgroup(format!("Failed to create cgroup {}: {}", path.display(), e))
            })?;
        self.created = true;
        Ok(())
    }

    fn write_file(&self, file: &str, value: impl Display) -> Result<()> {
        let path = self.path().join(file);
        fs::write(&path, value.to_string())
            .map_err(|e| SandboxError::Cgroup(format!("Failed to write {}: {}", path.display(), e)))
    }

    fn read_u64(&self, file: &str) -> Result<u64> {
        let path = self.path().join(file);
        let content = fs::read_to_string(&path)
            .map_err(|e| SandboxError::Cgroup(format!("Failed to read {}: {}", path.display(), e)))?;
        content.trim().parse::<u64>().map_err(|e| {
            SandboxError::Cgroup(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Write the hard memory ceiling to `memory.max`. The kernel OOM-kills
    /// any process in the group that pushes past it.
    pub fn set_memory_limit(&self, limit_bytes: u64) -> Result<()> {
        self.write_file("memory.max", limit_bytes)
    }

    /// Confine the group to a single logical CPU. Enables the `cpuset`
    /// controller in the parent (duplicate adds are kernel-idempotent, so a
    /// failed write is only logged), writes the selected CPU id to
    /// `cpuset.cpus`, and mirrors the parent's effective memory nodes.
    pub fn set_cpu_limit(&self) -> Result<()> {
        let subtree = self.root.join("cgroup.subtree_control");
        if let Err(e) = fs::write(&subtree, "+cpuset") {
            debug!("cpuset subtree enable skipped: {}", e);
        }

        let cpu_id = cpu::select_cpu(&self.name);
        self.write_file("cpuset.cpus", cpu_id)?;

        let mems = fs::read_to_string(self.root.join("cpuset.mems.effective"))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        let mems = if mems.is_empty() { "0".to_string() } else { mems };
        self.write_file("cpuset.mems", mems)
    }

    /// Attach a process to the group. Every later descendant of the process
    /// inherits the membership.
    pub fn add_process(&self, pid: i32) -> Result<()> {
        self.write_file("cgroup.procs", pid)
    }

    /// Peak resident memory of the group since creation. This is the
    /// authoritative memory-limit metric; rusage undercounts short spikes.
    pub fn memory_peak(&self) -> Result<u64> {
        self.read_u64("memory.peak")
    }

    pub fn memory_current(&self) -> Result<u64> {
        self.read_u64("memory.current")
    }

    /// Number of OOM kills the kernel delivered inside the group, from
    /// `memory.events`. Zero when the file is absent or unreadable.
    pub fn oom_kill_count(&self) -> u64 {
        let content = match fs::read_to_string(self.path().join("memory.events")) {
            Ok(content) => content,
            Err(_) => return 0,
        };
        for line in content.lines() {
            let mut parts = line.split_whitespace();
            if let (Some("oom_kill"), Some(value)) = (parts.next(), parts.next()) {
                return value.parse().unwrap_or(0);
            }
        }
        0
    }

    /// Read back `cpuset.cpus` for reporting. Empty string when unset or
    /// unreadable.
    pub fn allocated_cpu(&self) -> String {
        fs::read_to_string(self.path().join("cpuset.cpus"))
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    /// Remove the cgroup directory. Attempted exactly once per created
    /// handle; rmdir requires the group to hold no processes.
    pub fn cleanup(&mut self) -> Result<()> {
        if !self.created {
            return Ok(());
        }
        self.created = false;
        let path = self.path();
        fs::remove_dir(&path).map_err(|e| {
            SandboxError::Cgroup(format!("Failed to remove cgroup {}: {}", path.display(), e))
        })
    }
}

impl Drop for Cgroup {
    fn drop(&mut self) {
        if self.created {
            if let Err(e) = self.cleanup() {
                warn!("cgroup teardown: {}", e);
            }
        }
    }
}
