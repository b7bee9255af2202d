/// Single-CPU selection for sandbox pinning
///
/// Each sandbox run is confined to one logical CPU so every submission sees
/// the same execution environment. Selection only needs to spread concurrent
/// runs across cores; two runs landing on the same core is acceptable.
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of logical CPUs the host exposes, counted from /proc/cpuinfo.
/// Falls back to 1 when the file is unreadable.
pub fn logical_cpu_count() -> usize {
    match fs::read_to_string("/proc/cpuinfo") {
        Ok(content) => count_processors(&content),
        Err(_) => 1,
    }
}

fn count_processors(cpuinfo: &str) -> usize {
    let count = cpuinfo
        .lines()
        .filter(|line| line.starts_with("processor"))
        .count();
    count.max(1)
}

/// Pick one CPU id in `[0, N)` for the given cgroup name. The name is already
/// random; mixing in a nanosecond timestamp spreads runs that share a name
/// prefix or start in the same scheduler tick.
pub fn select_cpu(name: &str) -> usize {
    let cpus = logical_cpu_count() as u64;
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    ((hasher.finish() ^ nanos) % cpus) as usize
}
