/// Resource limit loading from the limits JSON file
use std::fs;
use std::path::Path;

use log::warn;
use serde::Deserialize;

pub const DEFAULT_TIME_LIMIT_MS: u64 = 1000;
pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 64 * 1024 * 1024;
pub const DEFAULT_OUTPUT_LIMIT_BYTES: u64 = 64_000_000;
pub const DEFAULT_COMPILE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_STACK_LIMIT_BYTES: u64 = 8 * 1024 * 1024;

/// Per-run resource ceilings. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Wall/CPU deadline for the target program, in milliseconds
    pub time_limit_ms: u64,
    /// Hard memory ceiling enforced by the cgroup, in bytes
    pub memory_limit_bytes: u64,
    /// Maximum stdout bytes accepted from the child (stderr independently)
    pub output_limit_bytes: u64,
    /// Wall deadline for the compile step, in milliseconds
    pub compile_timeout_ms: u64,
    /// Per-process stack rlimit installed in the child, in bytes
    pub stack_limit_bytes: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            time_limit_ms: DEFAULT_TIME_LIMIT_MS,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            compile_timeout_ms: DEFAULT_COMPILE_TIMEOUT_MS,
            stack_limit_bytes: DEFAULT_STACK_LIMIT_BYTES,
        }
    }
}

/// On-disk limits file. All keys optional; `memory_limit` and `stack_limit`
/// are in kilobytes, the rest already in their final unit.
#[derive(Debug, Default, Deserialize)]
struct RawLimits {
    time_limit: Option<i64>,
    memory_limit: Option<i64>,
    output_limit: Option<i64>,
    compile_timeout: Option<i64>,
    stack_limit: Option<i64>,
}

impl Limits {
    /// Load limits from a JSON file. A missing or unparseable file degrades
    /// to the defaults rather than failing the whole run; individual missing
    /// or non-positive values fall back per key.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("limits file {} unreadable ({}), using defaults", path.display(), e);
                return Limits::default();
            }
        };

        let raw: RawLimits = match serde_json::from_str(&content) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("limits file {} malformed ({}), using defaults", path.display(), e);
                return Limits::default();
            }
        };

        Limits::from_raw(raw)
    }

    fn from_raw(raw: RawLimits) -> Self {
        Limits {
            time_limit_ms: positive(raw.time_limit).unwrap_or(DEFAULT_TIME_LIMIT_MS),
            memory_limit_bytes: positive(raw.memory_limit)
                .map(|kb| kb * 1024)
                .unwrap_or(DEFAULT_MEMORY_LIMIT_BYTES),
            output_limit_bytes: positive(raw.output_limit).unwrap_or(DEFAULT_OUTPUT_LIMIT_BYTES),
            compile_timeout_ms: positive(raw.compile_timeout).unwrap_or(DEFAULT_COMPILE_TIMEOUT_MS),
            stack_limit_bytes: positive(raw.stack_limit)
                .map(|kb| kb * 1024)
                .unwrap_or(DEFAULT_STACK_LIMIT_BYTES),
        }
    }
}

fn positive(value: Option<i64>) -> Option<u64> {
    value.filter(|v| *v > 0).map(|v| v as u64)
}
