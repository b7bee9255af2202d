/// One full judging call: limits → compile → sandboxed run → verdict
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::compile::{self, CompileOutcome};
use crate::config::Limits;
use crate::executor;
use crate::verdict::Verdict;

/// Judge one submission. Always produces a verdict: compile failures become
/// CE, sandbox infrastructure failures become SE, everything else reflects
/// how the program actually ran.
pub fn judge(limits_file: &Path, source_file: &Path, input_file: &Path) -> Verdict {
    let limits = Limits::load(limits_file);

    let executable = compile_product_path(source_file);
    match compile::compile(source_file, &executable, &limits) {
        CompileOutcome::Failure {
            message,
            elapsed_ms,
        } => return Verdict::compile_error(message, elapsed_ms),
        CompileOutcome::Success { elapsed_ms } => {
            debug!("compile step finished in {} ms", elapsed_ms)
        }
    }

    let verdict = match executor::run_program(&executable, input_file, &limits) {
        Ok(verdict) => verdict,
        Err(e) => Verdict::system_error(format!("System error: {}", e)),
    };

    // the compile product lives next to the source; remove it on the way out
    if let Err(e) = fs::remove_file(&executable) {
        warn!(
            "failed to remove compile product {}: {}",
            executable.display(),
            e
        );
    }

    verdict
}

/// The executable is written alongside the source as `<source>.out`.
fn compile_product_path(source: &Path) -> PathBuf {
    let mut path = source.as_os_str().to_os_string();
    path.push(".out");
    PathBuf::from(path)
}
