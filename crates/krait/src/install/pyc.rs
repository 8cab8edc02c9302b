//! Bytecode compilation of freshly linked python sources.

use std::{
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

/// Compiles the given `.py` files (paths relative to the prefix) with the
/// prefix's own interpreter. A single long-lived `compileall` process is fed
/// the file list over stdin.
///
/// Compilation failures are expected for some packages (python 2 syntax
/// examples and the like) and must never fail a transaction, so this only
/// reports whether the interpreter could be driven at all.
pub fn compile_pyc(
    target_prefix: &Path,
    python_path: &Path,
    files: &[PathBuf],
) -> std::io::Result<()> {
    if files.is_empty() {
        return Ok(());
    }

    let mut child = Command::new(target_prefix.join(python_path))
        .args(["-Wi", "-m", "compileall", "-q", "-l", "-i", "-"])
        .current_dir(target_prefix)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    {
        let mut stdin = child.stdin.take().expect("stdin was requested above");
        for file in files {
            writeln!(stdin, "{}", file.display())?;
        }
        // Dropping stdin closes the pipe and lets compileall finish.
    }

    let status = child.wait()?;
    if !status.success() {
        // Individual modules failing to compile is normal; log and move on.
        tracing::warn!("pyc compilation finished with {status}");
    }
    Ok(())
}
