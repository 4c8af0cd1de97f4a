//! Running the external command line tools the coupler delegates to.
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use itertools::Itertools;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Could not start {}: {reason}", .program.display())]
    Spawn { program: PathBuf, reason: String },
    #[error("{} exited with {status}: {stderr}", .program.display())]
    Failed { program: PathBuf, status: String, stderr: String },
    #[error("Could not interpret output of {}: {reason}", .program.display())]
    BadOutput { program: PathBuf, reason: String },
}

/// Run `program` with `args` to completion and return its standard output.
///
/// A nonzero exit status is an error carrying the captured standard error.
/// With a `workdir`, the tool runs there and uses it as its temporary directory.
/// There is no timeout; the call blocks until the tool exits.
pub(crate) fn run_tool(program: &Path, args: &[OsString], workdir: Option<&Path>) -> Result<String, ToolError> {
    log::debug!(
        "Running: {} {}",
        program.display(),
        args.iter().map(|a| a.to_string_lossy()).join(" ")
    );

    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = workdir {
        cmd.current_dir(dir).env("TMPDIR", dir);
    }

    let output = cmd.output().map_err(|e| ToolError::Spawn {
        program: program.to_path_buf(),
        reason: e.to_string(),
    })?;

    if !output.status.success() {
        return Err(ToolError::Failed {
            program: program.to_path_buf(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    String::from_utf8(output.stdout).map_err(|e| ToolError::BadOutput {
        program: program.to_path_buf(),
        reason: e.to_string(),
    })
}
