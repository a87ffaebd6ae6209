//! Project-root discovery and external-process execution, generalizing the
//! teacher's `cmd::command` (`QoveryCommand`/`CommandKiller`) into a smaller
//! surface scoped to what the module resolver and bundler need: find the
//! project root, and run a process to completion with a bounded timeout.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::errors::ConfigResolutionError;

pub const WINDSOR_PROJECT_ROOT_VAR: &str = "WINDSOR_PROJECT_ROOT";
pub const WINDSOR_CONTEXT_VAR: &str = "WINDSOR_CONTEXT";

/// Marker file identifying a directory as a Windsor project root, the same
/// role a `.git` directory plays for git.
const PROJECT_MARKER_DIR: &str = ".windsor";

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with status {status}: {stderr}")]
    ExitStatus {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("`{program}` timed out after {elapsed:?}")]
    Timeout { program: String, elapsed: Duration },
}

/// Project-root discovery plus external-process execution. Owns nothing
/// mutable; every method either reads the environment/filesystem or spawns a
/// subprocess.
#[derive(Clone, Debug)]
pub struct Shell {
    project_root: PathBuf,
}

impl Shell {
    pub fn new(project_root: PathBuf) -> Self {
        Shell { project_root }
    }

    /// Resolves the project root from `WINDSOR_PROJECT_ROOT`, falling back to
    /// walking up from the current directory looking for a `.windsor`
    /// marker directory.
    pub fn discover() -> Result<Self, ConfigResolutionError> {
        if let Ok(root) = std::env::var(WINDSOR_PROJECT_ROOT_VAR) {
            return Ok(Shell::new(PathBuf::from(root)));
        }

        let cwd = std::env::current_dir().map_err(|err| ConfigResolutionError::ProjectRootNotFound {
            reason: err.to_string(),
        })?;

        let mut candidate = cwd.as_path();
        loop {
            if candidate.join(PROJECT_MARKER_DIR).is_dir() {
                return Ok(Shell::new(candidate.to_path_buf()));
            }
            match candidate.parent() {
                Some(parent) => candidate = parent,
                None => {
                    return Err(ConfigResolutionError::ProjectRootNotFound {
                        reason: format!("no `{PROJECT_MARKER_DIR}` directory found above {}", cwd.display()),
                    });
                }
            }
        }
    }

    /// Resolves the current context name from `WINDSOR_CONTEXT`, falling
    /// back to the caller-supplied stored default.
    pub fn current_context(stored_default: Option<&str>) -> Result<String, ConfigResolutionError> {
        match std::env::var(WINDSOR_CONTEXT_VAR) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => stored_default.map(str::to_string).ok_or(ConfigResolutionError::MissingKey {
                key: WINDSOR_CONTEXT_VAR.to_string(),
            }),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Runs `program` to completion, returning captured stdout. Stderr is
    /// captured only to annotate a non-zero exit or timeout.
    pub fn exec(
        &self,
        program: &str,
        args: &[&str],
        cwd: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<String, ShellError> {
        debug!("running `{} {}`", program, args.join(" "));

        let mut command = Command::new(program);
        command.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(dir) = cwd.or(Some(self.project_root.as_path())) {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| ShellError::Spawn {
            program: program.to_string(),
            source,
        })?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");
        let stdout_lines = std::thread::spawn(move || read_all_lines(stdout));
        let stderr_lines = std::thread::spawn(move || read_all_lines(stderr));

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().map_err(|source| ShellError::Spawn {
                program: program.to_string(),
                source,
            })? {
                break status;
            }

            if let Some(timeout) = timeout {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ShellError::Timeout {
                        program: program.to_string(),
                        elapsed: start.elapsed(),
                    });
                }
            }

            std::thread::sleep(Duration::from_millis(25));
        };

        let stdout_text = stdout_lines.join().unwrap_or_default().join("\n");
        let stderr_text = stderr_lines.join().unwrap_or_default().join("\n");

        if !status.success() {
            return Err(ShellError::ExitStatus {
                program: program.to_string(),
                status,
                stderr: stderr_text,
            });
        }

        Ok(stdout_text)
    }
}

fn read_all_lines(reader: impl std::io::Read) -> Vec<String> {
    BufReader::new(reader).lines().map_while(Result::ok).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_project_root_from_env_var() {
        // SAFETY: this test owns the process-wide env var for its duration;
        // cargo test runs each test in its own thread but env vars are
        // process-global, so this test avoids asserting on another test's
        // view of WINDSOR_PROJECT_ROOT by only reading it back immediately.
        let dir = tempfile::tempdir().unwrap();
        unsafe {
            std::env::set_var(WINDSOR_PROJECT_ROOT_VAR, dir.path());
        }
        let shell = Shell::discover().unwrap();
        assert_eq!(shell.project_root(), dir.path());
        unsafe {
            std::env::remove_var(WINDSOR_PROJECT_ROOT_VAR);
        }
    }

    #[test]
    fn exec_captures_stdout() {
        let shell = Shell::new(std::env::temp_dir());
        let output = shell.exec("echo", &["hello"], None, None).unwrap();
        assert_eq!(output.trim(), "hello");
    }

    #[test]
    fn exec_surfaces_non_zero_exit() {
        let shell = Shell::new(std::env::temp_dir());
        let err = shell.exec("false", &[], None, None).unwrap_err();
        assert!(matches!(err, ShellError::ExitStatus { .. }));
    }
}
