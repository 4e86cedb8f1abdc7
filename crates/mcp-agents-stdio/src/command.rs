//! Server command resolution.

use std::path::{Path, PathBuf};

use mcp_agents_core::SessionError;

/// How to launch an MCP server process.
///
/// `path` is the server file. With an `interpreter` (e.g. `python` or
/// `uv run python`) the interpreter is resolved on `PATH` and `path` becomes
/// its first argument; without one `path` must itself be executable.
#[derive(Debug, Clone, Default)]
pub struct ServerCommand {
    pub path: PathBuf,
    pub interpreter: Option<String>,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
}

/// Resolved program plus arguments, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ServerCommand {
    /// Create a command for a server file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Run the server file through an interpreter command line.
    #[must_use]
    pub fn interpreter<S: Into<String>>(mut self, interpreter: S) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// Extend arguments passed after the server file.
    #[must_use]
    pub fn args<I>(mut self, more: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.args.extend(more.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the child's working directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Resolve the program and argument list.
    ///
    /// # Errors
    /// Returns `NotFound` if the server file is missing, is not executable
    /// (without an interpreter), or the interpreter is not on `PATH`.
    pub async fn resolve(&self) -> Result<CommandParts, SessionError> {
        let path = tokio::fs::canonicalize(&self.path).await.map_err(|e| {
            SessionError::NotFound(format!("{}: {e}", self.path.display()))
        })?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| SessionError::NotFound(format!("{}: {e}", path.display())))?;
        if !metadata.is_file() {
            return Err(SessionError::NotFound(format!(
                "{} is not a file",
                path.display()
            )));
        }

        let Some(ref interpreter) = self.interpreter else {
            if !is_executable(&metadata) {
                return Err(SessionError::NotFound(format!(
                    "{} is not executable",
                    path.display()
                )));
            }
            return Ok(CommandParts {
                program: path,
                args: self.args.clone(),
            });
        };

        let mut parts = split_command_line(interpreter)?;
        let program = parts.remove(0);
        let program = resolve_executable_path(&program)
            .await
            .ok_or_else(|| SessionError::NotFound(format!("interpreter not found: {program}")))?;

        parts.push(path.to_string_lossy().into_owned());
        parts.extend(self.args.iter().cloned());
        Ok(CommandParts {
            program,
            args: parts,
        })
    }
}

/// Resolve an executable by name.
///
/// Explicit paths (absolute or containing a separator) are checked directly;
/// bare names are searched on the current `PATH`.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.is_absolute() || path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }

    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}

fn split_command_line(input: &str) -> Result<Vec<String>, SessionError> {
    let parts = shlex::split(input)
        .ok_or_else(|| SessionError::NotFound(format!("interpreter cannot be parsed: {input}")))?;
    if parts.is_empty() {
        return Err(SessionError::NotFound("interpreter is empty".into()));
    }
    Ok(parts)
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let err = ServerCommand::new("/definitely/not/here.py")
            .interpreter("sh")
            .resolve()
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServerCommand::new(dir.path()).resolve().await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_plain_file_without_interpreter_is_not_executable() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "print('hi')").unwrap();
        let err = ServerCommand::new(file.path()).resolve().await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(msg) if msg.contains("not executable")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_interpreter_line_is_split_and_resolved() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let parts = ServerCommand::new(file.path())
            .interpreter("sh -e")
            .args(["--verbose"])
            .resolve()
            .await
            .unwrap();

        assert!(parts.program.ends_with("sh"));
        assert_eq!(parts.args[0], "-e");
        assert!(parts.args[1].ends_with(
            file.path().file_name().unwrap().to_str().unwrap()
        ));
        assert_eq!(parts.args[2], "--verbose");
    }

    #[tokio::test]
    async fn test_unknown_interpreter_is_not_found() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = ServerCommand::new(file.path())
            .interpreter("no-such-interpreter-xyz")
            .resolve()
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotFound(msg) if msg.contains("interpreter")));
    }
}
