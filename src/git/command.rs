//! Spawning git and classifying how it exited

use std::{
    ffi::{OsStr, OsString},
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use crate::error::{Error, Result};

/// Handle on a git repository, used to build plumbing commands
#[derive(Debug, Clone)]
pub struct Git {
    program: PathBuf,
    workdir: PathBuf,
}

/// Output of a git invocation whose exit status was accepted
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub code: i32,
    pub stdout: Vec<u8>,
}

impl GitOutput {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

impl Git {
    pub fn new<P: Into<PathBuf>, W: Into<PathBuf>>(program: P, workdir: W) -> Self {
        Self {
            program: program.into(),
            workdir: workdir.into(),
        }
    }

    /// Find the top level of the work tree containing `start`
    pub fn discover<P: Into<PathBuf>>(program: P, start: &Path) -> Result<Self> {
        let candidate = Git::new(program, start);
        let toplevel = candidate
            .command("locate the Git work tree")
            .args(["rev-parse", "--show-toplevel"])
            .run_text()?;
        let toplevel = toplevel.trim();
        if toplevel.is_empty() {
            return Err(Error::Output {
                operation: "locate the Git work tree".to_string(),
                message: "empty path".to_string(),
            });
        }
        Ok(Git::new(candidate.program, toplevel))
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Start building a command; `operation` completes the sentence "Unable to ..."
    pub fn command(&self, operation: impl Into<String>) -> GitCommand<'_> {
        GitCommand {
            git: self,
            args: Vec::new(),
            operation: operation.into(),
            stdin: None,
        }
    }

    /// Resolve `rev` to a full object name, or `None` when it does not exist
    pub fn rev_parse_optional(&self, rev: &str) -> Result<Option<String>> {
        let output = self
            .command(format!("resolve '{}' to a commit hash", rev))
            .args(["rev-parse", "--verify", "--quiet"])
            .arg(format!("{}^{{commit}}", rev))
            .run_accepting(&[0, 1])?;
        let hash = output.text().trim().to_string();
        if output.code != 0 || hash.is_empty() {
            return Ok(None);
        }
        Ok(Some(hash))
    }

    /// Resolve `rev` to a full object name, failing when it does not exist
    pub fn rev_parse(&self, rev: &str) -> Result<String> {
        self.rev_parse_optional(rev)?.ok_or_else(|| Error::Output {
            operation: format!("resolve '{}' to a commit hash", rev),
            message: "Invalid committish".to_string(),
        })
    }

    /// Path of `file` relative to the work tree, as git names it in trees
    pub fn repo_relative(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            if let Ok(relative) = file.strip_prefix(&self.workdir) {
                return relative.to_path_buf();
            }
            // The work tree path may be reported through a symlink
            if let (Ok(canon_file), Ok(canon_root)) =
                (file.canonicalize(), self.workdir.canonicalize())
            {
                if let Ok(relative) = canon_file.strip_prefix(&canon_root) {
                    return relative.to_path_buf();
                }
            }
        }
        file.to_path_buf()
    }
}

/// A single git invocation under construction
pub struct GitCommand<'a> {
    git: &'a Git,
    args: Vec<OsString>,
    operation: String,
    stdin: Option<Vec<u8>>,
}

impl GitCommand<'_> {
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Feed `input` to the process on stdin
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Run, accepting only a zero exit status
    pub fn run(self) -> Result<Vec<u8>> {
        Ok(self.run_accepting(&[0])?.stdout)
    }

    pub fn run_text(self) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.run()?).into_owned())
    }

    /// Run, treating every status in `accepted` as a meaningful answer
    ///
    /// Any other status becomes [`Error::Exit`]; failing to start git at all
    /// becomes [`Error::Spawn`].
    pub fn run_accepting(self, accepted: &[i32]) -> Result<GitOutput> {
        let GitCommand {
            git,
            args,
            operation,
            stdin,
        } = self;

        let rendered = args
            .iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        tracing::debug!("Executing git command: git {}", rendered);

        let mut child = match Command::new(&git.program)
            .args(&args)
            .current_dir(&git.workdir)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                tracing::error!(
                    "Unable to run git while trying to {}: {}",
                    operation,
                    source
                );
                return Err(Error::Spawn { operation, source });
            }
        };

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                // A process that exits early closes its end; the exit status tells the story
                if let Err(e) = pipe.write_all(&input) {
                    tracing::debug!("git {} stopped reading stdin: {}", rendered, e);
                }
            }
        }

        let output = child.wait_with_output().map_err(|source| {
            tracing::error!("Failed to wait for git while trying to {}: {}", operation, source);
            Error::Spawn {
                operation: operation.clone(),
                source,
            }
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        match output.status.code() {
            Some(code) if accepted.contains(&code) => {
                if !stderr.trim().is_empty() {
                    tracing::debug!("git {}: {}", rendered, stderr.trim());
                }
                Ok(GitOutput {
                    code,
                    stdout: output.stdout,
                })
            }
            code => {
                tracing::warn!(
                    "git {} exited with {:?}: {}",
                    rendered,
                    code,
                    stderr.trim()
                );
                Err(Error::Exit { operation, code })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let temp = TempDir::new().unwrap();
        let git = Git::new("/nonexistent/git-binary", temp.path());
        let err = git
            .command("list Git remotes")
            .arg("remote")
            .run()
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
        assert_eq!(
            err.to_string(),
            "Unable to run git while trying to list Git remotes"
        );
    }

    #[test]
    fn test_unaccepted_exit_is_exit_error() {
        let temp = TempDir::new().unwrap();
        let git = Git::new("git", temp.path());
        // Not a repository, so rev-parse fails with 128
        let err = git
            .command("resolve HEAD")
            .args(["rev-parse", "HEAD"])
            .run()
            .unwrap_err();
        match err {
            Error::Exit { operation, code } => {
                assert_eq!(operation, "resolve HEAD");
                assert!(code.is_some());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_stdin_is_fed() {
        let temp = TempDir::new().unwrap();
        let git = Git::new("git", temp.path());
        let hash = git
            .command("hash content")
            .args(["hash-object", "--stdin"])
            .stdin("hello\n")
            .run_text()
            .unwrap();
        assert_eq!(hash.trim(), "ce013625030ba8dba906f756967f9e9ca394464a");
    }

    #[test]
    fn test_repo_relative() {
        let git = Git::new("git", "/work/project");
        assert_eq!(
            git.repo_relative(Path::new("/work/project/src/lib.rs")),
            PathBuf::from("src/lib.rs")
        );
        assert_eq!(
            git.repo_relative(Path::new("src/lib.rs")),
            PathBuf::from("src/lib.rs")
        );
    }
}
