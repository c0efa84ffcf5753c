//! Pegging a line of the current buffer to a (commit, line) in history

use std::path::Path;

use crate::{
    bookmark::Peg,
    error::{Error, Result},
    git::Git,
};

use super::hunks::{extract_hunks, DiffHunk};

/// Commit name git blame reports for lines that are not committed yet
pub const UNCOMMITTED: &str = "0000000000000000000000000000000000000000";

/// Result of pegging: a line, and the commit it belongs to when one was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PegOutcome {
    pub line: usize,
    pub commit: Option<String>,
}

impl PegOutcome {
    pub fn unpegged(line: usize) -> Self {
        Self { line, commit: None }
    }

    pub fn peg(&self) -> Option<Peg> {
        self.commit.as_ref().map(|commit| Peg {
            commit: commit.clone(),
            line: self.line,
        })
    }
}

/// Map `current_line` back to the base revision the hunks were computed from
///
/// Lines outside every hunk shift by the offset left behind by the hunks before
/// them. A line inside a changed block has no single historical counterpart, so
/// it is placed proportionally within the block's base range.
pub fn compute_peg_line(hunks: &[DiffHunk], current_line: usize) -> usize {
    let mut offset: isize = 0;
    for hunk in hunks {
        if hunk.current_end <= current_line {
            offset = hunk.current_end as isize - hunk.base_end as isize;
            continue;
        }
        if current_line < hunk.current_start {
            break;
        }
        let into = current_line - hunk.current_start;
        return hunk.base_start + into * hunk.base_len() / hunk.current_len();
    }
    (current_line as isize - offset).max(1) as usize
}

/// Parse the commit and original line from the first line of `git blame --porcelain`
fn parse_blame_porcelain(output: &str) -> Option<(String, usize)> {
    let header = output.lines().next()?;
    let mut fields = header.split(' ');
    let commit = fields.next()?;
    let original_line = fields.next()?.parse().ok()?;
    if commit.len() < 40 || !commit.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some((commit.to_string(), original_line))
}

pub struct LinePegger<'a> {
    git: &'a Git,
}

impl<'a> LinePegger<'a> {
    pub fn new(git: &'a Git) -> Self {
        Self { git }
    }

    /// Peg `current_line` of `file`
    ///
    /// `buffer` is the editor's current text, which may hold unsaved edits;
    /// without it the file on disk is used. Never fails: when neither blame nor
    /// diffing work, the line comes back without a commit.
    pub fn peg(
        &self,
        file: &Path,
        current_line: usize,
        buffer: Option<&str>,
        reference: Option<&str>,
    ) -> PegOutcome {
        let current = match buffer {
            Some(text) => text.to_string(),
            None => match read_current(self.git, file) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Cannot read {} for pegging: {}", file.display(), e);
                    return PegOutcome::unpegged(current_line);
                }
            },
        };

        match self.attribute(file, current_line, &current) {
            Ok(Some(peg)) => {
                tracing::debug!(
                    "{}:{} attributed to {}:{}",
                    file.display(),
                    current_line,
                    peg.commit,
                    peg.line
                );
                return PegOutcome {
                    line: peg.line,
                    commit: Some(peg.commit),
                };
            }
            Ok(None) => {}
            Err(e) => tracing::debug!("Attribution unavailable for {}: {}", file.display(), e),
        }

        match self.interpolate(file, current_line, &current, reference) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::info!(
                    "Pegging unavailable for {}:{}: {}",
                    file.display(),
                    current_line,
                    e
                );
                PegOutcome::unpegged(current_line)
            }
        }
    }

    /// Ask git blame which commit last touched exactly `line` of `current`
    pub fn attribute(&self, file: &Path, line: usize, current: &str) -> Result<Option<Peg>> {
        let relative = self.git.repo_relative(file);
        let output = self
            .git
            .command(format!("attribute line {} of {}", line, relative.display()))
            .args(["blame", "--porcelain", "-L"])
            .arg(format!("{},{}", line, line))
            .args(["--contents", "-", "--"])
            .arg(&relative)
            .stdin(current)
            .run_text()?;

        let (commit, original_line) =
            parse_blame_porcelain(&output).ok_or_else(|| Error::Output {
                operation: format!("attribute line {} of {}", line, relative.display()),
                message: "unrecognized blame output".to_string(),
            })?;

        if commit == UNCOMMITTED {
            return Ok(None);
        }
        Ok(Some(Peg {
            commit,
            line: original_line,
        }))
    }

    /// Place `line` in `reference` (or HEAD) by walking the diff hunks
    pub fn interpolate(
        &self,
        file: &Path,
        line: usize,
        current: &str,
        reference: Option<&str>,
    ) -> Result<PegOutcome> {
        let commit = self.git.rev_parse(reference.unwrap_or("HEAD"))?;
        let hunks = extract_hunks(self.git, &commit, file, current)?;
        Ok(PegOutcome {
            line: compute_peg_line(&hunks, line),
            commit: Some(commit),
        })
    }
}

/// Text of `file` from disk, relative paths taken from the work tree
pub fn read_current(git: &Git, file: &Path) -> Result<String> {
    let path = if file.is_absolute() {
        file.to_path_buf()
    } else {
        git.workdir().join(file)
    };
    Ok(std::fs::read_to_string(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_before_any_hunk_is_unchanged() {
        let hunks = [DiffHunk::new(10, 12, 10, 15)];
        assert_eq!(compute_peg_line(&hunks, 4), 4);
    }

    #[test]
    fn test_line_after_hunk_is_offset() {
        let hunks = [DiffHunk::new(10, 12, 10, 15)];
        assert_eq!(compute_peg_line(&hunks, 15), 12);
        assert_eq!(compute_peg_line(&hunks, 20), 17);
    }

    #[test]
    fn test_line_inside_hunk_is_proportional() {
        let hunks = [DiffHunk::new(10, 12, 10, 15)];
        // 10 + floor((12-10)/(15-10)*(12-10)) = 10
        assert_eq!(compute_peg_line(&hunks, 12), 10);
        assert_eq!(compute_peg_line(&hunks, 14), 11);
    }

    #[test]
    fn test_offsets_from_several_hunks() {
        let hunks = [
            // two lines inserted after base line 2
            DiffHunk::new(3, 3, 3, 5),
            // base lines 8-10 deleted
            DiffHunk::new(8, 11, 10, 10),
        ];
        assert_eq!(compute_peg_line(&hunks, 6), 4);
        assert_eq!(compute_peg_line(&hunks, 10), 11);
        assert_eq!(compute_peg_line(&hunks, 12), 13);
    }

    #[test]
    fn test_inserted_line_pegs_to_following_base_line() {
        let hunks = [DiffHunk::new(3, 3, 3, 5)];
        assert_eq!(compute_peg_line(&hunks, 3), 3);
        assert_eq!(compute_peg_line(&hunks, 4), 3);
    }

    #[test]
    fn test_parse_blame_porcelain() {
        let output = "8a1f2c3d4e5f60718293a4b5c6d7e8f901234567 7 12 1\nauthor Someone\n";
        assert_eq!(
            parse_blame_porcelain(output),
            Some(("8a1f2c3d4e5f60718293a4b5c6d7e8f901234567".to_string(), 7))
        );
        assert_eq!(parse_blame_porcelain("fatal: no such path"), None);
        assert_eq!(parse_blame_porcelain(""), None);
    }

    #[test]
    fn test_outcome_without_commit_has_no_peg() {
        assert_eq!(PegOutcome::unpegged(3).peg(), None);
        let outcome = PegOutcome {
            line: 3,
            commit: Some("abc".to_string()),
        };
        assert_eq!(
            outcome.peg(),
            Some(Peg {
                commit: "abc".to_string(),
                line: 3
            })
        );
    }
}
