//! Zero-context diffs between a committed revision and the current text

use std::{io::Write, path::Path};

use tempfile::NamedTempFile;

use crate::{
    error::{Error, Result},
    git::Git,
};

/// A changed region between two revisions
///
/// Both ranges are half-open and 1-based. A side with no lines (pure insertion
/// or deletion) is zero-width and sits just after the line it is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffHunk {
    pub base_start: usize,
    pub base_end: usize,
    pub current_start: usize,
    pub current_end: usize,
}

impl DiffHunk {
    pub fn new(base_start: usize, base_end: usize, current_start: usize, current_end: usize) -> Self {
        Self {
            base_start,
            base_end,
            current_start,
            current_end,
        }
    }

    pub fn base_len(&self) -> usize {
        self.base_end - self.base_start
    }

    pub fn current_len(&self) -> usize {
        self.current_end - self.current_start
    }
}

/// Parse one side of a hunk header (`12`, `12,3` or `12,0`) into a range
fn parse_side(spec: &str) -> Option<(usize, usize)> {
    let (anchor, count) = match spec.split_once(',') {
        Some((anchor, count)) => (anchor.parse::<usize>().ok()?, count.parse::<usize>().ok()?),
        None => (spec.parse::<usize>().ok()?, 1),
    };
    if count == 0 {
        Some((anchor + 1, anchor + 1))
    } else {
        Some((anchor, anchor + count))
    }
}

/// Parse a `@@ -base[,count] +current[,count] @@` line
pub fn parse_hunk_header(line: &str) -> Option<DiffHunk> {
    let rest = line.strip_prefix("@@ -")?;
    let (ranges, _) = rest.split_once(" @@")?;
    let (base, current) = ranges.split_once(" +")?;
    let (base_start, base_end) = parse_side(base)?;
    let (current_start, current_end) = parse_side(current)?;
    Some(DiffHunk::new(base_start, base_end, current_start, current_end))
}

/// Collect every hunk from unified diff output, ascending
pub fn parse_diff_output(output: &str) -> Result<Vec<DiffHunk>> {
    output
        .lines()
        .filter(|line| line.starts_with("@@ "))
        .map(|line| {
            parse_hunk_header(line).ok_or_else(|| Error::Output {
                operation: "compare file revisions".to_string(),
                message: format!("malformed hunk header {:?}", line),
            })
        })
        .collect()
}

fn temp_file_with(content: &[u8]) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(content)?;
    file.flush()?;
    Ok(file)
}

/// Diff two in-memory revisions with zero lines of context
pub fn diff_contents(git: &Git, base: &[u8], current: &[u8]) -> Result<Vec<DiffHunk>> {
    let base_file = temp_file_with(base)?;
    let current_file = temp_file_with(current)?;

    // 0: identical, 1: differences found; anything else is a failure
    let output = git
        .command("compare file revisions")
        .args(["diff", "--no-index", "--no-color", "--no-ext-diff", "-U0", "--"])
        .arg(base_file.path())
        .arg(current_file.path())
        .run_accepting(&[0, 1])?;

    if output.code == 0 {
        return Ok(Vec::new());
    }
    parse_diff_output(&output.text())
}

/// Content of `file` as of `commit`
pub fn committed_content(git: &Git, commit: &str, file: &Path) -> Result<Vec<u8>> {
    let relative = git.repo_relative(file);
    let relative = relative.to_string_lossy().replace('\\', "/");
    git.command(format!("read '{}' as of {}", relative, commit))
        .arg("show")
        .arg(format!("{}:{}", commit, relative))
        .run()
}

/// Hunks turning `file` as of `commit` into `current`
pub fn extract_hunks(git: &Git, commit: &str, file: &Path, current: &str) -> Result<Vec<DiffHunk>> {
    let base = committed_content(git, commit, file)?;
    let hunks = diff_contents(git, &base, current.as_bytes())?;
    tracing::debug!(
        "{} hunk(s) between {}:{} and current text",
        hunks.len(),
        commit,
        file.display()
    );
    Ok(hunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_header_with_counts() {
        assert_eq!(
            parse_hunk_header("@@ -10,2 +10,5 @@ fn main() {"),
            Some(DiffHunk::new(10, 12, 10, 15))
        );
    }

    #[test]
    fn test_header_missing_count_defaults_to_one() {
        assert_eq!(
            parse_hunk_header("@@ -3 +3 @@"),
            Some(DiffHunk::new(3, 4, 3, 4))
        );
    }

    #[test]
    fn test_header_zero_count_is_zero_width_after_anchor() {
        // Two lines inserted after base line 4
        assert_eq!(
            parse_hunk_header("@@ -4,0 +5,2 @@"),
            Some(DiffHunk::new(5, 5, 5, 7))
        );
        // Base lines 1-2 deleted at the top of the file
        assert_eq!(
            parse_hunk_header("@@ -1,2 +0,0 @@"),
            Some(DiffHunk::new(1, 3, 1, 1))
        );
    }

    #[test]
    fn test_header_rejects_garbage() {
        assert_eq!(parse_hunk_header("@@ -a,b +c @@"), None);
        assert_eq!(parse_hunk_header("--- a/file"), None);
        assert!(parse_diff_output("@@ -x +1 @@\n").is_err());
    }

    #[test]
    fn test_parse_diff_output_skips_content_lines() {
        let output = "diff --git a/x b/x\n--- a/x\n+++ b/x\n@@ -2 +2 @@\n-old\n+new\n@@ -8,0 +9,2 @@\n+a\n+b\n";
        assert_eq!(
            parse_diff_output(output).unwrap(),
            vec![DiffHunk::new(2, 3, 2, 3), DiffHunk::new(9, 9, 9, 11)]
        );
    }

    #[test]
    fn test_diff_contents_with_git() {
        let temp = TempDir::new().unwrap();
        let git = Git::new("git", temp.path());

        let base = "a\nb\nc\nd\n";
        assert!(diff_contents(&git, base.as_bytes(), base.as_bytes())
            .unwrap()
            .is_empty());

        let current = "a\nB\nB2\nc\nd\n";
        assert_eq!(
            diff_contents(&git, base.as_bytes(), current.as_bytes()).unwrap(),
            vec![DiffHunk::new(2, 3, 2, 4)]
        );
    }
}
