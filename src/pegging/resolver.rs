//! Relocating a peg in the current text, and finding a bookmark's mark text

use std::path::Path;

use crate::{bookmark::Bookmark, bookmark::Peg, error::Result, git::Git};

use super::{
    hunks::{extract_hunks, DiffHunk},
    pegger::read_current,
};

/// Where a pegged line is believed to be now
///
/// `[start, end)` is every line that may hold the pegged text and `prime` is
/// the single best guess. A zero-width range is an exact answer at `prime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: usize,
    pub prime: usize,
    pub end: usize,
}

impl LineRange {
    pub fn exact(line: usize) -> Self {
        Self {
            start: line,
            prime: line,
            end: line,
        }
    }

    /// The single line `line`, without any history behind it
    pub fn identity(line: usize) -> Self {
        Self {
            start: line,
            prime: line,
            end: line + 1,
        }
    }

    pub fn is_exact(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, line: usize) -> bool {
        if self.is_exact() {
            line == self.prime
        } else {
            self.start <= line && line < self.end
        }
    }
}

/// Where the text of `base_line` (in the hunks' base revision) is now
pub fn compute_current_line_range(hunks: &[DiffHunk], base_line: usize) -> LineRange {
    let mut offset: isize = 0;
    for hunk in hunks {
        if hunk.base_len() == 0 && hunk.base_start == base_line {
            // Lines were inserted right before the pegged one
            let start = hunk.current_start;
            let end = hunk.current_end + 1;
            return LineRange {
                start,
                prime: start + (end - start) / 2,
                end,
            };
        }
        if hunk.base_end <= base_line {
            offset = hunk.current_end as isize - hunk.base_end as isize;
            continue;
        }
        if base_line < hunk.base_start {
            break;
        }
        let into = base_line - hunk.base_start;
        return LineRange {
            start: hunk.current_start,
            prime: hunk.current_start + into * hunk.current_len() / hunk.base_len(),
            end: hunk.current_end,
        };
    }
    LineRange::exact((base_line as isize + offset).max(1) as usize)
}

/// Find `text` on `expected` or the nearest line within `radius` of it
///
/// Lines are 1-based; the result is `(line, column)` with a 0-based column.
pub fn locate_mark(
    lines: &[&str],
    expected: usize,
    text: &str,
    radius: usize,
) -> Option<(usize, usize)> {
    if text.is_empty() {
        return None;
    }
    let find_on = |line: usize| -> Option<(usize, usize)> {
        let content = lines.get(line.checked_sub(1)?)?;
        content.find(text).map(|column| (line, column))
    };
    if let Some(found) = find_on(expected) {
        return Some(found);
    }
    for i in 1..=radius {
        if let Some(found) = find_on(expected + i) {
            return Some(found);
        }
        if let Some(found) = expected.checked_sub(i).and_then(find_on) {
            return Some(found);
        }
    }
    None
}

pub struct LineResolver<'a> {
    git: &'a Git,
    search_radius: usize,
}

impl<'a> LineResolver<'a> {
    pub fn new(git: &'a Git, search_radius: usize) -> Self {
        Self { git, search_radius }
    }

    /// Current range for a bookmark at `line`, pegged by `peg` if it has one
    ///
    /// Diff failures are logged and answered with the identity range.
    pub fn resolve(
        &self,
        file: &Path,
        line: usize,
        peg: Option<&Peg>,
        buffer: Option<&str>,
    ) -> LineRange {
        let Some(peg) = peg else {
            return LineRange::identity(line);
        };
        match self.try_resolve(file, peg, buffer) {
            Ok(range) => range,
            Err(e) => {
                tracing::warn!(
                    "Cannot relocate {}:{} from {}: {}",
                    file.display(),
                    peg.line,
                    peg.commit,
                    e
                );
                LineRange::identity(peg.line)
            }
        }
    }

    pub fn try_resolve(&self, file: &Path, peg: &Peg, buffer: Option<&str>) -> Result<LineRange> {
        let current = match buffer {
            Some(text) => text.to_string(),
            None => read_current(self.git, file)?,
        };
        let hunks = extract_hunks(self.git, &peg.commit, file, &current)?;
        Ok(compute_current_line_range(&hunks, peg.line))
    }

    /// Cursor position for opening `bookmark` in `buffer`
    ///
    /// Looks for the mark text around the resolved guess, then anywhere in the
    /// resolved range, then around the line recorded in the bookmark. Falls back
    /// to the guessed line at column 0.
    pub fn open_location(&self, bookmark: &Bookmark, buffer: &str) -> Option<(usize, usize)> {
        let file = bookmark.file.as_deref()?;
        let line = bookmark.line.or(bookmark.peg.as_ref().map(|p| p.line))?;
        let range = self.resolve(file, line, bookmark.peg.as_ref(), Some(buffer));
        let lines: Vec<&str> = buffer.lines().collect();
        let text = bookmark.mark_text.trim_end_matches("...");

        if let Some(found) = locate_mark(&lines, range.prime, text, self.search_radius) {
            return Some(found);
        }
        if !range.is_exact() {
            let in_range = (range.start..range.end)
                .find_map(|l| locate_mark(&lines, l, text, 0));
            if in_range.is_some() {
                return in_range;
            }
        }
        if let Some(found) = locate_mark(&lines, line, text, self.search_radius) {
            return Some(found);
        }
        Some((range.prime, 0))
    }
}
