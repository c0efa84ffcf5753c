//! Pegging lines to history and finding them again
//!
//! A peg is taken when a bookmark is created and never revised. Opening the
//! bookmark later diffs the pegged commit against the current text to find
//! where the line went.

mod hunks;
mod pegger;
mod resolver;

pub use hunks::{
    committed_content, diff_contents, extract_hunks, parse_diff_output, parse_hunk_header,
    DiffHunk,
};
pub use pegger::{compute_peg_line, read_current, LinePegger, PegOutcome, UNCOMMITTED};
pub use resolver::{compute_current_line_range, locate_mark, LineRange, LineResolver};
