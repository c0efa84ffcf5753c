//! Casefile blocks that can be pasted into any text file
//!
//! ```text
//! =============================== BEGIN CASEFILE ===============================
//! <base64 of the JSON bookmark list, 68 characters per line>
//! ================================ END CASEFILE ================================
//! ```

use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;

use crate::{
    bookmark::{map_files, Bookmark},
    error::{Error, Result},
};

pub const BEGIN_MARKER: &str =
    "=============================== BEGIN CASEFILE ===============================";
pub const END_MARKER: &str =
    "================================ END CASEFILE ================================";

/// Width of each base64 line between the markers
pub const DATA_WIDTH: usize = 68;

static MARKER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*=+\s+(BEGIN|END) +CASEFILE\s+=+\s*$").expect("marker pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineType {
    BeginMarker,
    EndMarker,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Data,
}

/// What the scanner does with a line
enum Step {
    Skip,
    Collect,
    Deserialize,
}

fn line_type(line: &str) -> LineType {
    match MARKER_PATTERN.captures(line) {
        Some(caps) if &caps[1] == "BEGIN" => LineType::BeginMarker,
        Some(_) => LineType::EndMarker,
        None => LineType::Other,
    }
}

fn transition(state: State, line: LineType) -> Option<(State, Step)> {
    match (state, line) {
        (State::Start, LineType::Other) => Some((State::Start, Step::Skip)),
        (State::Start, LineType::BeginMarker) => Some((State::Data, Step::Skip)),
        (State::Start, LineType::EndMarker) => None,
        (State::Data, LineType::Other) => Some((State::Data, Step::Collect)),
        (State::Data, LineType::BeginMarker) => None,
        (State::Data, LineType::EndMarker) => Some((State::Start, Step::Deserialize)),
    }
}

/// Render `bookmarks` as a marker-delimited block, ending with a newline
pub fn encode(bookmarks: &[Bookmark]) -> Result<String> {
    let json = serde_json::to_vec(bookmarks)?;
    let data = STANDARD.encode(json);

    let mut out = String::with_capacity(data.len() + data.len() / DATA_WIDTH + 200);
    out.push_str(BEGIN_MARKER);
    out.push('\n');
    // base64 output is ASCII, so byte chunks are character chunks
    for chunk in data.as_bytes().chunks(DATA_WIDTH) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out.push_str(END_MARKER);
    out.push('\n');
    Ok(out)
}

/// Whether every marker in `lines` appears where the scanner allows it
pub fn valid_file<'a, I>(lines: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    let mut state = State::Start;
    for line in lines {
        match transition(state, line_type(line)) {
            Some((next, _)) => state = next,
            None => return false,
        }
    }
    true
}

/// Decode every casefile block in `lines`, concatenating their bookmarks
pub fn read_persisted<'a, I>(lines: I) -> Result<Vec<Bookmark>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut state = State::Start;
    let mut data = String::new();
    let mut bookmarks = Vec::new();

    for (number, line) in lines.into_iter().enumerate() {
        let kind = line_type(line);
        let (next, step) = transition(state, kind).ok_or_else(|| {
            Error::Persisted(format!("unexpected {:?} on line {}", kind, number + 1))
        })?;
        match step {
            Step::Skip => {}
            Step::Collect => data.push_str(line.trim()),
            Step::Deserialize => {
                let json = STANDARD
                    .decode(data.as_bytes())
                    .map_err(|e| Error::Persisted(format!("bad base64: {}", e)))?;
                let block: Vec<Bookmark> = serde_json::from_slice(&json)?;
                bookmarks.extend(block);
                data.clear();
            }
        }
        state = next;
    }

    if state == State::Data {
        return Err(Error::Persisted("missing end marker".to_string()));
    }
    Ok(bookmarks)
}

/// Store paths relative to `root` so the block is usable in other checkouts
pub fn relativize_paths(bookmarks: &[Bookmark], root: &Path) -> Vec<Bookmark> {
    map_files(bookmarks, &|file: &Path| {
        file.strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| file.to_path_buf())
    })
}

/// Resolve relative paths against the first of `roots` where the file exists
pub fn derelativize_paths(bookmarks: &[Bookmark], roots: &[PathBuf]) -> Vec<Bookmark> {
    map_files(bookmarks, &|file: &Path| {
        if file.is_absolute() {
            return file.to_path_buf();
        }
        roots
            .iter()
            .map(|root| root.join(file))
            .find(|candidate| candidate.exists())
            .unwrap_or_else(|| file.to_path_buf())
    })
}
