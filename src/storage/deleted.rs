//! Reading casefile deletions out of `git log -z --diff-filter=D --name-status`

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::{
    error::{Error, Result},
    git::split_nul_records,
};

/// Format of the line `git log` prints for each commit
pub const COMMIT_INFO_FORMAT: &str = "--pretty=format:- %H %ci";

/// A casefile removed from the shared tree, and the commit that removed it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletedCasefileRecord {
    pub commit: String,
    pub committed: DateTime<FixedOffset>,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListingState {
    Action,
    Path,
}

struct CommitInfo {
    commit: String,
    committed: DateTime<FixedOffset>,
}

fn parse_commit_info(line: &str) -> Option<CommitInfo> {
    let rest = line.trim().strip_prefix("- ")?;
    let (commit, committed) = rest.split_once(' ')?;
    let committed = DateTime::parse_from_str(committed.trim(), "%Y-%m-%d %H:%M:%S %z").ok()?;
    Some(CommitInfo {
        commit: commit.to_string(),
        committed,
    })
}

/// Parse the NUL-separated log listing into deletion records, newest first
pub fn parse_deleted_listing(output: &[u8]) -> Result<Vec<DeletedCasefileRecord>> {
    let mut records = Vec::new();
    let mut state = ListingState::Action;
    let mut info: Option<CommitInfo> = None;

    for record in split_nul_records(output) {
        match state {
            ListingState::Action => {
                let record = record.trim_start_matches('\n');
                if record.is_empty() {
                    continue;
                }
                if record.starts_with("- ") {
                    let (info_line, status) = record.split_once('\n').unwrap_or((record, ""));
                    info = Some(parse_commit_info(info_line).ok_or_else(|| Error::Output {
                        operation: "get a list of deleted casefiles".to_string(),
                        message: format!("unrecognized commit line {:?}", info_line),
                    })?);
                    if status.is_empty() {
                        continue;
                    }
                }
                state = ListingState::Path;
            }
            ListingState::Path => {
                let Some(current) = info.as_ref() else {
                    return Err(Error::Output {
                        operation: "get a list of deleted casefiles".to_string(),
                        message: format!("path {:?} before any commit", record),
                    });
                };
                records.push(DeletedCasefileRecord {
                    commit: current.commit.clone(),
                    committed: current.committed,
                    path: record,
                });
                state = ListingState::Action;
            }
        }
    }

    Ok(records)
}
