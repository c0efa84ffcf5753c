//! Tree listing and construction records (`git ls-tree -z` / `git mktree -z`)

use gix_object::Kind;

use crate::error::{Error, Result};

/// Mode git uses for a regular, non-executable file
pub const BLOB_MODE: &str = "100644";
/// Mode git uses for a subdirectory
pub const TREE_MODE: &str = "040000";
/// Hash of the tree with no entries
pub const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// One entry of a tree object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: String,
    pub kind: Kind,
    pub hash: String,
    /// Entry name; for recursive listings this is the full path
    pub name: String,
}

impl TreeEntry {
    pub fn blob(hash: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mode: BLOB_MODE.to_string(),
            kind: Kind::Blob,
            hash: hash.into(),
            name: name.into(),
        }
    }

    pub fn tree(hash: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mode: TREE_MODE.to_string(),
            kind: Kind::Tree,
            hash: hash.into(),
            name: name.into(),
        }
    }

    /// Parse one `<mode> SP <type> SP <hash> TAB <name>` record
    pub fn parse(record: &str) -> Result<Self> {
        let malformed = || Error::Output {
            operation: "list contents of a Git tree".to_string(),
            message: format!("malformed entry {:?}", record),
        };

        let (meta, name) = record.split_once('\t').ok_or_else(malformed)?;
        let mut parts = meta.split(' ');
        let (mode, kind, hash) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(mode), Some(kind), Some(hash), None) => (mode, kind, hash),
            _ => return Err(malformed()),
        };
        let kind = match kind {
            "blob" => Kind::Blob,
            "tree" => Kind::Tree,
            "commit" => Kind::Commit,
            "tag" => Kind::Tag,
            _ => return Err(malformed()),
        };

        Ok(Self {
            mode: mode.to_string(),
            kind,
            hash: hash.to_string(),
            name: name.to_string(),
        })
    }

    /// Render as a NUL-terminated `git mktree -z` input record
    pub fn to_mktree_record(&self) -> String {
        format!(
            "{} {} {}\t{}\0",
            self.mode,
            kind_name(self.kind),
            self.hash,
            self.name
        )
    }

    pub fn is_file_blob(&self) -> bool {
        self.kind == Kind::Blob && self.mode == BLOB_MODE
    }
}

pub fn kind_name(kind: Kind) -> &'static str {
    match kind {
        Kind::Commit => "commit",
        Kind::Tree => "tree",
        Kind::Blob => "blob",
        Kind::Tag => "tag",
    }
}

/// Split NUL-terminated output into records; a trailing partial record is kept
pub fn split_nul_records(output: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(output);
    let mut records: Vec<String> = text.split('\0').map(str::to_string).collect();
    if records.last().is_some_and(|r| r.is_empty()) {
        records.pop();
    }
    records
}

/// Parse the whole output of `git ls-tree -z`
pub fn parse_ls_tree(output: &[u8]) -> Result<Vec<TreeEntry>> {
    split_nul_records(output)
        .iter()
        .filter(|r| !r.is_empty())
        .map(|r| TreeEntry::parse(r))
        .collect()
}

/// Build the stdin for `git mktree -z`
pub fn mktree_input(entries: &[TreeEntry]) -> String {
    entries.iter().map(TreeEntry::to_mktree_record).collect()
}
