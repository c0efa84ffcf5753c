//! Casefiles as git objects under a dedicated ref
//!
//! The ref points at a commit whose tree is `<group>/<instance>` blobs, each
//! holding the canonical JSON of one bookmark forest. Trees and commits are
//! built with plumbing commands so the work tree and index are never touched.

use std::collections::{BTreeMap, BTreeSet};

use gix_object::Kind;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::{
    bookmark::Bookmark,
    error::{Error, Result},
    git::{mktree_input, parse_ls_tree, Git, TreeEntry},
};

use super::{
    deleted::{parse_deleted_listing, COMMIT_INFO_FORMAT},
    CasefileStore, DeletedCasefileRecord, SharePath,
};

pub const SHARE_MESSAGE: &str = "Share casefile";
pub const DELETE_MESSAGE: &str = "Delete casefile(s)";

/// One shared casefile within a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharedCasefile {
    pub path: String,
}

/// All shared casefiles with the same name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharedCasefileGroup {
    pub name: String,
    pub instances: Vec<SharedCasefile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CasefileAuthors {
    pub path: String,
    pub authors: Vec<String>,
}

#[derive(Serialize)]
struct CasefileDocumentRef<'a> {
    bookmarks: &'a [Bookmark],
}

#[derive(Deserialize)]
struct CasefileDocument {
    #[serde(default)]
    bookmarks: Vec<Bookmark>,
}

/// The bytes stored for `bookmarks`: `{"bookmarks":[...]}` without whitespace
pub fn canonical_encoding(bookmarks: &[Bookmark]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&CasefileDocumentRef { bookmarks })?)
}

/// Git blob id of `content`, computed without touching a repository
pub fn blob_hash(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", content.len()).as_bytes());
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Key `write` would return for `bookmarks`
pub fn hash_of(bookmarks: &[Bookmark]) -> Result<String> {
    Ok(blob_hash(&canonical_encoding(bookmarks)?))
}

/// Shared casefiles stored in a git repository
#[derive(Debug, Clone)]
pub struct GitCasefileStore {
    git: Git,
    shared_ref: String,
}

impl GitCasefileStore {
    pub fn new(git: Git, shared_ref: impl Into<String>) -> Self {
        Self {
            git,
            shared_ref: shared_ref.into(),
        }
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    pub fn shared_ref(&self) -> &str {
        &self.shared_ref
    }

    /// Commit the shared ref points at, if it exists
    pub fn tip(&self) -> Result<Option<String>> {
        self.git.rev_parse_optional(&self.shared_ref)
    }

    fn write_bytes(&self, content: &[u8]) -> Result<String> {
        let hash = self
            .git
            .command("write casefile into Git blob")
            .args(["hash-object", "-w", "--stdin"])
            .stdin(content)
            .run_text()?;
        non_empty_hash(hash, "write casefile into Git blob")
    }

    fn ls_tree(&self, treeish: &str) -> Result<Vec<TreeEntry>> {
        let output = self
            .git
            .command(format!("list contents of '{}'", treeish))
            .args(["ls-tree", "-z", "--full-tree", treeish])
            .run()?;
        parse_ls_tree(&output)
    }

    fn mktree(&self, entries: &[TreeEntry]) -> Result<String> {
        let hash = self
            .git
            .command("build Git tree object")
            .args(["mktree", "-z"])
            .stdin(mktree_input(entries))
            .run_text()?;
        non_empty_hash(hash, "build Git tree object")
    }

    fn commit_tree(&self, tree: &str, parent: Option<&str>, message: &str) -> Result<String> {
        let mut command = self
            .git
            .command(format!("create commit for tree {}", tree))
            .arg("commit-tree");
        if let Some(parent) = parent {
            command = command.args(["-p", parent]);
        }
        let hash = command.args(["-m", message, tree]).run_text()?;
        non_empty_hash(hash, "create commit for casefile tree")
    }

    /// Push `commit` to the shared ref on `remote`, then move the local ref
    fn publish(&self, remote: &str, commit: &str) -> Result<()> {
        self.git
            .command(format!(
                "push {} to {} on {}",
                commit, self.shared_ref, remote
            ))
            .arg("push")
            .arg(remote)
            .arg(format!("{}:{}", commit, self.shared_ref))
            .run()?;
        self.git
            .command(format!("update Git ref '{}' to {}", self.shared_ref, commit))
            .args(["update-ref", self.shared_ref.as_str(), commit])
            .run()?;
        Ok(())
    }

    fn root_entries(&self, tip: Option<&str>) -> Result<Vec<TreeEntry>> {
        match tip {
            Some(commit) => self.ls_tree(commit),
            None => Ok(Vec::new()),
        }
    }

    fn group_entries(&self, root: &[TreeEntry], group: &str) -> Result<Vec<TreeEntry>> {
        match root
            .iter()
            .find(|entry| entry.name == group && entry.kind == Kind::Tree)
        {
            Some(entry) => self.ls_tree(&entry.hash),
            None => Ok(Vec::new()),
        }
    }

    /// Parent of `commit` where `path` most recently changed
    fn latest_parent_with_path(&self, path: &str, commit: &str) -> Result<String> {
        let parents = self
            .git
            .command(format!("identify parents of {}", commit))
            .arg("rev-parse")
            .arg(format!("{}^@", commit))
            .run_text()?;

        let mut best: Option<(i64, String)> = None;
        for parent in parents.lines().map(str::trim).filter(|p| !p.is_empty()) {
            let changed = self
                .git
                .command(format!("query date '{}' last committed in {}", path, parent))
                .args(["log", "-n1", "--pretty=format:%ct", parent, "--", path])
                .run_text();
            let timestamp = match changed {
                Ok(text) => match text.trim().parse::<i64>() {
                    Ok(timestamp) => timestamp,
                    Err(_) => continue,
                },
                Err(e) => {
                    tracing::debug!("Skipping parent {}: {}", parent, e);
                    continue;
                }
            };
            if best.as_ref().map_or(true, |(seen, _)| timestamp > *seen) {
                best = Some((timestamp, parent.to_string()));
            }
        }

        best.map(|(_, parent)| parent).ok_or_else(|| Error::Output {
            operation: format!("find '{}' before {}", path, commit),
            message: "no parent commit contains the casefile".to_string(),
        })
    }
}

fn non_empty_hash(output: String, operation: &str) -> Result<String> {
    let hash = output.trim();
    if hash.is_empty() {
        return Err(Error::Output {
            operation: operation.to_string(),
            message: "no hash returned".to_string(),
        });
    }
    Ok(hash.to_string())
}

/// Group a recursive listing into casefile groups, keeping listing order
fn group_listing(entries: Vec<TreeEntry>) -> Vec<SharedCasefileGroup> {
    let mut groups: Vec<SharedCasefileGroup> = Vec::new();
    for entry in entries {
        if !entry.is_file_blob() {
            continue;
        }
        let Some((name, instance)) = entry.name.split_once('/') else {
            continue;
        };
        if instance.contains('/') {
            continue;
        }
        let casefile = SharedCasefile {
            path: entry.name.clone(),
        };
        match groups.last_mut() {
            Some(group) if group.name == name => group.instances.push(casefile),
            _ => groups.push(SharedCasefileGroup {
                name: name.to_string(),
                instances: vec![casefile],
            }),
        }
    }
    groups
}

impl CasefileStore for GitCasefileStore {
    fn write(&self, bookmarks: &[Bookmark]) -> Result<String> {
        self.write_bytes(&canonical_encoding(bookmarks)?)
    }

    fn share_at_path(
        &self,
        remote: &str,
        path: &SharePath,
        bookmarks: &[Bookmark],
    ) -> Result<String> {
        let content = canonical_encoding(bookmarks)?;
        let hash = blob_hash(&content);

        let parent = self.tip()?;
        let mut root = self.root_entries(parent.as_deref())?;
        let mut group = self.group_entries(&root, path.group())?;

        if let Some(existing) = group.iter().find(|entry| entry.hash == hash) {
            return Err(Error::AlreadyShared(format!(
                "{}/{}",
                path.group(),
                existing.name
            )));
        }

        let written = self.write_bytes(&content)?;
        group.retain(|entry| entry.name != path.instance());
        group.push(TreeEntry::blob(written, path.instance()));
        let group_tree = self.mktree(&group)?;

        root.retain(|entry| entry.name != path.group());
        root.push(TreeEntry::tree(group_tree, path.group()));
        let root_tree = self.mktree(&root)?;

        let commit = self.commit_tree(&root_tree, parent.as_deref(), SHARE_MESSAGE)?;
        self.publish(remote, &commit)?;
        tracing::info!("Shared casefile {} to {} ({})", path, remote, commit);
        Ok(commit)
    }

    fn delete_paths(&self, remote: &str, paths: &[String]) -> Result<String> {
        let Some(parent) = self.tip()? else {
            return Err(Error::Output {
                operation: "delete shared casefiles".to_string(),
                message: format!("{} does not exist", self.shared_ref),
            });
        };
        let root = self.ls_tree(&parent)?;

        let targets: BTreeSet<&str> = paths.iter().map(String::as_str).collect();
        let mut rebuilt: BTreeMap<&str, Option<String>> = BTreeMap::new();
        let mut removed = 0;
        for path in paths {
            let group = path.split('/').next().unwrap_or(path);
            if rebuilt.contains_key(group) {
                continue;
            }
            let entries = self.group_entries(&root, group)?;
            let count = entries.len();
            let remaining: Vec<TreeEntry> = entries
                .into_iter()
                .filter(|entry| !targets.contains(format!("{}/{}", group, entry.name).as_str()))
                .collect();
            removed += count - remaining.len();
            let tree = if remaining.is_empty() {
                None
            } else {
                Some(self.mktree(&remaining)?)
            };
            rebuilt.insert(group, tree);
        }
        // Committing now would publish a tree identical to the parent's
        if removed == 0 {
            return Err(Error::UnknownCasefile(paths.join(", ")));
        }

        let new_root: Vec<TreeEntry> = root
            .into_iter()
            .filter_map(|entry| match rebuilt.get(entry.name.as_str()) {
                None => Some(entry),
                Some(None) => None,
                Some(Some(tree)) => Some(TreeEntry::tree(tree.clone(), entry.name)),
            })
            .collect();
        let root_tree = self.mktree(&new_root)?;

        let commit = self.commit_tree(&root_tree, Some(&parent), DELETE_MESSAGE)?;
        self.publish(remote, &commit)?;
        tracing::info!("Deleted {} casefile(s) on {} ({})", paths.len(), remote, commit);
        Ok(commit)
    }

    fn list_groups(&self) -> Result<Vec<SharedCasefileGroup>> {
        if self.tip()?.is_none() {
            return Ok(Vec::new());
        }
        let output = self
            .git
            .command("list known, shared casefiles")
            .args(["ls-tree", "-rz", "--full-tree", self.shared_ref.as_str()])
            .run()?;
        Ok(group_listing(parse_ls_tree(&output)?))
    }

    fn list_deleted(&self, filter: Option<&str>) -> Result<Vec<DeletedCasefileRecord>> {
        if self.tip()?.is_none() {
            return Ok(Vec::new());
        }
        let mut command = self
            .git
            .command("get a list of deleted casefiles")
            .args(["log", "-z", "--diff-filter=D", "--name-status", COMMIT_INFO_FORMAT])
            .arg(&self.shared_ref);
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            command = command.arg("--").arg(format!("*{}*/*", filter));
        }
        parse_deleted_listing(&command.run()?)
    }

    fn authors(&self, path: &str) -> Result<CasefileAuthors> {
        let mut authors = BTreeSet::new();
        if self.tip()?.is_some() {
            let output = self
                .git
                .command(format!("list authors of casefile group '{}'", path))
                .args(["log", "--pretty=format:%aN", self.shared_ref.as_str(), "--", path])
                .run_text()?;
            authors.extend(
                output
                    .lines()
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(str::to_string),
            );
        }
        Ok(CasefileAuthors {
            path: path.to_string(),
            authors: authors.into_iter().collect(),
        })
    }

    fn read(&self, path: &str, before_commit: Option<&str>) -> Result<Vec<Bookmark>> {
        let commit = match before_commit {
            Some(commit) => self.latest_parent_with_path(path, commit)?,
            None => self.shared_ref.clone(),
        };
        let content = self
            .git
            .command(format!("retrieve contents of casefile '{}'", path))
            .arg("show")
            .arg(format!("{}:{}", commit, path))
            .run()?;
        let document: CasefileDocument = serde_json::from_slice(&content)?;
        Ok(document.bookmarks)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::bookmark::Peg;

    #[test]
    fn test_canonical_encoding_is_compact() {
        let mut mark = Bookmark::header(1, "fn main", "");
        mark.peg = Some(Peg {
            commit: "c".to_string(),
            line: 2,
        });
        let encoded = String::from_utf8(canonical_encoding(&[mark]).unwrap()).unwrap();
        assert_eq!(
            encoded,
            r#"{"bookmarks":[{"id":1,"markText":"fn main","notes":"","children":[],"peg":{"commit":"c","line":2}}]}"#
        );
        assert_eq!(
            String::from_utf8(canonical_encoding(&[]).unwrap()).unwrap(),
            r#"{"bookmarks":[]}"#
        );

        let mut located = Bookmark::header(2, "let x", "");
        located.file = Some(PathBuf::from("src/main.rs"));
        located.line = Some(3);
        let encoded = String::from_utf8(canonical_encoding(&[located]).unwrap()).unwrap();
        assert_eq!(
            encoded,
            r#"{"bookmarks":[{"id":2,"file":"src/main.rs","line":3,"markText":"let x","notes":"","children":[]}]}"#
        );
    }

    #[test]
    fn test_blob_hash_matches_git() {
        // `printf 'hello\n' | git hash-object --stdin`
        assert_eq!(
            blob_hash(b"hello\n"),
            "ce013625030ba8dba906f756967f9e9ca394464a"
        );
        assert_eq!(blob_hash(b""), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }

    #[test]
    fn test_hash_of_is_deterministic() {
        let marks = vec![Bookmark::header(3, "x", "y")];
        assert_eq!(hash_of(&marks).unwrap(), hash_of(&marks.clone()).unwrap());
        assert_ne!(hash_of(&marks).unwrap(), hash_of(&[]).unwrap());
    }

    #[test]
    fn test_group_listing() {
        let entries = vec![
            TreeEntry::blob("a".repeat(40), "alpha/1111"),
            TreeEntry::blob("b".repeat(40), "alpha/2222"),
            TreeEntry::blob("c".repeat(40), "stray"),
            TreeEntry::blob("d".repeat(40), "beta/x/deep"),
            TreeEntry::blob("e".repeat(40), "beta/3333"),
            TreeEntry {
                mode: "100755".to_string(),
                ..TreeEntry::blob("f".repeat(40), "beta/exec")
            },
        ];
        let groups = group_listing(entries);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "alpha");
        assert_eq!(
            groups[0].instances,
            vec![
                SharedCasefile {
                    path: "alpha/1111".to_string()
                },
                SharedCasefile {
                    path: "alpha/2222".to_string()
                }
            ]
        );
        assert_eq!(groups[1].name, "beta");
        assert_eq!(groups[1].instances.len(), 1);
    }
}
