use crate::{bookmark::Bookmark, error::Result};

use super::{CasefileAuthors, DeletedCasefileRecord, SharePath, SharedCasefileGroup};

/// Storage for shared casefiles, kept apart from any work tree or index
pub trait CasefileStore {
    /// Store `bookmarks` as an immutable object and return its key.
    /// Identical content always yields the identical key.
    fn write(&self, bookmarks: &[Bookmark]) -> Result<String>;

    /// Publish `bookmarks` at `path` on `remote`, returning the new commit.
    /// Fails with `AlreadyShared` when the group already holds this content.
    fn share_at_path(&self, remote: &str, path: &SharePath, bookmarks: &[Bookmark])
        -> Result<String>;

    /// Remove `paths` (`<group>/<instance>`) from the shared tree on `remote`,
    /// returning the new commit. The underlying objects are left alone.
    fn delete_paths(&self, remote: &str, paths: &[String]) -> Result<String>;

    /// Every shared casefile, grouped by name. Empty when nothing was shared.
    fn list_groups(&self) -> Result<Vec<SharedCasefileGroup>>;

    /// Deletions from history, optionally limited to groups containing `filter`
    fn list_deleted(&self, filter: Option<&str>) -> Result<Vec<DeletedCasefileRecord>>;

    /// Sorted, de-duplicated names of everyone who changed `path`
    fn authors(&self, path: &str) -> Result<CasefileAuthors>;

    /// Bookmarks stored at `path`; with `before_commit`, as they were just
    /// before that commit (used to recover deleted casefiles)
    fn read(&self, path: &str, before_commit: Option<&str>) -> Result<Vec<Bookmark>>;
}
