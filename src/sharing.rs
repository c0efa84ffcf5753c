//! Keeping shared casefiles in step with a remote
//!
//! Before publishing, every commit a bookmark is pegged to is checked against
//! the remote's branches. A peg on a commit the remote has never seen cannot
//! be resolved by anyone who fetches the casefile, so the user is asked first.

use rayon::prelude::*;

use crate::{
    bookmark::{map_files, peg_commits, Bookmark},
    error::{Error, Result},
    git::Git,
    storage::{CasefileStore, GitCasefileStore, SharePath},
};

/// Asked whether to share although some pegged commits are unknown to the remote
pub trait ConfirmUnknownCommits {
    fn confirm(&self, remote: &str, commits: &[String]) -> bool;
}

impl<F> ConfirmUnknownCommits for F
where
    F: Fn(&str, &[String]) -> bool,
{
    fn confirm(&self, remote: &str, commits: &[String]) -> bool {
        self(remote, commits)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareOutcome {
    Shared { path: SharePath, commit: String },
    /// Declined because of these commits
    Aborted { unknown: Vec<String> },
}

/// A shared casefile read back for import, with everyone who changed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedCasefile {
    pub path: SharePath,
    pub bookmarks: Vec<Bookmark>,
    pub authors: Vec<String>,
}

pub struct SharingSyncCoordinator<S = GitCasefileStore> {
    git: Git,
    store: S,
    shared_ref: String,
    fan_out: usize,
}

impl<S: CasefileStore> SharingSyncCoordinator<S> {
    pub fn new(git: Git, store: S, shared_ref: impl Into<String>, fan_out: usize) -> Self {
        Self {
            git,
            store,
            shared_ref: shared_ref.into(),
            fan_out: fan_out.max(1),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    pub fn list_remotes(&self) -> Result<Vec<String>> {
        let output = self
            .git
            .command("list Git remotes")
            .arg("remote")
            .run_text()?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Move the local shared ref to the remote's tip, without merging
    pub fn fetch_shared(&self, remote: &str) -> Result<()> {
        self.git
            .command(format!(
                "fetch shared casefiles ref from Git remote '{}'",
                remote
            ))
            .arg("fetch")
            .arg(remote)
            .arg(format!("+{0}*:{0}*", self.shared_ref))
            .run()?;
        tracing::info!("Fetched {} from {}", self.shared_ref, remote);
        Ok(())
    }

    pub fn fetch_remote(&self, remote: &str) -> Result<()> {
        self.git
            .command(format!("fetch remote '{}'", remote))
            .arg("fetch")
            .arg(remote)
            .run()?;
        Ok(())
    }

    /// Whether any of `remote`'s tracking branches contains `commit`
    pub fn is_known_to_remote(&self, remote: &str, commit: &str) -> Result<bool> {
        known_to_remote(&self.git, remote, commit)
    }

    /// The members of `commits` that `remote` does not have, in input order
    pub fn commits_unknown_to_remote(
        &self,
        remote: &str,
        commits: &[String],
    ) -> Result<Vec<String>> {
        if commits.is_empty() {
            return Ok(Vec::new());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.fan_out)
            .build()
            .map_err(|e| Error::Output {
                operation: "start reachability checks".to_string(),
                message: e.to_string(),
            })?;

        let git = &self.git;
        let known: Vec<bool> = pool.install(|| {
            commits
                .par_iter()
                .map(|commit| known_to_remote(git, remote, commit))
                .collect::<Result<Vec<bool>>>()
        })?;

        Ok(commits
            .iter()
            .zip(known)
            .filter(|(_, known)| !known)
            .map(|(commit, _)| commit.clone())
            .collect())
    }

    /// Read the casefiles named by `selections` for import
    ///
    /// A selection is `<group>/<instance>`, or a bare group standing for every
    /// instance in it. With `before_commit` each casefile is read as it was
    /// just before that commit, which is how deleted casefiles are recovered.
    pub fn load_for_import(
        &self,
        selections: &[String],
        before_commit: Option<&str>,
    ) -> Result<Vec<ImportedCasefile>> {
        let mut paths = Vec::new();
        let mut groups = None;
        for selection in selections {
            if selection.contains('/') {
                paths.push(SharePath::parse(selection)?);
                continue;
            }
            if groups.is_none() {
                groups = Some(self.store.list_groups()?);
            }
            let group = groups
                .iter()
                .flatten()
                .find(|group| group.name == *selection)
                .ok_or_else(|| Error::UnknownCasefile(selection.clone()))?;
            for instance in &group.instances {
                paths.push(SharePath::parse(&instance.path)?);
            }
        }

        paths
            .into_iter()
            .map(|path| {
                let key = path.to_string();
                let bookmarks = self.store.read(&key, before_commit)?;
                let authors = self.store.authors(&key)?.authors;
                tracing::debug!("Loaded {} bookmark(s) from {}", bookmarks.len(), key);
                Ok(ImportedCasefile {
                    path,
                    bookmarks,
                    authors,
                })
            })
            .collect()
    }

    /// Publish `bookmarks` at `path` on `remote`
    ///
    /// When pegs refer to commits the remote lacks, `confirm` decides whether
    /// to go ahead anyway.
    pub fn share(
        &self,
        remote: &str,
        path: &SharePath,
        bookmarks: &[Bookmark],
        confirm: &dyn ConfirmUnknownCommits,
    ) -> Result<ShareOutcome> {
        let commits = peg_commits(bookmarks);
        let unknown = self.commits_unknown_to_remote(remote, &commits)?;
        if !unknown.is_empty() {
            tracing::info!(
                "{} of {} pegged commit(s) unknown to {}",
                unknown.len(),
                commits.len(),
                remote
            );
            if !confirm.confirm(remote, &unknown) {
                return Ok(ShareOutcome::Aborted { unknown });
            }
        }

        let relative = map_files(bookmarks, &|file| self.git.repo_relative(file));
        let commit = self.store.share_at_path(remote, path, &relative)?;
        Ok(ShareOutcome::Shared {
            path: path.clone(),
            commit,
        })
    }
}

fn known_to_remote(git: &Git, remote: &str, commit: &str) -> Result<bool> {
    if git.rev_parse_optional(commit)?.is_none() {
        tracing::debug!("{} is not in the local repository", commit);
        return Ok(false);
    }
    let output = git
        .command(format!("check whether {} knows {}", remote, commit))
        .args(["branch", "-r", "--contains", commit, "--list"])
        .arg(format!("{}/*", remote))
        .run_text()?;
    Ok(!output.trim().is_empty())
}
