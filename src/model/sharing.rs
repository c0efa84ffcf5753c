use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::watch;

use crate::{
    bookmark::Bookmark,
    error::{Error, Result},
    sharing::{ConfirmUnknownCommits, ImportedCasefile, ShareOutcome, SharingSyncCoordinator},
    storage::{CasefileStore, GitCasefileStore, SharePath, SharedCasefileGroup},
};

use super::lock::{Model, Snapshot};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharingState {
    pub remotes: Vec<String>,
    pub remote: Option<String>,
    pub share_path: Option<SharePath>,
    pub known_casefiles: Vec<SharedCasefileGroup>,
    pub last_share: Option<ShareOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharingAction {
    SetState(SharingState),
    SetRemote(String),
    FetchRemote,
    /// `<group>` or `<group>/<instance>`
    SetSharePath(String),
    ShareCasefile(Vec<Bookmark>),
    DeleteCasefiles(Vec<String>),
}

impl SharingAction {
    pub fn name(&self) -> &'static str {
        match self {
            SharingAction::SetState(_) => "SetState",
            SharingAction::SetRemote(_) => "SetRemote",
            SharingAction::FetchRemote => "FetchRemote",
            SharingAction::SetSharePath(_) => "SetSharePath",
            SharingAction::ShareCasefile(_) => "ShareCasefile",
            SharingAction::DeleteCasefiles(_) => "DeleteCasefiles",
        }
    }

    /// Whether the action talks to a remote and so holds the lock
    pub fn is_locking(&self) -> bool {
        matches!(
            self,
            SharingAction::FetchRemote
                | SharingAction::ShareCasefile(_)
                | SharingAction::DeleteCasefiles(_)
        )
    }
}

/// Sharing settings and what is known about the remote's casefiles
pub struct SharingModel<S = GitCasefileStore> {
    model: Model<SharingState>,
    coordinator: Arc<SharingSyncCoordinator<S>>,
    confirm: Arc<dyn ConfirmUnknownCommits + Send + Sync>,
}

impl<S> SharingModel<S>
where
    S: CasefileStore + Send + Sync + 'static,
{
    pub fn new(
        coordinator: SharingSyncCoordinator<S>,
        confirm: Arc<dyn ConfirmUnknownCommits + Send + Sync>,
        lock_grace: Duration,
    ) -> Self {
        Self {
            model: Model::new(SharingState::default(), lock_grace),
            coordinator: Arc::new(coordinator),
            confirm,
        }
    }

    pub fn model(&self) -> &Model<SharingState> {
        &self.model
    }

    pub fn state(&self) -> SharingState {
        self.model.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot<SharingState>> {
        self.model.subscribe()
    }

    /// Run `f` against the coordinator on the blocking pool
    ///
    /// The returned future owns everything it needs, so it can outlive the
    /// caller as the body of a locking action.
    fn run_blocking<T, F>(&self, f: F) -> impl Future<Output = Result<T>> + Send + 'static
    where
        F: FnOnce(&SharingSyncCoordinator<S>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let coordinator = Arc::clone(&self.coordinator);
        async move {
            tokio::task::spawn_blocking(move || f(&coordinator))
                .await
                .map_err(|e| Error::Output {
                    operation: "run git in the background".to_string(),
                    message: e.to_string(),
                })?
        }
    }

    fn selected_remote(&self) -> Result<String> {
        self.model
            .state()
            .remote
            .ok_or(Error::NotSelected("remote"))
    }

    /// Re-read the remotes and the locally known shared casefiles
    pub async fn refresh(&self) -> Result<()> {
        let (remotes, groups) = self
            .run_blocking(|c| Ok((c.list_remotes()?, c.store().list_groups()?)))
            .await?;
        self.model.update(|state| SharingState {
            remote: state
                .remote
                .clone()
                .or_else(|| remotes.first().cloned()),
            remotes,
            known_casefiles: groups,
            ..state.clone()
        });
        Ok(())
    }

    /// Read shared casefiles for import; local only, so the lock is not taken
    pub async fn load_for_import(
        &self,
        selections: Vec<String>,
        before_commit: Option<String>,
    ) -> Result<Vec<ImportedCasefile>> {
        self.run_blocking(move |c| c.load_for_import(&selections, before_commit.as_deref()))
            .await
    }

    pub async fn apply(&self, action: SharingAction) -> Result<()> {
        let kind = action.name();
        tracing::debug!("Sharing action {}", kind);
        match action {
            SharingAction::SetState(state) => {
                self.model.update(|_| state);
                Ok(())
            }
            SharingAction::SetRemote(remote) => {
                self.model.update(|state| SharingState {
                    remote: Some(remote),
                    ..state.clone()
                });
                Ok(())
            }
            SharingAction::SetSharePath(path) => {
                let path = SharePath::parse(&path)?;
                self.model.update(|state| SharingState {
                    share_path: Some(path),
                    ..state.clone()
                });
                Ok(())
            }
            SharingAction::FetchRemote => {
                let remote = self.selected_remote()?;
                let work = self.run_blocking(move |c| {
                    c.fetch_shared(&remote)?;
                    c.fetch_remote(&remote)?;
                    c.store().list_groups()
                });
                self.model
                    .run_locking(kind, work, |state, groups| SharingState {
                        known_casefiles: groups.clone(),
                        ..state.clone()
                    })
                    .await?;
                Ok(())
            }
            SharingAction::ShareCasefile(bookmarks) => {
                let remote = self.selected_remote()?;
                let path = self
                    .model
                    .state()
                    .share_path
                    .ok_or(Error::NotSelected("share path"))?;
                let confirm = Arc::clone(&self.confirm);
                let work = self.run_blocking(move |c| {
                    let outcome = c.share(&remote, &path, &bookmarks, &*confirm)?;
                    Ok((outcome, c.store().list_groups()?))
                });
                self.model
                    .run_locking(kind, work, |state, (outcome, groups)| SharingState {
                        known_casefiles: groups.clone(),
                        last_share: Some(outcome.clone()),
                        ..state.clone()
                    })
                    .await?;
                Ok(())
            }
            SharingAction::DeleteCasefiles(paths) => {
                let remote = self.selected_remote()?;
                let work = self.run_blocking(move |c| {
                    c.store().delete_paths(&remote, &paths)?;
                    c.store().list_groups()
                });
                self.model
                    .run_locking(kind, work, |state, groups| SharingState {
                        known_casefiles: groups.clone(),
                        ..state.clone()
                    })
                    .await?;
                Ok(())
            }
        }
    }
}
