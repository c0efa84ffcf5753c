use crate::{error::Result, storage::CasefileStore};

use super::{CasefileAction, CasefileModel, SharingAction, SharingModel};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Casefile(CasefileAction),
    Sharing(SharingAction),
}

impl From<CasefileAction> for Action {
    fn from(action: CasefileAction) -> Self {
        Action::Casefile(action)
    }
}

impl From<SharingAction> for Action {
    fn from(action: SharingAction) -> Self {
        Action::Sharing(action)
    }
}

/// Routes each action to the model that owns its concern
pub struct Dispatcher<S> {
    casefile: CasefileModel,
    sharing: SharingModel<S>,
}

impl<S> Dispatcher<S>
where
    S: CasefileStore + Send + Sync + 'static,
{
    pub fn new(casefile: CasefileModel, sharing: SharingModel<S>) -> Self {
        Self { casefile, sharing }
    }

    pub fn casefile(&self) -> &CasefileModel {
        &self.casefile
    }

    pub fn sharing(&self) -> &SharingModel<S> {
        &self.sharing
    }

    pub async fn dispatch(&self, action: impl Into<Action>) -> Result<()> {
        match action.into() {
            Action::Casefile(action) => {
                self.casefile.apply(action);
                Ok(())
            }
            Action::Sharing(action) => {
                if action.is_locking() {
                    tracing::debug!("Dispatching locking action {}", action.name());
                }
                self.sharing.apply(action).await
            }
        }
    }

    /// Import shared casefiles into the active casefile
    ///
    /// One casefile imported into an empty casefile replaces it, and sharing
    /// then targets the same path. Otherwise each casefile is placed under a
    /// header naming its group and authors, and sharing targets a new instance
    /// of the first group. With `before_commit`, deleted casefiles are restored.
    pub async fn import_shared(
        &self,
        selections: Vec<String>,
        before_commit: Option<String>,
    ) -> Result<()> {
        let imported = self
            .sharing
            .load_for_import(selections, before_commit)
            .await?;
        let Some(first) = imported.first() else {
            return Ok(());
        };

        let share_path = if imported.len() == 1 && self.casefile.bookmarks().is_empty() {
            self.casefile
                .apply(CasefileAction::SetState(first.bookmarks.clone()));
            first.path.clone()
        } else {
            let fresh = first.path.fresh_instance();
            for casefile in imported {
                let notes = if casefile.authors.is_empty() {
                    String::new()
                } else {
                    format!("By {}", casefile.authors.join(", "))
                };
                self.casefile.apply(CasefileAction::Import {
                    bookmarks: casefile.bookmarks,
                    name: casefile.path.group().to_string(),
                    notes,
                });
            }
            fresh
        };
        tracing::info!("Sharing will target {}", share_path);
        self.dispatch(SharingAction::SetSharePath(share_path.to_string()))
            .await
    }

    /// Share the active casefile at the selected path
    pub async fn share_active_casefile(&self) -> Result<()> {
        let bookmarks = self.casefile.bookmarks();
        self.dispatch(SharingAction::ShareCasefile(bookmarks)).await
    }
}
