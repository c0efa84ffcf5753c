use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::sync::watch;

use crate::bookmark::{self, Bookmark, IdGenerator, MarkInfo, RelativePosition};

use super::lock::{Model, Snapshot};

/// Changes to the active casefile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasefileAction {
    SetState(Vec<Bookmark>),
    Clear,
    AddBookmark(MarkInfo),
    MoveBookmark {
        item_path: Vec<u64>,
        new_parent_path: Vec<u64>,
        position: Option<RelativePosition>,
    },
    EditNotes {
        id: u64,
        notes: String,
    },
    DeleteBookmark {
        item_path: Vec<u64>,
    },
    PromoteChildren {
        item_path: Vec<u64>,
    },
    Import {
        bookmarks: Vec<Bookmark>,
        name: String,
        notes: String,
    },
}

impl CasefileAction {
    pub fn name(&self) -> &'static str {
        match self {
            CasefileAction::SetState(_) => "SetState",
            CasefileAction::Clear => "Clear",
            CasefileAction::AddBookmark(_) => "AddBookmark",
            CasefileAction::MoveBookmark { .. } => "MoveBookmark",
            CasefileAction::EditNotes { .. } => "EditNotes",
            CasefileAction::DeleteBookmark { .. } => "DeleteBookmark",
            CasefileAction::PromoteChildren { .. } => "PromoteChildren",
            CasefileAction::Import { .. } => "Import",
        }
    }
}

/// The forest that results from applying `action` to `forest`
pub fn reduce(forest: &[Bookmark], action: CasefileAction, ids: &mut IdGenerator) -> Vec<Bookmark> {
    match action {
        CasefileAction::SetState(bookmarks) => {
            ids.observe(&bookmarks);
            bookmarks
        }
        CasefileAction::Clear => Vec::new(),
        CasefileAction::AddBookmark(info) => {
            ids.observe(forest);
            bookmark::add(forest, Bookmark::new(ids.next_id(), info))
        }
        CasefileAction::MoveBookmark {
            item_path,
            new_parent_path,
            position,
        } => bookmark::move_to(forest, &item_path, &new_parent_path, position),
        CasefileAction::EditNotes { id, notes } => bookmark::edit_notes(forest, id, &notes),
        CasefileAction::DeleteBookmark { item_path } => bookmark::delete(forest, &item_path),
        CasefileAction::PromoteChildren { item_path } => {
            bookmark::promote_children(forest, &item_path)
        }
        CasefileAction::Import {
            bookmarks,
            name,
            notes,
        } => bookmark::import(forest, &bookmarks, &name, &notes, ids),
    }
}

/// The active casefile
#[derive(Clone)]
pub struct CasefileModel {
    model: Model<Vec<Bookmark>>,
    ids: Arc<Mutex<IdGenerator>>,
}

impl CasefileModel {
    pub fn new(lock_grace: Duration) -> Self {
        Self {
            model: Model::new(Vec::new(), lock_grace),
            ids: Arc::new(Mutex::new(IdGenerator::default())),
        }
    }

    pub fn model(&self) -> &Model<Vec<Bookmark>> {
        &self.model
    }

    pub fn bookmarks(&self) -> Vec<Bookmark> {
        self.model.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot<Vec<Bookmark>>> {
        self.model.subscribe()
    }

    pub fn apply(&self, action: CasefileAction) {
        tracing::debug!("Casefile action {}", action.name());
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        self.model.update(|forest| reduce(forest, action, &mut ids));
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn info(text: &str, line: usize) -> MarkInfo {
        MarkInfo {
            file: Some(PathBuf::from("src/lib.rs")),
            line: Some(line),
            mark_text: text.to_string(),
            ..MarkInfo::default()
        }
    }

    #[test]
    fn test_add_assigns_increasing_ids() {
        let model = CasefileModel::new(Duration::from_millis(5));
        model.apply(CasefileAction::AddBookmark(info("a", 1)));
        model.apply(CasefileAction::AddBookmark(info("b", 2)));
        let ids: Vec<u64> = model.bookmarks().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_ids_not_reused_after_set_state() {
        let model = CasefileModel::new(Duration::from_millis(5));
        model.apply(CasefileAction::SetState(vec![Bookmark::header(40, "x", "")]));
        model.apply(CasefileAction::AddBookmark(info("b", 2)));
        assert_eq!(model.bookmarks()[1].id, 41);

        model.apply(CasefileAction::Clear);
        assert!(model.bookmarks().is_empty());
        model.apply(CasefileAction::AddBookmark(info("c", 3)));
        assert_eq!(model.bookmarks()[0].id, 42);
    }

    #[test]
    fn test_structural_actions() {
        let model = CasefileModel::new(Duration::from_millis(5));
        for (text, line) in [("a", 1), ("b", 2), ("c", 3)] {
            model.apply(CasefileAction::AddBookmark(info(text, line)));
        }
        model.apply(CasefileAction::MoveBookmark {
            item_path: vec![3],
            new_parent_path: vec![1],
            position: None,
        });
        model.apply(CasefileAction::EditNotes {
            id: 3,
            notes: "nested".to_string(),
        });
        let forest = model.bookmarks();
        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].children[0].notes, "nested");

        model.apply(CasefileAction::PromoteChildren { item_path: vec![1] });
        let order: Vec<u64> = model.bookmarks().iter().map(|m| m.id).collect();
        assert_eq!(order, vec![1, 3, 2]);

        model.apply(CasefileAction::DeleteBookmark { item_path: vec![3] });
        let order: Vec<u64> = model.bookmarks().iter().map(|m| m.id).collect();
        assert_eq!(order, vec![1, 2]);
    }

    #[test]
    fn test_import_into_nonempty_uses_header() {
        let model = CasefileModel::new(Duration::from_millis(5));
        model.apply(CasefileAction::AddBookmark(info("a", 1)));
        model.apply(CasefileAction::Import {
            bookmarks: vec![Bookmark::header(1, "theirs", "")],
            name: "review".to_string(),
            notes: "from alice".to_string(),
        });
        let forest = model.bookmarks();
        assert_eq!(forest.len(), 2);
        assert_eq!(forest[1].mark_text, "review");
        assert_eq!(forest[1].children[0].mark_text, "theirs");
        assert_ne!(forest[1].children[0].id, 1);
    }

    #[test]
    fn test_actions_are_published() {
        let model = CasefileModel::new(Duration::from_millis(5));
        let mut updates = model.subscribe();
        updates.borrow_and_update();
        model.apply(CasefileAction::AddBookmark(info("a", 1)));
        assert!(updates.has_changed().unwrap());
        assert_eq!(updates.borrow_and_update().state.len(), 1);
    }
}
