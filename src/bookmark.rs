//! Bookmarks and the value-returning operations on a bookmark forest
//!
//! Every operation here takes the current forest by reference and returns a
//! new forest; nothing is changed in place.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// Historical location recorded when a bookmark is created
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peg {
    pub commit: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    #[serde(default)]
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default)]
    pub mark_text: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub children: Vec<Bookmark>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peg: Option<Peg>,
}

/// What the user supplies when placing a new bookmark
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkInfo {
    pub file: Option<PathBuf>,
    pub line: Option<usize>,
    pub mark_text: String,
    pub notes: String,
    pub peg: Option<Peg>,
}

/// Where a moved bookmark lands among its new siblings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativePosition {
    Before(u64),
    After(u64),
}

impl Bookmark {
    pub fn new(id: u64, info: MarkInfo) -> Self {
        Self {
            id,
            file: info.file,
            line: info.line,
            mark_text: info.mark_text,
            notes: info.notes,
            children: Vec::new(),
            peg: info.peg,
        }
    }

    /// A bookmark with no location, used to head a group of imported bookmarks
    pub fn header(id: u64, mark_text: impl Into<String>, notes: impl Into<String>) -> Self {
        Self::new(
            id,
            MarkInfo {
                mark_text: mark_text.into(),
                notes: notes.into(),
                ..MarkInfo::default()
            },
        )
    }
}

/// Hands out bookmark ids; never repeats one it has issued or observed
#[derive(Debug, Clone)]
pub struct IdGenerator {
    next: u64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl IdGenerator {
    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Make sure future ids are above every id in `forest`
    pub fn observe(&mut self, forest: &[Bookmark]) {
        if let Some(max) = max_id(forest) {
            self.next = self.next.max(max + 1);
        }
    }

    /// Copy `forest`, giving every bookmark a fresh id
    pub fn renumber(&mut self, forest: &[Bookmark]) -> Vec<Bookmark> {
        forest
            .iter()
            .map(|mark| Bookmark {
                id: self.next_id(),
                children: self.renumber(&mark.children),
                ..mark.clone()
            })
            .collect()
    }
}

pub fn max_id(forest: &[Bookmark]) -> Option<u64> {
    forest
        .iter()
        .map(|mark| max_id(&mark.children).map_or(mark.id, |child| child.max(mark.id)))
        .max()
}

/// Translate a path of ids (root to item) into a path of sibling indexes
pub fn index_path(forest: &[Bookmark], ids: &[u64]) -> Option<Vec<usize>> {
    let mut result = Vec::with_capacity(ids.len());
    let mut level = forest;
    for step in ids {
        let i = level.iter().position(|mark| mark.id == *step)?;
        result.push(i);
        level = &level[i].children;
    }
    Some(result)
}

/// Depth-first search for the bookmark with `id`
pub fn find(forest: &[Bookmark], id: u64) -> Option<&Bookmark> {
    forest
        .iter()
        .find_map(|mark| (mark.id == id).then_some(mark).or_else(|| find(&mark.children, id)))
}

fn level_mut<'a>(forest: &'a mut Vec<Bookmark>, parents: &[usize]) -> &'a mut Vec<Bookmark> {
    let mut level = forest;
    for &i in parents {
        level = &mut level[i].children;
    }
    level
}

pub fn add(forest: &[Bookmark], bookmark: Bookmark) -> Vec<Bookmark> {
    let mut result = forest.to_vec();
    result.push(bookmark);
    result
}

/// Move the bookmark at `item_path` under `new_parent_path` (empty for top level)
///
/// Without a relative position the bookmark becomes the first child. Moving a
/// bookmark into itself or one of its descendants leaves the forest unchanged.
pub fn move_to(
    forest: &[Bookmark],
    item_path: &[u64],
    new_parent_path: &[u64],
    position: Option<RelativePosition>,
) -> Vec<Bookmark> {
    if item_path.is_empty() || new_parent_path.starts_with(item_path) {
        return forest.to_vec();
    }
    let Some(from) = index_path(forest, item_path) else {
        return forest.to_vec();
    };
    if index_path(forest, new_parent_path).is_none() {
        return forest.to_vec();
    }

    let Some((remove_at, parents)) = from.split_last() else {
        return forest.to_vec();
    };
    let mut result = forest.to_vec();
    let moving = level_mut(&mut result, parents).remove(*remove_at);

    // Indexes shift once the item is gone, so look the parent up again
    let Some(to) = index_path(&result, new_parent_path) else {
        return forest.to_vec();
    };
    let level = level_mut(&mut result, &to);
    let insert_at = match position {
        None => 0,
        Some(RelativePosition::Before(sibling)) => level
            .iter()
            .position(|mark| mark.id == sibling)
            .unwrap_or(level.len()),
        Some(RelativePosition::After(sibling)) => level
            .iter()
            .position(|mark| mark.id == sibling)
            .map_or(level.len(), |i| i + 1),
    };
    level.insert(insert_at, moving);
    result
}

pub fn edit_notes(forest: &[Bookmark], id: u64, notes: &str) -> Vec<Bookmark> {
    forest
        .iter()
        .map(|mark| Bookmark {
            notes: if mark.id == id {
                notes.to_string()
            } else {
                mark.notes.clone()
            },
            children: edit_notes(&mark.children, id, notes),
            ..mark.clone()
        })
        .collect()
}

pub fn delete(forest: &[Bookmark], item_path: &[u64]) -> Vec<Bookmark> {
    let Some(indexes) = index_path(forest, item_path) else {
        return forest.to_vec();
    };
    let Some((remove_at, parents)) = indexes.split_last() else {
        return forest.to_vec();
    };
    let mut result = forest.to_vec();
    level_mut(&mut result, parents).remove(*remove_at);
    result
}

/// Lift the children of the bookmark at `item_path` to follow it as siblings
pub fn promote_children(forest: &[Bookmark], item_path: &[u64]) -> Vec<Bookmark> {
    let Some(indexes) = index_path(forest, item_path) else {
        return forest.to_vec();
    };
    let Some((at, parents)) = indexes.split_last() else {
        return forest.to_vec();
    };
    let mut result = forest.to_vec();
    let level = level_mut(&mut result, parents);
    let children = std::mem::take(&mut level[*at].children);
    let tail = level.split_off(at + 1);
    level.extend(children);
    level.extend(tail);
    result
}

/// Bring bookmarks from another casefile into `forest` under a new header
/// bookmark named `name`. Imported bookmarks get fresh ids.
pub fn import(
    forest: &[Bookmark],
    imported: &[Bookmark],
    name: &str,
    notes: &str,
    ids: &mut IdGenerator,
) -> Vec<Bookmark> {
    ids.observe(forest);
    let mut header = Bookmark::header(ids.next_id(), name, notes);
    header.children = ids.renumber(imported);
    add(forest, header)
}

/// Every peg commit referenced in the forest, depth-first, first occurrence only
pub fn peg_commits(forest: &[Bookmark]) -> Vec<String> {
    fn walk(forest: &[Bookmark], seen: &mut HashSet<String>, out: &mut Vec<String>) {
        for mark in forest {
            if let Some(peg) = &mark.peg {
                if seen.insert(peg.commit.clone()) {
                    out.push(peg.commit.clone());
                }
            }
            walk(&mark.children, seen, out);
        }
    }
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    walk(forest, &mut seen, &mut out);
    out
}

/// Rewrite every bookmark's file path through `f`
pub fn map_files<F>(forest: &[Bookmark], f: &F) -> Vec<Bookmark>
where
    F: Fn(&Path) -> PathBuf,
{
    forest
        .iter()
        .map(|mark| Bookmark {
            file: mark.file.as_deref().map(f),
            children: map_files(&mark.children, f),
            ..mark.clone()
        })
        .collect()
}

/// Mark text for a source line: trimmed, and shortened past `limit` characters
pub fn shorten_mark_text(text: &str, limit: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let keep = limit.saturating_sub(3);
    let mut short: String = text.chars().take(keep).collect();
    short.push_str("...");
    short
}
