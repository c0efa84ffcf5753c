#![deny(clippy::mod_module_files)]
//! Bookmarks pegged to git history, and shared through a dedicated ref
//!
//! A bookmark records a file, a line and a note. When it is created the line
//! is pegged to the commit that last touched it, so it can be found again
//! after the file changes. Collections of bookmarks (casefiles) are shared
//! as blobs under `refs/collaboration/shared-casefiles`, outside any branch.

pub mod bookmark;
pub mod config;
pub mod error;
pub mod git;
pub mod model;
pub mod pegging;
pub mod persisted;
pub mod sharing;
pub mod storage;

pub use bookmark::{Bookmark, MarkInfo, Peg};
pub use error::{Error, Result};
