mod command;
mod tree;

pub use command::{Git, GitCommand, GitOutput};
pub use tree::{
    kind_name, mktree_input, parse_ls_tree, split_nul_records, TreeEntry, BLOB_MODE, EMPTY_TREE,
    TREE_MODE,
};
