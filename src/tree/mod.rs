//! Balanced index trees: name trees, number trees and the page tree

mod index_tree;
mod page_tree;

pub use index_tree::{IndexTree, NameKeys, NameTree, NumberKeys, NumberTree, TreeKind, TreeNode};
pub use page_tree::{page_with_inherited, PageTree, INHERITABLE_ATTRIBUTES};

/// Entries per leaf and children per interior node
pub const DEFAULT_LEAF_SIZE: usize = 64;
