//! Name trees and number trees

use std::collections::HashSet;
use std::fmt::Debug;
use std::marker::PhantomData;
use log::{debug, trace, warn};
use crate::error::{PDFError, PDFResult};
use crate::pdf::{Dictionary, ObjectId, ObjectResolver, PDFValue, PDFWriter};
use super::DEFAULT_LEAF_SIZE;

/// Key type of a tree and the dictionary entry its leaves use
pub trait TreeKind {
    type Key: Ord + Clone + Debug;

    /// `Names` or `Nums`
    const LEAF_KEY: &'static str;

    fn key_to_value(key: &Self::Key) -> PDFValue;
    fn key_from_value(value: &PDFValue) -> Option<Self::Key>;
}

/// Byte string keys stored under `/Names`
#[derive(Debug, Clone, Copy)]
pub struct NameKeys;

impl TreeKind for NameKeys {
    type Key = Vec<u8>;
    const LEAF_KEY: &'static str = "Names";

    fn key_to_value(key: &Vec<u8>) -> PDFValue {
        PDFValue::string(key.clone())
    }

    fn key_from_value(value: &PDFValue) -> Option<Vec<u8>> {
        value.as_string().map(<[u8]>::to_vec)
    }
}

/// Integer keys stored under `/Nums`
#[derive(Debug, Clone, Copy)]
pub struct NumberKeys;

impl TreeKind for NumberKeys {
    type Key = i64;
    const LEAF_KEY: &'static str = "Nums";

    fn key_to_value(key: &i64) -> PDFValue {
        PDFValue::from(*key)
    }

    fn key_from_value(value: &PDFValue) -> Option<i64> {
        value.as_i64()
    }
}

/// A node of an index tree
#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode<K> {
    /// Sorted key/value pairs
    Leaf(Vec<(K, PDFValue)>),
    /// Children with the smallest and largest key below them
    Interior {
        limits: (K, K),
        children: Vec<TreeNode<K>>,
    },
}

impl<K: Ord + Clone> TreeNode<K> {
    fn limits(&self) -> Option<(K, K)> {
        match self {
            TreeNode::Leaf(items) => Some((items.first()?.0.clone(), items.last()?.0.clone())),
            TreeNode::Interior { limits, .. } => Some(limits.clone()),
        }
    }

    /// Interior node over `children`, or `None` when they hold no keys
    fn interior(children: Vec<TreeNode<K>>) -> Option<Self> {
        let min = children.iter().find_map(|c| c.limits())?.0;
        let max = children.iter().rev().find_map(|c| c.limits())?.1;
        Some(TreeNode::Interior {
            limits: (min, max),
            children,
        })
    }

    fn height(&self) -> usize {
        match self {
            TreeNode::Leaf(_) => 1,
            TreeNode::Interior { children, .. } => {
                1 + children.iter().map(TreeNode::height).max().unwrap_or(0)
            }
        }
    }

    fn leaf_count(&self) -> usize {
        match self {
            TreeNode::Leaf(_) => 1,
            TreeNode::Interior { children, .. } => children.iter().map(TreeNode::leaf_count).sum(),
        }
    }

    fn collect_into(&self, output: &mut Vec<(K, PDFValue)>) {
        match self {
            TreeNode::Leaf(items) => output.extend(items.iter().cloned()),
            TreeNode::Interior { children, .. } => {
                for child in children {
                    child.collect_into(output);
                }
            }
        }
    }
}

/// Balanced multiway search tree as stored in PDF name and number trees
#[derive(Debug, Clone, PartialEq)]
pub struct IndexTree<T: TreeKind> {
    root: TreeNode<T::Key>,
    _kind: PhantomData<T>,
}

pub type NameTree = IndexTree<NameKeys>;
pub type NumberTree = IndexTree<NumberKeys>;

impl<T: TreeKind> IndexTree<T> {
    /// Build a tree with at most `leaf_size` pairs per leaf and `leaf_size` children per node.
    ///
    /// Unsorted input is sorted first.
    pub fn build(mut items: Vec<(T::Key, PDFValue)>, leaf_size: usize) -> Self {
        let leaf_size = leaf_size.max(2);
        if !items.windows(2).all(|w| w[0].0 <= w[1].0) {
            warn!("Index tree items are not sorted, sorting {} entries", items.len());
            items.sort_by(|a, b| a.0.cmp(&b.0));
        }

        let mut level: Vec<TreeNode<T::Key>> = Vec::new();
        let mut rest = items.into_iter().peekable();
        while rest.peek().is_some() {
            level.push(TreeNode::Leaf(rest.by_ref().take(leaf_size).collect()));
        }

        while level.len() > 1 {
            let mut parents = Vec::with_capacity(level.len().div_ceil(leaf_size));
            let mut nodes = level.into_iter().peekable();
            while nodes.peek().is_some() {
                let children: Vec<_> = nodes.by_ref().take(leaf_size).collect();
                parents.extend(TreeNode::interior(children));
            }
            level = parents;
        }

        let root = level.pop().unwrap_or(TreeNode::Leaf(Vec::new()));
        debug!(
            "Built {} tree of height {} with {} leaves",
            T::LEAF_KEY,
            root.height(),
            root.leaf_count()
        );
        Self {
            root,
            _kind: PhantomData,
        }
    }

    /// Tree with the default leaf size
    pub fn from_items(items: Vec<(T::Key, PDFValue)>) -> Self {
        Self::build(items, DEFAULT_LEAF_SIZE)
    }

    pub fn root(&self) -> &TreeNode<T::Key> {
        &self.root
    }

    /// All pairs in key order
    pub fn read(&self) -> Vec<(T::Key, PDFValue)> {
        let mut output = Vec::new();
        self.root.collect_into(&mut output);
        output
    }

    pub fn get(&self, key: &T::Key) -> Option<&PDFValue> {
        let mut node = &self.root;
        loop {
            match node {
                TreeNode::Leaf(items) => {
                    return items
                        .binary_search_by(|(k, _)| k.cmp(key))
                        .ok()
                        .map(|i| &items[i].1);
                }
                TreeNode::Interior { limits, children } => {
                    if key < &limits.0 || key > &limits.1 {
                        return None;
                    }
                    node = children.iter().find(|child| {
                        child
                            .limits()
                            .map_or(false, |(min, max)| &min <= key && key <= &max)
                    })?;
                }
            }
        }
    }

    pub fn height(&self) -> usize {
        self.root.height()
    }

    pub fn leaf_count(&self) -> usize {
        self.root.leaf_count()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        matches!(&self.root, TreeNode::Leaf(items) if items.is_empty())
    }

    /// Add every node as an indirect object; returns the root
    pub fn write(&self, writer: &mut PDFWriter) -> PDFResult<ObjectId> {
        write_node::<T>(&self.root, true, writer)
    }

    /// Rebuild a tree from the nodes reachable from `root`; repeated nodes are skipped
    pub fn read_from(resolver: &mut impl ObjectResolver, root: ObjectId) -> PDFResult<Self> {
        let mut visited = HashSet::new();
        let root = read_node::<T>(resolver, root, &mut visited)?
            .unwrap_or(TreeNode::Leaf(Vec::new()));
        Ok(Self {
            root,
            _kind: PhantomData,
        })
    }
}

fn write_node<T: TreeKind>(
    node: &TreeNode<T::Key>,
    is_root: bool,
    writer: &mut PDFWriter,
) -> PDFResult<ObjectId> {
    let mut dict = Dictionary::new();
    match node {
        TreeNode::Leaf(items) => {
            let mut flat = Vec::with_capacity(items.len() * 2);
            for (key, value) in items {
                flat.push(T::key_to_value(key));
                flat.push(value.clone());
            }
            dict.set(T::LEAF_KEY, flat);
        }
        TreeNode::Interior { children, .. } => {
            let kids = children
                .iter()
                .map(|child| write_node::<T>(child, false, writer).map(PDFValue::Reference))
                .collect::<PDFResult<Vec<_>>>()?;
            dict.set("Kids", kids);
        }
    }
    if !is_root {
        if let Some((min, max)) = node.limits() {
            dict.set("Limits", vec![T::key_to_value(&min), T::key_to_value(&max)]);
        }
    }
    Ok(writer.add(dict))
}

fn read_node<T: TreeKind>(
    resolver: &mut impl ObjectResolver,
    id: ObjectId,
    visited: &mut HashSet<ObjectId>,
) -> PDFResult<Option<TreeNode<T::Key>>> {
    if !visited.insert(id) {
        warn!("Tree node {} reached twice, skipping", id);
        return Ok(None);
    }
    let dict = match resolver.resolve(id)? {
        PDFValue::Dictionary(dict) => dict,
        PDFValue::Null => return Ok(None),
        other => {
            return Err(PDFError::InvalidObjectType {
                expected: "dictionary",
                found: other.type_name(),
            })
        }
    };

    if let Some(flat) = dict.get_array(T::LEAF_KEY) {
        let mut items = Vec::with_capacity(flat.len() / 2);
        for pair in flat.chunks(2) {
            match pair {
                [key, value] => match T::key_from_value(key) {
                    Some(key) => items.push((key, value.clone())),
                    None => warn!("Skipping {} entry with a {} key", T::LEAF_KEY, key.type_name()),
                },
                _ => warn!("Odd number of elements in {} array of {}", T::LEAF_KEY, id),
            }
        }
        items.sort_by(|a, b| a.0.cmp(&b.0));
        trace!("Leaf {} holds {} entries", id, items.len());
        return Ok(Some(TreeNode::Leaf(items)));
    }

    let mut children = Vec::new();
    for kid in dict.get_array("Kids").unwrap_or(&[]) {
        match kid.as_reference() {
            Some(kid) => children.extend(read_node::<T>(resolver, kid, visited)?),
            None => warn!("Direct kid in tree node {} ignored", id),
        }
    }
    Ok(TreeNode::interior(children))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use pretty_assertions::assert_eq;

    fn numbered(n: i64) -> Vec<(i64, PDFValue)> {
        (0..n).map(|i| (i * 2, PDFValue::from(i))).collect()
    }

    #[rstest]
    #[case(0, 1, 1)]
    #[case(1, 1, 1)]
    #[case(64, 1, 1)]
    #[case(130, 2, 3)]
    #[case(5000, 3, 79)]
    fn test_build_shape(#[case] n: i64, #[case] height: usize, #[case] leaves: usize) {
        let items = numbered(n);
        let tree = NumberTree::build(items.clone(), 64);
        assert_eq!(tree.height(), height);
        assert_eq!(tree.leaf_count(), leaves);
        assert_eq!(tree.read(), items);
    }

    #[test_log::test]
    fn test_root_limits() {
        let tree = NumberTree::build(numbered(130), 64);
        match tree.root() {
            TreeNode::Interior { limits, children } => {
                assert_eq!(limits, &(0, 258));
                assert_eq!(children.len(), 3);
            }
            other => panic!("expected interior root, got {:?}", other),
        }
    }

    #[test_log::test]
    fn test_lookup() {
        let tree = NumberTree::build(numbered(1000), 8);
        assert_eq!(tree.get(&500), Some(&PDFValue::from(250)));
        assert_eq!(tree.get(&501), None);
        assert_eq!(tree.get(&-1), None);
        assert_eq!(tree.get(&5000), None);
    }

    #[test_log::test]
    fn test_unsorted_names_are_sorted() {
        let items = vec![
            (b"beta".to_vec(), PDFValue::from(2)),
            (b"alpha".to_vec(), PDFValue::from(1)),
        ];
        let tree = NameTree::from_items(items);
        assert_eq!(tree.read()[0].0, b"alpha".to_vec());
        assert_eq!(tree.get(&b"beta".to_vec()), Some(&PDFValue::from(2)));
    }

    #[test_log::test]
    fn test_write_and_read_back() {
        let mut writer = PDFWriter::default();
        let items: Vec<(Vec<u8>, PDFValue)> = (0..300)
            .map(|i| (format!("dest{:04}", i).into_bytes(), PDFValue::from(i)))
            .collect();
        let tree = NameTree::build(items.clone(), 16);
        let root = tree.write(&mut writer).unwrap();

        let root_dict = writer.get(root).unwrap().as_dict().unwrap().clone();
        assert!(root_dict.get("Limits").is_none());
        assert!(root_dict.get_array("Kids").is_some());

        let reread = NameTree::read_from(&mut writer, root).unwrap();
        assert_eq!(reread.read(), items);
        assert_eq!(reread.height(), tree.height());
    }

    #[test_log::test]
    fn test_cycle_is_ignored() {
        let mut writer = PDFWriter::default();
        let leaf = writer.add({
            let mut leaf = Dictionary::new();
            leaf.set("Nums", vec![PDFValue::from(1), PDFValue::from(10)]);
            leaf
        });
        let root = writer.allocate();
        let mut dict = Dictionary::new();
        dict.set("Kids", vec![PDFValue::Reference(leaf), PDFValue::Reference(root)]);
        writer.set(root, dict).unwrap();

        let tree = NumberTree::read_from(&mut writer, root).unwrap();
        assert_eq!(tree.read(), vec![(1, PDFValue::from(10))]);
    }
}
