//! Page tree: the ordered page sequence and its `/Pages` nodes

use std::collections::{HashMap, HashSet};
use log::{debug, warn};
use crate::error::{PDFError, PDFResult};
use crate::pdf::{Dictionary, ObjectId, ObjectResolver, PDFValue, PDFWriter};
use super::DEFAULT_LEAF_SIZE;

/// Page attributes a page inherits from its ancestors
pub const INHERITABLE_ATTRIBUTES: [&str; 4] = ["Resources", "MediaBox", "CropBox", "Rotate"];

/// Ordered pages plus the layout used when the tree is written
#[derive(Debug, Clone, PartialEq)]
pub struct PageTree {
    pages: Vec<ObjectId>,
    leaf_size: usize,
    linear: bool,
}

impl Default for PageTree {
    fn default() -> Self {
        Self::new(DEFAULT_LEAF_SIZE, false)
    }
}

impl PageTree {
    /// `linear` keeps every page under the root node regardless of `leaf_size`
    pub fn new(leaf_size: usize, linear: bool) -> Self {
        Self {
            pages: Vec::new(),
            leaf_size: leaf_size.max(2),
            linear,
        }
    }

    pub fn push(&mut self, page: ObjectId) {
        self.pages.push(page);
    }

    /// Drop `page` from the sequence; returns whether it was present
    pub fn remove(&mut self, page: ObjectId) -> bool {
        let before = self.pages.len();
        self.pages.retain(|&p| p != page);
        self.pages.len() != before
    }

    pub fn pages(&self) -> &[ObjectId] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Whether every page will hang directly off the root node
    pub fn is_single_parent(&self) -> bool {
        self.linear || self.pages.len() <= self.leaf_size
    }

    /// Rearrange pages: position `i` (1-based) receives the page formerly at `order[i - 1]`
    pub fn reorder(&mut self, order: &[usize]) -> PDFResult<()> {
        let count = self.pages.len();
        if !self.is_single_parent() {
            return Err(PDFError::reorder(format!(
                "{} pages span several page nodes (leaf size {}); enable linear page mode",
                count, self.leaf_size
            )));
        }
        if order.len() != count {
            return Err(PDFError::reorder(format!(
                "order lists {} positions for {} pages",
                order.len(),
                count
            )));
        }

        let mut seen = vec![false; count];
        for &position in order {
            if position == 0 || position > count {
                return Err(PDFError::reorder(format!(
                    "position {} outside 1..={}",
                    position, count
                )));
            }
            if std::mem::replace(&mut seen[position - 1], true) {
                return Err(PDFError::reorder(format!("position {} listed twice", position)));
            }
        }

        self.pages = order.iter().map(|&position| self.pages[position - 1]).collect();
        debug!("Reordered {} pages", count);
        Ok(())
    }

    /// Write the `/Pages` nodes under `root` and point each page's `/Parent` at its node
    pub fn build(&self, writer: &mut PDFWriter, root: ObjectId) -> PDFResult<()> {
        // (node, pages below it)
        let mut level: Vec<(ObjectId, usize)> = self.pages.iter().map(|&p| (p, 1)).collect();
        let mut parents: HashMap<ObjectId, ObjectId> = HashMap::new();
        let mut nodes: Vec<(ObjectId, Vec<ObjectId>, usize)> = Vec::new();

        if !self.linear {
            while level.len() > self.leaf_size {
                let mut next_level = Vec::with_capacity(level.len().div_ceil(self.leaf_size));
                for group in level.chunks(self.leaf_size) {
                    let node = writer.allocate();
                    let count = group.iter().map(|&(_, n)| n).sum();
                    for &(kid, _) in group {
                        parents.insert(kid, node);
                    }
                    nodes.push((node, group.iter().map(|&(kid, _)| kid).collect(), count));
                    next_level.push((node, count));
                }
                level = next_level;
            }
        }

        for &(kid, _) in &level {
            parents.insert(kid, root);
        }
        nodes.push((root, level.iter().map(|&(kid, _)| kid).collect(), self.pages.len()));

        for (node, kids, count) in &nodes {
            let mut dict = Dictionary::with_type("Pages");
            dict.set(
                "Kids",
                kids.iter().map(|&kid| PDFValue::Reference(kid)).collect::<Vec<_>>(),
            );
            dict.set("Count", *count);
            if let Some(&parent) = parents.get(node) {
                dict.set_reference("Parent", parent);
            }
            writer.set(*node, dict)?;
        }

        for &page in &self.pages {
            let parent = parents.get(&page).copied().unwrap_or(root);
            let dict = writer
                .get_mut(page)
                .and_then(PDFValue::as_dict_mut)
                .ok_or_else(|| PDFError::misuse(format!("page {} is not a dictionary", page)))?;
            dict.set_reference("Parent", parent);
        }
        debug!("Wrote page tree with {} pages in {} node(s)", self.pages.len(), nodes.len());
        Ok(())
    }

    /// Pages below `root` in document order; nodes reached twice are skipped
    pub fn collect(resolver: &mut impl ObjectResolver, root: ObjectId) -> PDFResult<Vec<ObjectId>> {
        let mut pages = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                warn!("Page tree node {} reached twice, skipping", id);
                continue;
            }
            let dict = match resolver.resolve(id)? {
                PDFValue::Dictionary(dict) => dict,
                other => {
                    warn!("Page tree node {} is a {}, skipping", id, other.type_name());
                    continue;
                }
            };
            if is_pages_node(&dict) {
                let kids = dict.get_array("Kids").unwrap_or(&[]);
                stack.extend(kids.iter().rev().filter_map(PDFValue::as_reference));
            } else {
                pages.push(id);
            }
        }
        Ok(pages)
    }
}

fn is_pages_node(dict: &Dictionary) -> bool {
    dict.has_type("Pages") || (!dict.has_type("Page") && dict.get_array("Kids").is_some())
}

/// Page dictionary with inherited attributes copied down from its ancestors
pub fn page_with_inherited(resolver: &mut impl ObjectResolver, page: ObjectId) -> PDFResult<Dictionary> {
    let mut dict = match resolver.resolve(page)? {
        PDFValue::Dictionary(dict) => dict,
        other => {
            return Err(PDFError::InvalidObjectType {
                expected: "dictionary",
                found: other.type_name(),
            })
        }
    };

    let mut visited = HashSet::from([page]);
    let mut parent = dict.get_reference("Parent");
    while let Some(id) = parent.filter(|id| visited.insert(*id)) {
        let PDFValue::Dictionary(node) = resolver.resolve(id)? else { break };
        for key in INHERITABLE_ATTRIBUTES {
            if !dict.contains_key(key) {
                if let Some(value) = node.get(key) {
                    dict.set(key, value.clone());
                }
            }
        }
        parent = node.get_reference("Parent");
    }
    Ok(dict)
}
