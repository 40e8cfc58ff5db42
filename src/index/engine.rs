//! Shared node-page engine behind both the B-tree and array-index drivers
//! (spec.md §4.5): packed leaf/internal pages, split-on-overflow insert,
//! descend-and-filter search, and a leaf-chain scan. Factored out once the
//! array index needed the same logic over three independent `TreeHeader`s
//! instead of the B-tree's one (spec.md §3.6).

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::buffer_pool::{BufferPool, FileId, FixMode, FixOptions, PAGE_SIZE};
use crate::engine_err;
use crate::error::{EngineResult, ErrorKind};

use super::compare::Compare;
use super::{CompositeKey, TreeHeader, EMPTY_PAGE};

/// Entries per node before it splits (see btree.rs module doc for the
/// fixed-fanout simplification this implies).
pub(super) const ORDER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Node {
    Leaf { entries: Vec<(CompositeKey, u32)>, right: u32 },
    Internal { keys: Vec<CompositeKey>, children: Vec<u32> },
}

fn encode_node(node: &Node) -> Vec<u8> {
    let mut buf = vec![0u8; PAGE_SIZE];
    match node {
        Node::Leaf { entries, right } => {
            buf[0] = 0;
            buf[1..5].copy_from_slice(&(entries.len() as u32).to_le_bytes());
            buf[5..9].copy_from_slice(&right.to_le_bytes());
            let mut offset = 9;
            for (key, row_id) in entries {
                let kb = key.to_bytes();
                buf[offset..offset + kb.len()].copy_from_slice(&kb);
                offset += kb.len();
                buf[offset..offset + 4].copy_from_slice(&row_id.to_le_bytes());
                offset += 4;
            }
        }
        Node::Internal { keys, children } => {
            buf[0] = 1;
            buf[1..5].copy_from_slice(&(keys.len() as u32).to_le_bytes());
            let mut offset = 5;
            for key in keys {
                let kb = key.to_bytes();
                buf[offset..offset + kb.len()].copy_from_slice(&kb);
                offset += kb.len();
            }
            for child in children {
                buf[offset..offset + 4].copy_from_slice(&child.to_le_bytes());
                offset += 4;
            }
        }
    }
    buf
}

fn decode_node(buf: &[u8], field_count: usize) -> Node {
    let mut count_bytes = [0u8; 4];
    count_bytes.copy_from_slice(&buf[1..5]);
    let count = u32::from_le_bytes(count_bytes) as usize;

    if buf[0] == 0 {
        let mut right_bytes = [0u8; 4];
        right_bytes.copy_from_slice(&buf[5..9]);
        let right = u32::from_le_bytes(right_bytes);
        let mut offset = 9;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let (key, consumed) = CompositeKey::from_bytes(&buf[offset..], field_count);
            offset += consumed;
            let mut row_bytes = [0u8; 4];
            row_bytes.copy_from_slice(&buf[offset..offset + 4]);
            offset += 4;
            entries.push((key, u32::from_le_bytes(row_bytes)));
        }
        Node::Leaf { entries, right }
    } else {
        let mut offset = 5;
        let mut keys = Vec::with_capacity(count);
        for _ in 0..count {
            let (key, consumed) = CompositeKey::from_bytes(&buf[offset..], field_count);
            offset += consumed;
            keys.push(key);
        }
        let mut children = Vec::with_capacity(count + 1);
        for _ in 0..count + 1 {
            let mut b = [0u8; 4];
            b.copy_from_slice(&buf[offset..offset + 4]);
            offset += 4;
            children.push(u32::from_le_bytes(b));
        }
        Node::Internal { keys, children }
    }
}

/// Node-page I/O for one tree, backed by a shared file and a shared
/// page-id allocator (so the array index's three trees can interleave
/// pages in one file without colliding).
pub(super) struct TreeStore<'a> {
    pub pool: &'a Arc<BufferPool>,
    pub file: FileId,
    pub next_page: &'a AtomicU32,
    pub field_count: usize,
    pub unique: bool,
}

impl<'a> TreeStore<'a> {
    fn compare(&self) -> Compare {
        Compare::with_flags(self.field_count, self.unique, false)
    }

    fn order(&self, a: &(CompositeKey, u32), b: &(CompositeKey, u32)) -> Ordering {
        match self.compare().cmp(&a.0, &b.0) {
            Ordering::Equal if !self.unique => a.1.cmp(&b.1),
            other => other,
        }
    }

    fn alloc_page(&self) -> u32 {
        self.next_page.fetch_add(1, AtomicOrdering::Relaxed)
    }

    fn read_node(&self, page_id: u32) -> EngineResult<Node> {
        let mem = self.pool.fix(self.file, page_id, FixMode::ReadOnly, FixOptions::default())?;
        let node = decode_node(&mem.read(), self.field_count);
        self.pool.unfix(mem, false, false)?;
        Ok(node)
    }

    /// See btree.rs's `write_node`: `Allocate` is safe because the write
    /// always replaces the full page body.
    fn write_node(&self, page_id: u32, node: &Node) -> EngineResult<()> {
        let mem = self.pool.fix(self.file, page_id, FixMode::Allocate, FixOptions::default())?;
        let encoded = encode_node(node);
        mem.write(|buf| buf.copy_from_slice(&encoded))?;
        mem.touch(true);
        self.pool.unfix(mem, true, false)
    }

    pub fn insert(&self, mut tree: TreeHeader, key: CompositeKey, row_id: u32) -> EngineResult<TreeHeader> {
        if tree.root == EMPTY_PAGE {
            let leaf_id = self.alloc_page();
            self.write_node(leaf_id, &Node::Leaf { entries: vec![(key, row_id)], right: EMPTY_PAGE })?;
            tree.root = leaf_id;
            tree.leftmost_leaf = leaf_id;
            tree.rightmost_leaf = leaf_id;
            tree.entry_count = 1;
            return Ok(tree);
        }

        let mut path = Vec::new();
        let mut node_id = tree.root;
        loop {
            match self.read_node(node_id)? {
                Node::Internal { keys, children } => {
                    let idx = keys.partition_point(|k| self.compare().cmp(k, &key) != Ordering::Greater);
                    path.push((node_id, keys, children.clone()));
                    node_id = children[idx];
                }
                Node::Leaf { mut entries, right } => {
                    let probe = (key.clone(), row_id);
                    let pos = entries.binary_search_by(|e| self.order(e, &probe)).unwrap_or_else(|p| p);
                    if self.unique && entries.get(pos).map(|e| self.compare().equal(&e.0, &key)).unwrap_or(false) {
                        return Err(engine_err!(ErrorKind::Unexpected, "duplicate key in unique index"));
                    }
                    entries.insert(pos, probe);

                    if entries.len() <= ORDER {
                        self.write_node(node_id, &Node::Leaf { entries, right })?;
                        tree.entry_count += 1;
                        tree.step_count += 1;
                        return Ok(tree);
                    }

                    let split_at = entries.len() / 2;
                    let sibling_entries = entries.split_off(split_at);
                    let separator = sibling_entries[0].0.clone();
                    let sibling_id = self.alloc_page();
                    self.write_node(sibling_id, &Node::Leaf { entries: sibling_entries, right })?;
                    self.write_node(node_id, &Node::Leaf { entries, right: sibling_id })?;
                    if tree.rightmost_leaf == node_id {
                        tree.rightmost_leaf = sibling_id;
                    }

                    tree.entry_count += 1;
                    tree.step_count += 1;
                    self.propagate_split(&mut tree, &mut path, separator, sibling_id)?;
                    return Ok(tree);
                }
            }
        }
    }

    fn propagate_split(
        &self,
        tree: &mut TreeHeader,
        path: &mut Vec<(u32, Vec<CompositeKey>, Vec<u32>)>,
        mut separator: CompositeKey,
        mut right_child: u32,
    ) -> EngineResult<()> {
        loop {
            match path.pop() {
                None => {
                    let new_root = self.alloc_page();
                    self.write_node(
                        new_root,
                        &Node::Internal { keys: vec![separator], children: vec![tree.root, right_child] },
                    )?;
                    tree.root = new_root;
                    return Ok(());
                }
                Some((node_id, mut keys, mut children)) => {
                    let idx = keys.partition_point(|k| self.compare().cmp(k, &separator) != Ordering::Greater);
                    keys.insert(idx, separator);
                    children.insert(idx + 1, right_child);

                    if keys.len() <= ORDER {
                        self.write_node(node_id, &Node::Internal { keys, children })?;
                        return Ok(());
                    }

                    let split_at = keys.len() / 2;
                    let up_separator = keys[split_at].clone();
                    let sibling_keys = keys.split_off(split_at + 1);
                    keys.pop();
                    let sibling_children = children.split_off(split_at + 1);

                    let sibling_id = self.alloc_page();
                    self.write_node(sibling_id, &Node::Internal { keys: sibling_keys, children: sibling_children })?;
                    self.write_node(node_id, &Node::Internal { keys, children })?;

                    separator = up_separator;
                    right_child = sibling_id;
                }
            }
        }
    }

    pub fn search(&self, tree: TreeHeader, key: &CompositeKey) -> EngineResult<Vec<u32>> {
        if tree.root == EMPTY_PAGE {
            return Ok(Vec::new());
        }
        let mut node_id = tree.root;
        loop {
            match self.read_node(node_id)? {
                Node::Internal { keys, children } => {
                    let idx = keys.partition_point(|k| self.compare().cmp(k, key) != Ordering::Greater);
                    node_id = children[idx];
                }
                Node::Leaf { entries, .. } => {
                    return Ok(entries
                        .into_iter()
                        .filter(|(k, _)| self.compare().equal(k, key))
                        .map(|(_, row_id)| row_id)
                        .collect());
                }
            }
        }
    }

    pub fn delete(&self, mut tree: TreeHeader, key: &CompositeKey, row_id: u32) -> EngineResult<TreeHeader> {
        if tree.root == EMPTY_PAGE {
            return Ok(tree);
        }
        let mut node_id = tree.root;
        loop {
            match self.read_node(node_id)? {
                Node::Internal { keys, children } => {
                    let idx = keys.partition_point(|k| self.compare().cmp(k, key) != Ordering::Greater);
                    node_id = children[idx];
                }
                Node::Leaf { mut entries, right } => {
                    let before = entries.len();
                    entries.retain(|(k, r)| !(self.compare().equal(k, key) && *r == row_id));
                    if entries.len() != before {
                        tree.entry_count = tree.entry_count.saturating_sub(1);
                        tree.step_count += 1;
                        self.write_node(node_id, &Node::Leaf { entries, right })?;
                    }
                    return Ok(tree);
                }
            }
        }
    }

    pub fn scan(&self, tree: TreeHeader) -> EngineResult<Vec<(CompositeKey, u32)>> {
        let mut out = Vec::new();
        let mut leaf = tree.leftmost_leaf;
        while leaf != EMPTY_PAGE {
            match self.read_node(leaf)? {
                Node::Leaf { entries, right } => {
                    out.extend(entries);
                    leaf = right;
                }
                Node::Internal { .. } => break,
            }
        }
        Ok(out)
    }
}
