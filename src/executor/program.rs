//! `Program`: a directed acyclic graph of iterator nodes, each holding
//! action nodes, referenced by integer id so programs can be serialized
//! and reused as prepared statements (spec.md §3.7, §4.8). Grounded on the
//! teacher's `sql::executor::sql_handler` as the thing that owns a
//! statement's executable form, generalized from one fixed pipeline to an
//! id-addressed object table.
//!
//! Two execution models share one `ExecIterator`/`Action` object table
//! (spec.md §4.8 table):
//! - **V2** (primary here, closer to the teacher's
//!   `sequential_scan.rs`/`stream.rs` batch-iterator style): a flat list
//!   of iterator ids, each driven `start_up` → repeated `next` → `finish`.
//! - **V1**: a thin recursive wrapper over the same iterators, walking the
//!   relation tree by following each node's declared child ids.

use std::collections::HashMap;

use crate::engine_err;
use crate::error::{EngineResult, ErrorKind};
use crate::txn::Transaction;

use super::action::{Action, Flow};
use super::archive::{ArchiveReader, ArchiveWriter};
use super::iterator::{build_iterator, ExecContext, ExecIterator, Row, RowBuffers};
use super::class_id::ClassId;

pub type IteratorId = u32;

/// One node in the iterator tree: the iterator itself, its V1 children (in
/// relation-tree order), and the actions run on every row it produces.
pub struct IteratorNode {
    pub iterator: Box<dyn ExecIterator>,
    pub children: Vec<IteratorId>,
    pub actions: Vec<Action>,
}

/// A prepared, resolvable unit of execution: one or more statement roots,
/// an id-addressed node table, placeholder parameters, and the owning
/// transaction (spec.md §4.8 "Program shape").
pub struct Program {
    roots: Vec<IteratorId>,
    nodes: HashMap<IteratorId, IteratorNode>,
    params: Vec<Option<Vec<u8>>>,
    tx: Transaction,
    buffers: RowBuffers,
    initialized: bool,
}

impl Program {
    pub fn new(tx: Transaction) -> Self {
        Self {
            roots: Vec::new(),
            nodes: HashMap::new(),
            params: Vec::new(),
            tx,
            buffers: RowBuffers::new(),
            initialized: false,
        }
    }

    pub fn with_params(mut self, params: Vec<Option<Vec<u8>>>) -> Self {
        self.params = params;
        self
    }

    pub fn param(&self, index: usize) -> Option<&Option<Vec<u8>>> {
        self.params.get(index)
    }

    pub fn add_node(&mut self, id: IteratorId, node: IteratorNode) {
        self.nodes.insert(id, node);
    }

    pub fn add_root(&mut self, id: IteratorId) {
        self.roots.push(id);
    }

    /// Resolves every root id against the node table, failing fast if the
    /// program references an id it never registered a node for (spec.md
    /// §3.7: "the `Program` resolves [ids] during `initialize`").
    pub fn initialize(&mut self) -> EngineResult<()> {
        for &root in &self.roots {
            self.resolve(root)?;
        }
        self.initialized = true;
        Ok(())
    }

    fn resolve(&self, id: IteratorId) -> EngineResult<()> {
        let node = self
            .nodes
            .get(&id)
            .ok_or_else(|| engine_err!(ErrorKind::Unexpected, "program references unregistered iterator id {}", id))?;
        for &child in &node.children {
            self.resolve(child)?;
        }
        Ok(())
    }

    /// V2: flat-list execution. Drives each root's `start_up`/`next`/
    /// `finish` directly, applying its actions to every row and publishing
    /// the surviving rows to the iterator's buffer slot for any downstream
    /// consumer (spec.md §4.8).
    pub fn execute_v2(&mut self, root: IteratorId) -> EngineResult<Vec<Row>> {
        if !self.initialized {
            return Err(engine_err!(ErrorKind::Unexpected, "execute called before initialize"));
        }
        let ctx = ExecContext { tx: &self.tx, buffers: &self.buffers };
        let node = self
            .nodes
            .get_mut(&root)
            .ok_or_else(|| engine_err!(ErrorKind::Unexpected, "unknown iterator id {}", root))?;

        node.iterator.start_up(&ctx)?;
        let mut out = Vec::new();
        while let Some(mut row) = node.iterator.next(&ctx)? {
            let mut broke = false;
            for action in &node.actions {
                let (next_row, flow) = action.execute(&ctx, row)?;
                row = next_row;
                if flow == Flow::Break {
                    broke = true;
                    break;
                }
            }
            if broke {
                break;
            }
            self.buffers.publish(root, row.clone());
            out.push(row);
        }
        node.iterator.finish(&ctx)?;
        Ok(out)
    }

    /// V1: recursive relation-tree wrapper over the same nodes — each
    /// call gathers its children's full output first, then runs its own
    /// iterator and actions (spec.md §4.8 table: "Relation-tree of
    /// pointers, each `initialize`/`next`/`terminate`").
    pub fn execute_v1(&mut self, root: IteratorId) -> EngineResult<Vec<Row>> {
        if !self.initialized {
            return Err(engine_err!(ErrorKind::Unexpected, "execute called before initialize"));
        }
        let children = self
            .nodes
            .get(&root)
            .ok_or_else(|| engine_err!(ErrorKind::Unexpected, "unknown iterator id {}", root))?
            .children
            .clone();
        for child in children {
            self.execute_v1(child)?;
        }
        self.execute_v2(root)
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    pub fn take_buffer(&self, iterator_id: IteratorId) -> Vec<Row> {
        self.buffers.take(iterator_id)
    }

    /// Serializes the program's node graph by walking roots and writing
    /// class ID + per-class payload for every node (spec.md §4.8
    /// "Serialization"). Nodes are visited in id order rather than the
    /// `HashMap`'s iteration order, so `serialize` is deterministic and the
    /// §8 round-trip property (`serialize(program) == serialize(deserialize
    /// (serialize(program)))`) holds. Params, the transaction, and the row
    /// buffers are not part of the envelope — they are supplied fresh at
    /// `deserialize` time (a prepared statement is reused across
    /// transactions).
    pub fn serialize(&self) -> EngineResult<Vec<u8>> {
        let mut out = ArchiveWriter::new();

        out.put_u32(self.roots.len() as u32);
        for &root in &self.roots {
            out.put_u32(root);
        }

        let mut ids: Vec<&IteratorId> = self.nodes.keys().collect();
        ids.sort();

        out.put_u32(ids.len() as u32);
        for &id in ids {
            let node = &self.nodes[id];
            out.put_u32(*id);
            out.put_u16(node.iterator.class_id().0);
            node.iterator.serialize_payload(&mut out)?;

            out.put_u32(node.children.len() as u32);
            for &child in &node.children {
                out.put_u32(child);
            }

            out.put_u32(node.actions.len() as u32);
            for action in &node.actions {
                action.serialize(&mut out);
            }
        }

        Ok(out.into_bytes())
    }

    /// Reconstructs a program from bytes produced by `serialize`, dispatching
    /// each node's iterator on its class ID (spec.md §9: "dispatch on the ID
    /// resolves the constructor"). The result is unresolved (`initialize`
    /// must still be called) and carries no params or prior row buffers.
    pub fn deserialize(bytes: &[u8], tx: Transaction) -> EngineResult<Program> {
        let mut reader = ArchiveReader::new(bytes);

        let root_count = reader.get_u32()?;
        let mut roots = Vec::with_capacity(root_count as usize);
        for _ in 0..root_count {
            roots.push(reader.get_u32()?);
        }

        let node_count = reader.get_u32()?;
        let mut nodes = HashMap::with_capacity(node_count as usize);
        for _ in 0..node_count {
            let id = reader.get_u32()?;
            let class_id = ClassId(reader.get_u16()?);
            let iterator = build_iterator(class_id, &mut reader)?;

            let child_count = reader.get_u32()?;
            let mut children = Vec::with_capacity(child_count as usize);
            for _ in 0..child_count {
                children.push(reader.get_u32()?);
            }

            let action_count = reader.get_u32()?;
            let mut actions = Vec::with_capacity(action_count as usize);
            for _ in 0..action_count {
                actions.push(Action::deserialize(&mut reader)?);
            }

            nodes.insert(id, IteratorNode { iterator, children, actions });
        }

        Ok(Program {
            roots,
            nodes,
            params: Vec::new(),
            tx,
            buffers: RowBuffers::new(),
            initialized: false,
        })
    }
}
