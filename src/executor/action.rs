//! Action nodes (spec.md §3.7, §4.8 Action submodule). The set of action
//! kinds is closed, so — unlike `ExecIterator` — this is a tagged enum
//! (spec.md §9 Design Notes). `CheckCancel` is the cancellation poll point
//! the spec calls out explicitly; `Project` trims a row down to a field
//! subset, the other concrete "action" the teacher's `select.rs` performs
//! between scan and output.

use crate::engine_err;
use crate::error::{EngineResult, ErrorKind};

use super::archive::{ArchiveReader, ArchiveWriter};
use super::class_id::{ClassId, CLASS_CHECK_CANCEL, CLASS_PROJECT};
use super::iterator::{ExecContext, Row};

/// Returned by an action that can interrupt iteration (spec.md §5:
/// "subsequent actions return `Break` from `execute()`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Break,
}

#[derive(Debug, Clone)]
pub enum Action {
    /// Polls `tx.is_cancelled()` between rows; no forced interrupt, so a
    /// blocking call already in flight still runs to completion (spec.md
    /// §5 "Cancellation & timeouts").
    CheckCancel,
    Project { fields: Vec<usize> },
}

impl Action {
    pub fn class_id(&self) -> ClassId {
        match self {
            Action::CheckCancel => CLASS_CHECK_CANCEL,
            Action::Project { .. } => CLASS_PROJECT,
        }
    }

    /// Writes class ID + per-class payload (spec.md §4.8 "Serialization").
    /// `CheckCancel` carries no state, so its payload is empty.
    pub fn serialize(&self, out: &mut ArchiveWriter) {
        out.put_u16(self.class_id().0);
        if let Action::Project { fields } = self {
            out.put_u32(fields.len() as u32);
            for &f in fields {
                out.put_u32(f as u32);
            }
        }
    }

    /// Reconstructs an action from a class ID and its payload.
    pub fn deserialize(reader: &mut ArchiveReader) -> EngineResult<Action> {
        let class_id = ClassId(reader.get_u16()?);
        match class_id {
            CLASS_CHECK_CANCEL => Ok(Action::CheckCancel),
            CLASS_PROJECT => {
                let count = reader.get_u32()?;
                let mut fields = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    fields.push(reader.get_u32()? as usize);
                }
                Ok(Action::Project { fields })
            }
            other => Err(engine_err!(ErrorKind::Unexpected, "unknown action class id {}", other.0)),
        }
    }

    /// Runs the action against `row` (ignored by `CheckCancel`, which only
    /// consults `ctx`). Returns the row to propagate and whether the
    /// caller should keep iterating.
    pub fn execute(&self, ctx: &ExecContext, row: Row) -> EngineResult<(Row, Flow)> {
        match self {
            Action::CheckCancel => {
                if ctx.tx.is_cancelled() {
                    Ok((row, Flow::Break))
                } else {
                    Ok((row, Flow::Continue))
                }
            }
            Action::Project { fields } => {
                let projected = fields
                    .iter()
                    .map(|&i| row.fields().get(i).cloned().flatten())
                    .collect();
                Ok((crate::index::CompositeKey::new(projected), Flow::Continue))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::iterator::RowBuffers;
    use crate::index::CompositeKey;
    use crate::txn::Transaction;

    fn row() -> Row {
        CompositeKey::new(vec![Some(vec![1]), Some(vec![2]), Some(vec![3])])
    }

    #[test]
    fn check_cancel_breaks_once_transaction_is_cancelled() {
        let tx = Transaction::begin_detached();
        let buffers = RowBuffers::new();
        let ctx = ExecContext { tx: &tx, buffers: &buffers };

        let (_, flow) = Action::CheckCancel.execute(&ctx, row()).unwrap();
        assert_eq!(flow, Flow::Continue);

        tx.cancel();
        let (_, flow) = Action::CheckCancel.execute(&ctx, row()).unwrap();
        assert_eq!(flow, Flow::Break);
    }

    #[test]
    fn project_keeps_only_selected_fields_in_order() {
        let tx = Transaction::begin_detached();
        let buffers = RowBuffers::new();
        let ctx = ExecContext { tx: &tx, buffers: &buffers };

        let (projected, _) = Action::Project { fields: vec![2, 0] }.execute(&ctx, row()).unwrap();
        assert_eq!(projected.fields(), &[Some(vec![3]), Some(vec![1])]);
    }

    #[test]
    fn serialize_deserialize_serialize_is_stable() {
        for action in [Action::CheckCancel, Action::Project { fields: vec![2, 0, 1] }] {
            let mut w = ArchiveWriter::new();
            action.serialize(&mut w);
            let bytes = w.into_bytes();

            let restored = Action::deserialize(&mut ArchiveReader::new(&bytes)).unwrap();

            let mut w2 = ArchiveWriter::new();
            restored.serialize(&mut w2);
            assert_eq!(bytes, w2.into_bytes());
        }
    }
}
