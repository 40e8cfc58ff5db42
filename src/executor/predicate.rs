//! Predicate actions (spec.md §4.8 Predicate submodule). The variant set is
//! closed — every predicate kind a program can express is known ahead of
//! time — so this is a tagged enum rather than a trait object (spec.md §9
//! Design Notes: "tagged enums vs. trait objects for closed/open variant
//! sets"), grounded on the teacher's `sql::executor::expr_state` expression
//! tree but flattened to the field-index/byte-value comparisons this
//! engine's row format actually carries.

use crate::engine_err;
use crate::error::{EngineResult, ErrorKind};
use crate::index::{Compare, CompositeKey};

use super::archive::{ArchiveReader, ArchiveWriter};
use super::class_id::{
    ClassId, CLASS_PREDICATE_AND, CLASS_PREDICATE_COMPARE, CLASS_PREDICATE_NOT, CLASS_PREDICATE_OR,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
}

impl CompareOp {
    fn to_u8(self) -> u8 {
        match self {
            CompareOp::Eq => 0,
            CompareOp::Lt => 1,
            CompareOp::Le => 2,
            CompareOp::Gt => 3,
            CompareOp::Ge => 4,
            CompareOp::Ne => 5,
        }
    }

    fn from_u8(v: u8) -> EngineResult<Self> {
        match v {
            0 => Ok(CompareOp::Eq),
            1 => Ok(CompareOp::Lt),
            2 => Ok(CompareOp::Le),
            3 => Ok(CompareOp::Gt),
            4 => Ok(CompareOp::Ge),
            5 => Ok(CompareOp::Ne),
            other => Err(engine_err!(ErrorKind::Unexpected, "unknown CompareOp tag {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Predicate {
    /// Compare one row field against a literal byte string. `None` on
    /// either side means NULL, ordered NULL-first per `Compare` (spec.md
    /// §4.5).
    Compare { field: usize, op: CompareOp, value: Option<Vec<u8>> },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn class_id(&self) -> ClassId {
        match self {
            Predicate::Compare { .. } => CLASS_PREDICATE_COMPARE,
            Predicate::And(_) => CLASS_PREDICATE_AND,
            Predicate::Or(_) => CLASS_PREDICATE_OR,
            Predicate::Not(_) => CLASS_PREDICATE_NOT,
        }
    }

    /// Writes class ID + per-class payload (spec.md §4.8 "Serialization"),
    /// recursing into children so a composed predicate is one contiguous
    /// run of `class_id + payload` frames.
    pub fn serialize(&self, out: &mut ArchiveWriter) {
        out.put_u16(self.class_id().0);
        match self {
            Predicate::Compare { field, op, value } => {
                out.put_u32(*field as u32);
                out.put_u8(op.to_u8());
                out.put_opt_bytes(value.as_deref());
            }
            Predicate::And(children) | Predicate::Or(children) => {
                out.put_u32(children.len() as u32);
                for child in children {
                    child.serialize(out);
                }
            }
            Predicate::Not(inner) => inner.serialize(out),
        }
    }

    /// Reconstructs a predicate from a class ID and its payload, dispatching
    /// on the ID exactly as §4.8 and §9 ("dispatch on the ID resolves the
    /// constructor") describe.
    pub fn deserialize(reader: &mut ArchiveReader) -> EngineResult<Predicate> {
        let class_id = ClassId(reader.get_u16()?);
        match class_id {
            CLASS_PREDICATE_COMPARE => {
                let field = reader.get_u32()? as usize;
                let op = CompareOp::from_u8(reader.get_u8()?)?;
                let value = reader.get_opt_bytes()?;
                Ok(Predicate::Compare { field, op, value })
            }
            CLASS_PREDICATE_AND => Ok(Predicate::And(Self::deserialize_children(reader)?)),
            CLASS_PREDICATE_OR => Ok(Predicate::Or(Self::deserialize_children(reader)?)),
            CLASS_PREDICATE_NOT => Ok(Predicate::Not(Box::new(Predicate::deserialize(reader)?))),
            other => Err(engine_err!(ErrorKind::Unexpected, "unknown predicate class id {}", other.0)),
        }
    }

    fn deserialize_children(reader: &mut ArchiveReader) -> EngineResult<Vec<Predicate>> {
        let count = reader.get_u32()?;
        let mut children = Vec::with_capacity(count as usize);
        for _ in 0..count {
            children.push(Predicate::deserialize(reader)?);
        }
        Ok(children)
    }

    pub fn eval(&self, row: &CompositeKey) -> bool {
        match self {
            Predicate::Compare { field, op, value } => {
                let cmp = Compare::with_flags(1, true, false);
                let lhs = row.fields().get(*field).cloned().flatten();
                let field_key = |v: Option<Vec<u8>>| CompositeKey::new(vec![v]);
                let ordering = cmp.cmp(&field_key(lhs), &field_key(value.clone()));
                use std::cmp::Ordering::*;
                match op {
                    CompareOp::Eq => ordering == Equal,
                    CompareOp::Ne => ordering != Equal,
                    CompareOp::Lt => ordering == Less,
                    CompareOp::Le => ordering != Greater,
                    CompareOp::Gt => ordering == Greater,
                    CompareOp::Ge => ordering != Less,
                }
            }
            Predicate::And(children) => children.iter().all(|p| p.eval(row)),
            Predicate::Or(children) => children.iter().any(|p| p.eval(row)),
            Predicate::Not(inner) => !inner.eval(row),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[Option<&[u8]>]) -> CompositeKey {
        CompositeKey::new(fields.iter().map(|f| f.map(|b| b.to_vec())).collect())
    }

    #[test]
    fn compare_eq_matches_exact_field_value() {
        let p = Predicate::Compare { field: 0, op: CompareOp::Eq, value: Some(b"x".to_vec()) };
        assert!(p.eval(&row(&[Some(b"x")])));
        assert!(!p.eval(&row(&[Some(b"y")])));
    }

    #[test]
    fn null_is_ordered_before_any_value() {
        let p = Predicate::Compare { field: 0, op: CompareOp::Lt, value: Some(b"x".to_vec()) };
        assert!(p.eval(&row(&[None])));
    }

    #[test]
    fn and_or_not_compose() {
        let gt = Predicate::Compare { field: 0, op: CompareOp::Gt, value: Some(vec![1]) };
        let lt = Predicate::Compare { field: 0, op: CompareOp::Lt, value: Some(vec![5]) };
        let between = Predicate::And(vec![gt, lt]);
        assert!(between.eval(&row(&[Some(&[3])])));
        assert!(!between.eval(&row(&[Some(&[9])])));

        let not_between = Predicate::Not(Box::new(between));
        assert!(not_between.eval(&row(&[Some(&[9])])));
    }

    #[test]
    fn serialize_deserialize_serialize_is_stable() {
        let gt = Predicate::Compare { field: 0, op: CompareOp::Gt, value: Some(vec![1]) };
        let lt = Predicate::Compare { field: 1, op: CompareOp::Lt, value: None };
        let original = Predicate::Not(Box::new(Predicate::Or(vec![gt, lt])));

        let mut w = ArchiveWriter::new();
        original.serialize(&mut w);
        let bytes = w.into_bytes();

        let restored = Predicate::deserialize(&mut ArchiveReader::new(&bytes)).unwrap();

        let mut w2 = ArchiveWriter::new();
        restored.serialize(&mut w2);
        assert_eq!(bytes, w2.into_bytes());
    }
}
