//! Key comparator shared by every index driver (spec.md §4.5 "Compare
//! invariant"). Grounded on the teacher's `TupleScheme`/`Cell` ordering in
//! `btree::tuple`, generalized to an explicit per-field NULL bitmap instead
//! of relying on `Cell` variants to encode nullability.

use bit_vec::BitVec;
use std::cmp::Ordering;

/// A composite key: one byte-string slot per field, `None` meaning NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeKey {
    fields: Vec<Option<Vec<u8>>>,
}

impl CompositeKey {
    pub fn new(fields: Vec<Option<Vec<u8>>>) -> Self {
        Self { fields }
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn is_null(&self, field: usize) -> bool {
        self.fields[field].is_none()
    }

    pub fn null_bitmap(&self) -> BitVec {
        BitVec::from_fn(self.fields.len(), |i| self.fields[i].is_none())
    }

    pub fn fields(&self) -> &[Option<Vec<u8>>] {
        &self.fields
    }

    /// Packed little-endian encoding used by index pages (spec.md §3.6):
    /// one `is_null` byte per field, followed by a `u32` length prefix and
    /// the raw bytes for every non-NULL field.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for field in &self.fields {
            match field {
                None => out.push(1),
                Some(bytes) => {
                    out.push(0);
                    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                    out.extend_from_slice(bytes);
                }
            }
        }
        out
    }

    /// Decode `field_count` fields from `buf`, returning the key and the
    /// number of bytes consumed.
    pub fn from_bytes(buf: &[u8], field_count: usize) -> (Self, usize) {
        let mut offset = 0;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            let is_null = buf[offset];
            offset += 1;
            if is_null == 1 {
                fields.push(None);
            } else {
                let mut len_bytes = [0u8; 4];
                len_bytes.copy_from_slice(&buf[offset..offset + 4]);
                let len = u32::from_le_bytes(len_bytes) as usize;
                offset += 4;
                fields.push(Some(buf[offset..offset + len].to_vec()));
                offset += len;
            }
        }
        (Self::new(fields), offset)
    }
}

/// Compares `CompositeKey`s field-by-field, never reading past
/// `field_count` (spec.md §4.5). NULL sorts before anything else.
///
/// `unique` distinguishes the "real key" comparator (duplicates forbidden)
/// from the "row id" comparator the B-tree driver appends as a tiebreaker
/// for non-unique indexes (spec.md §4.5). `has_header` marks a comparator
/// that reads its NULL bitmap from a packed entry header rather than from
/// a per-field out-of-band argument (spec.md §3.6).
#[derive(Debug, Clone, Copy)]
pub struct Compare {
    field_count: usize,
    pub unique: bool,
    pub has_header: bool,
}

impl Compare {
    pub fn new(field_count: usize) -> Self {
        Self { field_count, unique: true, has_header: true }
    }

    pub fn with_flags(field_count: usize, unique: bool, has_header: bool) -> Self {
        Self { field_count, unique, has_header }
    }

    pub fn field_count(&self) -> usize {
        self.field_count
    }

    pub fn cmp(&self, a: &CompositeKey, b: &CompositeKey) -> Ordering {
        for i in 0..self.field_count {
            let ordering = match (a.fields.get(i).and_then(|f| f.as_ref()), b.fields.get(i).and_then(|f| f.as_ref())) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => x.cmp(y),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    pub fn equal(&self, a: &CompositeKey, b: &CompositeKey) -> bool {
        self.cmp(a, b) == Ordering::Equal
    }

    /// Returns `true` (no violation) if *any* participating field is NULL
    /// on either side — preserved as specified even though it can mask
    /// violations on partially-specified keys (spec.md §9 Open Questions).
    pub fn integrity_check(&self, a: &CompositeKey, b: &CompositeKey) -> bool {
        for i in 0..self.field_count {
            if a.fields.get(i).map(|f| f.is_none()).unwrap_or(true) || b.fields.get(i).map(|f| f.is_none()).unwrap_or(true) {
                return true;
            }
        }
        !self.equal(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_key_round_trips_through_packed_bytes() {
        let k = key(&[Some(b"hello"), None, Some(b"x")]);
        let bytes = k.to_bytes();
        let (restored, consumed) = CompositeKey::from_bytes(&bytes, 3);
        assert_eq!(restored, k);
        assert_eq!(consumed, bytes.len());
    }

    fn key(values: &[Option<&[u8]>]) -> CompositeKey {
        CompositeKey::new(values.iter().map(|v| v.map(|b| b.to_vec())).collect())
    }

    #[test]
    fn null_sorts_before_any_value() {
        let cmp = Compare::new(1);
        let null_key = key(&[None]);
        let value_key = key(&[Some(b"a")]);
        assert_eq!(cmp.cmp(&null_key, &value_key), Ordering::Less);
        assert_eq!(cmp.cmp(&value_key, &null_key), Ordering::Greater);
    }

    #[test]
    fn never_reads_past_declared_field_count() {
        let cmp = Compare::new(1);
        let a = key(&[Some(b"x"), Some(b"mismatch")]);
        let b = key(&[Some(b"x"), Some(b"different")]);
        assert_eq!(cmp.cmp(&a, &b), Ordering::Equal);
    }

    #[test]
    fn integrity_check_passes_on_any_null_operand() {
        let cmp = Compare::new(2);
        let a = key(&[Some(b"x"), None]);
        let b = key(&[Some(b"x"), Some(b"y")]);
        assert!(cmp.integrity_check(&a, &b));
    }

    #[test]
    fn integrity_check_fails_on_real_duplicate() {
        let cmp = Compare::new(1);
        let a = key(&[Some(b"dup")]);
        let b = key(&[Some(b"dup")]);
        assert!(!cmp.integrity_check(&a, &b));
    }
}
