//! Typed append-only column storage. A [`Column`] keeps its elements in a
//! contiguous `Vec` of one primitive type; a [`TieredColumn`] wraps a
//! `Column` and may flush older elements to an unlinked temp file when the
//! frame was requested to not be memory-resident.
use crate::error::LatticeError;
use crate::types::{ElemType, Primitive, Scalar};
use deepsize::DeepSizeOf;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::os::unix::fs::FileExt;

/// A typed column of values in a contiguous, memory-resident format.
#[derive(Serialize, Deserialize, PartialEq, Clone, Debug, DeepSizeOf)]
pub enum Column {
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
}

macro_rules! typed_accessors {
    ($push:ident, $get:ident, $t:ty, $variant:ident) => {
        /// Append one element. Errors if this column holds another type.
        pub fn $push(&mut self, v: $t) -> Result<(), LatticeError> {
            match self {
                Column::$variant(data) => {
                    data.push(v);
                    Ok(())
                }
                _ => Err(LatticeError::TypeMismatch),
            }
        }

        /// Read one element, or `None` when out of bounds or this column
        /// holds another type.
        pub fn $get(&self, idx: usize) -> Option<$t> {
            match self {
                Column::$variant(data) => data.get(idx).copied(),
                _ => None,
            }
        }
    };
}

impl Column {
    /// Creates an empty column of the given element type.
    pub fn new(elem_type: ElemType) -> Self {
        Column::with_capacity(elem_type, 0)
    }

    /// Creates an empty column with room for `cap` elements. Parsers size
    /// their staging columns to the line count of the block they consume.
    pub fn with_capacity(elem_type: ElemType, cap: usize) -> Self {
        match elem_type {
            ElemType::I8 => Column::I8(Vec::with_capacity(cap)),
            ElemType::I16 => Column::I16(Vec::with_capacity(cap)),
            ElemType::I32 => Column::I32(Vec::with_capacity(cap)),
            ElemType::I64 => Column::I64(Vec::with_capacity(cap)),
            ElemType::F32 => Column::F32(Vec::with_capacity(cap)),
            ElemType::F64 => Column::F64(Vec::with_capacity(cap)),
            ElemType::Bool => Column::Bool(Vec::with_capacity(cap)),
        }
    }

    /// The element type of this column.
    pub fn elem_type(&self) -> ElemType {
        match self {
            Column::I8(_) => ElemType::I8,
            Column::I16(_) => ElemType::I16,
            Column::I32(_) => ElemType::I32,
            Column::I64(_) => ElemType::I64,
            Column::F32(_) => ElemType::F32,
            Column::F64(_) => ElemType::F64,
            Column::Bool(_) => ElemType::Bool,
        }
    }

    /// The number of elements in this column.
    pub fn len(&self) -> usize {
        match self {
            Column::I8(d) => d.len(),
            Column::I16(d) => d.len(),
            Column::I32(d) => d.len(),
            Column::I64(d) => d.len(),
            Column::F32(d) => d.len(),
            Column::F64(d) => d.len(),
            Column::Bool(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenate `other` onto the end of this column. Errors when the
    /// element types differ, in which case neither column is modified.
    pub fn append(&mut self, other: Column) -> Result<(), LatticeError> {
        match (self, other) {
            (Column::I8(a), Column::I8(b)) => a.extend(b),
            (Column::I16(a), Column::I16(b)) => a.extend(b),
            (Column::I32(a), Column::I32(b)) => a.extend(b),
            (Column::I64(a), Column::I64(b)) => a.extend(b),
            (Column::F32(a), Column::F32(b)) => a.extend(b),
            (Column::F64(a), Column::F64(b)) => a.extend(b),
            (Column::Bool(a), Column::Bool(b)) => a.extend(b),
            _ => return Err(LatticeError::TypeMismatch),
        }
        Ok(())
    }

    /// Drop all elements past the first `len`.
    pub fn truncate(&mut self, len: usize) {
        match self {
            Column::I8(d) => d.truncate(len),
            Column::I16(d) => d.truncate(len),
            Column::I32(d) => d.truncate(len),
            Column::I64(d) => d.truncate(len),
            Column::F32(d) => d.truncate(len),
            Column::F64(d) => d.truncate(len),
            Column::Bool(d) => d.truncate(len),
        }
    }

    /// Read one element as a type-erased [`Scalar`].
    pub fn get(&self, idx: usize) -> Option<Scalar> {
        if idx >= self.len() {
            return None;
        }
        Some(match self {
            Column::I8(d) => Scalar::from_value(d[idx]),
            Column::I16(d) => Scalar::from_value(d[idx]),
            Column::I32(d) => Scalar::from_value(d[idx]),
            Column::I64(d) => Scalar::from_value(d[idx]),
            Column::F32(d) => Scalar::from_value(d[idx]),
            Column::F64(d) => Scalar::from_value(d[idx]),
            Column::Bool(d) => Scalar::from_value(d[idx]),
        })
    }

    typed_accessors!(push_i8, get_i8, i8, I8);
    typed_accessors!(push_i16, get_i16, i16, I16);
    typed_accessors!(push_i32, get_i32, i32, I32);
    typed_accessors!(push_i64, get_i64, i64, I64);
    typed_accessors!(push_f32, get_f32, f32, F32);
    typed_accessors!(push_f64, get_f64, f64, F64);
    typed_accessors!(push_bool, get_bool, bool, Bool);

    /// The little-endian raw encoding of all elements, used when flushing
    /// a tier to disk.
    fn raw_bytes(&self) -> Vec<u8> {
        fn encode<T: Primitive>(data: &[T]) -> Vec<u8> {
            let width = T::ELEM.width();
            let mut out = Vec::with_capacity(data.len() * width);
            for v in data {
                out.extend_from_slice(&v.to_raw()[..width]);
            }
            out
        }
        match self {
            Column::I8(d) => encode(d),
            Column::I16(d) => encode(d),
            Column::I32(d) => encode(d),
            Column::I64(d) => encode(d),
            Column::F32(d) => encode(d),
            Column::F64(d) => encode(d),
            Column::Bool(d) => encode(d),
        }
    }
}

/// When a non-memory-resident column's in-memory tier grows past this many
/// bytes, it is flushed to the spill file.
pub const DEFAULT_SPILL_THRESHOLD: usize = 128 * 1024 * 1024;

/// A column vector that may keep its older elements on disk.
///
/// Created with `in_mem = true` this is a plain single-tier column and
/// behaves exactly like [`Column`]. Created with `in_mem = false`, appends
/// accumulate in memory until the in-memory tier passes a spill threshold,
/// at which point its raw bytes are moved to an anonymous temp file. The
/// column optionally carries the NUMA node its memory should live near,
/// which the ingestion driver uses as a pool-placement hint.
#[derive(Debug)]
pub struct TieredColumn {
    mem: Column,
    spill: Option<File>,
    spilled: usize,
    in_mem: bool,
    node: Option<usize>,
    spill_threshold: usize,
}

impl TieredColumn {
    /// Creates an empty column of the given type. `node` pins the column's
    /// preferred NUMA node; `None` means any node.
    pub fn new(elem_type: ElemType, in_mem: bool, node: Option<usize>) -> Self {
        TieredColumn {
            mem: Column::new(elem_type),
            spill: None,
            spilled: 0,
            in_mem,
            node,
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_spill_threshold(
        elem_type: ElemType,
        threshold: usize,
    ) -> Self {
        let mut col = TieredColumn::new(elem_type, false, None);
        col.spill_threshold = threshold;
        col
    }

    pub fn elem_type(&self) -> ElemType {
        self.mem.elem_type()
    }

    /// Total elements across both tiers.
    pub fn len(&self) -> usize {
        self.spilled + self.mem.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The preferred NUMA node of this column, `None` for any.
    pub fn node(&self) -> Option<usize> {
        self.node
    }

    /// Concatenate a memory-resident column onto this one, flushing the
    /// in-memory tier to disk afterwards if it outgrew the threshold.
    pub fn append(&mut self, other: Column) -> Result<(), LatticeError> {
        self.mem.append(other)?;
        self.maybe_spill()
    }

    /// Read one element, re-reading the spill file for flushed indices.
    pub fn get(&self, idx: usize) -> Result<Option<Scalar>, LatticeError> {
        if idx < self.spilled {
            let width = self.elem_type().width();
            let mut raw = vec![0u8; width];
            self.spill
                .as_ref()
                .expect("spilled rows without a spill file")
                .read_exact_at(&mut raw, (idx * width) as u64)?;
            let mut s = Scalar::new(self.elem_type());
            s.set_raw(&raw);
            return Ok(Some(s));
        }
        Ok(self.mem.get(idx - self.spilled))
    }

    /// A view of this column as a single memory-resident `Column`. `None`
    /// when part of the data has been flushed to disk.
    pub fn as_local(&self) -> Option<&Column> {
        if self.spilled == 0 {
            Some(&self.mem)
        } else {
            None
        }
    }

    /// Consume this column into a memory-resident `Column`. Errors when
    /// part of the data has been flushed to disk.
    pub(crate) fn into_local(self) -> Result<Column, LatticeError> {
        if self.spilled != 0 {
            return Err(LatticeError::TypeMismatch);
        }
        Ok(self.mem)
    }

    fn maybe_spill(&mut self) -> Result<(), LatticeError> {
        if self.in_mem || self.mem.deep_size_of() <= self.spill_threshold {
            return Ok(());
        }
        if self.spill.is_none() {
            self.spill = Some(tempfile::tempfile()?);
        }
        let file = self.spill.as_mut().unwrap();
        file.write_all(&self.mem.raw_bytes())?;
        debug!(
            "spilled {} elements of a {:?} column to disk",
            self.mem.len(),
            self.mem.elem_type()
        );
        self.spilled += self.mem.len();
        self.mem = Column::new(self.mem.elem_type());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_push_get() {
        let mut c = Column::new(ElemType::I64);
        c.push_i64(1).unwrap();
        c.push_i64(2).unwrap();
        assert!(c.push_f64(0.5).is_err());
        assert_eq!(c.len(), 2);
        assert_eq!(c.get_i64(1), Some(2));
        assert_eq!(c.get_i64(2), None);
        assert_eq!(c.get(0).unwrap().get::<i64>(), Some(1));
    }

    #[test]
    fn test_append_type_check() {
        let mut a = Column::I64(vec![1, 2]);
        let b = Column::I64(vec![3]);
        a.append(b).unwrap();
        assert_eq!(a, Column::I64(vec![1, 2, 3]));
        assert!(a.append(Column::F32(vec![1.0])).is_err());
    }

    #[test]
    fn test_truncate() {
        let mut c = Column::with_capacity(ElemType::I32, 4);
        for i in 0..4 {
            c.push_i32(i).unwrap();
        }
        c.truncate(2);
        assert_eq!(c, Column::I32(vec![0, 1]));
    }

    #[test]
    fn test_tiered_stays_local_in_mem() {
        let mut t = TieredColumn::new(ElemType::I64, true, None);
        t.append(Column::I64(vec![1, 2, 3])).unwrap();
        assert_eq!(t.len(), 3);
        assert!(t.as_local().is_some());
    }

    #[test]
    fn test_tiered_spills_and_reads_back() {
        // tiny threshold so the first append flushes
        let mut t = TieredColumn::with_spill_threshold(ElemType::I64, 16);
        t.append(Column::I64(vec![10, 20, 30])).unwrap();
        assert!(t.as_local().is_none());
        t.append(Column::I64(vec![40])).unwrap();
        assert_eq!(t.len(), 4);
        assert_eq!(t.get(1).unwrap().unwrap().get::<i64>(), Some(20));
        assert_eq!(t.get(3).unwrap().unwrap().get::<i64>(), Some(40));
        assert!(t.get(4).unwrap().is_none());
    }
}
