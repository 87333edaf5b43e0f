//! A Schema module for managing the element types and column names of a
//! data frame.
use crate::error::LatticeError;
use crate::types::ElemType;
use deepsize::DeepSizeOf;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Represents a `Schema` of a data frame: an ordered list of element types
/// plus a unique name per column.
#[derive(
    Serialize, Deserialize, PartialEq, Clone, Debug, Default, DeepSizeOf,
)]
pub struct Schema {
    /// The `ElemType`s of this `Schema`, in column order
    pub types: Vec<ElemType>,
    /// A reverse column name to column index map. Helps getting the index
    /// by column name faster.
    pub col_names: HashMap<String, usize>,
}

impl Schema {
    /// Constructs an empty `Schema`.
    pub fn new() -> Self {
        Schema {
            ..Default::default()
        }
    }

    /// Add a column with the given `elem_type` and `name` to this `Schema`.
    /// Column names must be unique; if `name` already exists in this
    /// `Schema` the column is not added and a
    /// `LatticeError::NameAlreadyExists` error is returned.
    pub fn add_column(
        &mut self,
        name: &str,
        elem_type: ElemType,
    ) -> Result<(), LatticeError> {
        if self.col_names.contains_key(name) {
            return Err(LatticeError::NameAlreadyExists);
        }
        self.col_names.insert(name.to_string(), self.types.len());
        self.types.push(elem_type);
        Ok(())
    }

    /// Get the element type of the column at the given `idx`.
    pub fn col_type(&self, idx: usize) -> Result<ElemType, LatticeError> {
        match self.types.get(idx) {
            Some(t) => Ok(*t),
            None => Err(LatticeError::ColIndexOutOfBounds),
        }
    }

    /// Given a column name, returns its index.
    pub fn col_idx(&self, col_name: &str) -> Option<usize> {
        self.col_names.get(col_name).copied()
    }

    /// Given a column index, returns its name.
    pub fn col_name(&self, col_idx: usize) -> Result<&str, LatticeError> {
        match self.col_names.iter().find(|(_, &v)| v == col_idx) {
            Some((col_name, _)) => Ok(col_name),
            None => Err(LatticeError::ColIndexOutOfBounds),
        }
    }

    /// The number of columns in this `Schema`.
    pub fn width(&self) -> usize {
        self.types.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_lookup() {
        let mut s = Schema::new();
        assert_eq!(s.width(), 0);
        s.add_column("source", ElemType::I64).unwrap();
        s.add_column("dest", ElemType::I64).unwrap();
        s.add_column("attr", ElemType::F64).unwrap();
        assert_eq!(s.width(), 3);
        assert_eq!(s.col_idx("dest"), Some(1));
        assert_eq!(s.col_name(2).unwrap(), "attr");
        assert_eq!(s.col_type(2).unwrap(), ElemType::F64);
        assert!(s.col_type(3).is_err());
    }

    #[test]
    fn test_duplicate_name() {
        let mut s = Schema::new();
        s.add_column("source", ElemType::I64).unwrap();
        assert!(matches!(
            s.add_column("source", ElemType::I32),
            Err(LatticeError::NameAlreadyExists)
        ));
        // the failed add must not have grown the schema
        assert_eq!(s.width(), 1);
    }
}
