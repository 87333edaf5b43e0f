//! Defines the `DataFrame`: a schema plus one column store per schema slot.
use crate::dataframe::{Column, Schema, TieredColumn};
use crate::error::LatticeError;
use crate::types::ElemType;

/// A named, ordered collection of equal-length typed columns.
///
/// The schema is fixed by the `add_vec` calls made while the frame is still
/// empty; afterwards the frame only grows through [`DataFrame::append`],
/// which concatenates whole same-schema frames column by column. Parse tasks
/// each build a small throwaway frame and the ingestion driver appends them
/// into the result, so `append` is the hot path here.
#[derive(Debug, Default)]
pub struct DataFrame {
    schema: Schema,
    data: Vec<TieredColumn>,
}

impl DataFrame {
    /// Creates a frame with no columns.
    pub fn new() -> Self {
        DataFrame {
            ..Default::default()
        }
    }

    /// Obtains a reference to the schema of this frame.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Adds a named column store to this frame. The name must be unique and
    /// the column's length must agree with the columns already present,
    /// otherwise the frame is left unchanged.
    pub fn add_vec(
        &mut self,
        name: &str,
        col: TieredColumn,
    ) -> Result<(), LatticeError> {
        if !self.data.is_empty() && col.len() != self.n_rows() {
            return Err(LatticeError::LengthMismatch);
        }
        self.schema.add_column(name, col.elem_type())?;
        self.data.push(col);
        Ok(())
    }

    /// Get the column store at the given index.
    pub fn get_vec(&self, idx: usize) -> Result<&TieredColumn, LatticeError> {
        self.data.get(idx).ok_or(LatticeError::ColIndexOutOfBounds)
    }

    pub(crate) fn get_vec_mut(
        &mut self,
        idx: usize,
    ) -> Result<&mut TieredColumn, LatticeError> {
        self.data
            .get_mut(idx)
            .ok_or(LatticeError::ColIndexOutOfBounds)
    }

    /// Get a column store by its name.
    pub fn get_vec_by_name(
        &self,
        name: &str,
    ) -> Result<&TieredColumn, LatticeError> {
        match self.schema.col_idx(name) {
            Some(idx) => self.get_vec(idx),
            None => Err(LatticeError::ColIndexOutOfBounds),
        }
    }

    /// Concatenate every frame in `others` onto this one, column by column.
    ///
    /// All frames must have this frame's schema types (column names are not
    /// compared, matching how per-block throwaway frames are merged into a
    /// result frame). The relative row order of each appended frame is kept;
    /// the order between frames is whatever order `others` is in.
    pub fn append(
        &mut self,
        others: Vec<DataFrame>,
    ) -> Result<(), LatticeError> {
        for other in &others {
            if other.schema.types != self.schema.types {
                return Err(LatticeError::TypeMismatch);
            }
        }
        for other in others {
            for (idx, col) in other.data.into_iter().enumerate() {
                self.data[idx].append(col.into_local()?)?;
            }
        }
        Ok(())
    }

    /// The number of rows in this frame.
    pub fn n_rows(&self) -> usize {
        if self.data.is_empty() {
            0
        } else {
            self.data[0].len()
        }
    }

    /// The number of columns in this frame.
    pub fn n_cols(&self) -> usize {
        self.schema.width()
    }

    /// Convenience for tests and consumers holding small in-memory frames:
    /// the column at `idx` as a plain `Column`, if nothing was spilled.
    pub fn local_col(&self, idx: usize) -> Option<&Column> {
        self.data.get(idx).and_then(|c| c.as_local())
    }
}

/// Builds an in-memory frame from plain columns, mostly useful in tests.
impl From<Vec<(String, Column)>> for DataFrame {
    fn from(cols: Vec<(String, Column)>) -> Self {
        let mut df = DataFrame::new();
        for (name, col) in cols {
            let mut store = TieredColumn::new(col.elem_type(), true, None);
            store.append(col).unwrap();
            df.add_vec(&name, store).unwrap();
        }
        df
    }
}

pub(crate) fn empty_frame_like(
    schema: &[(String, ElemType)],
    in_mem: bool,
) -> Result<DataFrame, LatticeError> {
    let mut df = DataFrame::new();
    for (name, ty) in schema {
        df.add_vec(name, TieredColumn::new(*ty, in_mem, None))?;
    }
    Ok(df)
}
