//! The possible error types when using the `lattice` crate.
use thiserror::Error;

/// An enumeration of `lattice` errors.
#[derive(Debug, Error)]
pub enum LatticeError {
    /// Attempted to access a column in a `DataFrame` that is out of bounds,
    /// or by a name that does not exist
    #[error("Column index out of bounds")]
    ColIndexOutOfBounds,
    /// Attempted to add a column to a `DataFrame` with a name that is
    /// already in use in that `DataFrame`
    #[error("Name already in use")]
    NameAlreadyExists,
    /// Attempted to perform an operation that conflicts with a column's
    /// element type, e.g. appending an `I64` column onto an `F64` column
    #[error("The requested operation doesn't match the column element type")]
    TypeMismatch,
    /// Attempted to add or append a column whose length disagrees with the
    /// other columns of its frame
    #[error("Column lengths disagree")]
    LengthMismatch,
    /// A generic error when there is an underlying I/O problem, including
    /// failure to open an input file
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    /// A line in an input file was longer than the whole read window, so no
    /// line boundary could be found
    #[error("No line boundary found within the read window")]
    LineTooLong,
    /// An edge-attribute type code other than `"I"`, `"L"`, `"F"` or `"D"`
    /// was requested
    #[error("Unsupported edge attribute type {0:?}")]
    UnsupportedAttrType(String),
}
