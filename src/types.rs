//! The primitive element types that columns are made of, plus a generic
//! scalar value holder for moving single elements across typed boundaries.
use deepsize::DeepSizeOf;
use serde::{Deserialize, Serialize};

/// The primitive types an element of a column may have. Every type has a
/// fixed byte width, so column storage is always `len * width` raw bytes.
#[derive(
    Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug, Hash, DeepSizeOf,
)]
pub enum ElemType {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bool,
}

impl ElemType {
    /// The fixed width of one element of this type, in bytes.
    pub fn width(&self) -> usize {
        match self {
            ElemType::I8 | ElemType::Bool => 1,
            ElemType::I16 => 2,
            ElemType::I32 | ElemType::F32 => 4,
            ElemType::I64 | ElemType::F64 => 8,
        }
    }

    /// The `ElemType` corresponding to a Rust primitive, e.g.
    /// `ElemType::of::<i64>() == ElemType::I64`.
    pub fn of<T: Primitive>() -> Self {
        T::ELEM
    }
}

/// A Rust primitive that can live in a column. Sealed; implemented exactly
/// for the types listed in [`ElemType`].
pub trait Primitive: private::Sealed + Copy + Send + Sync + 'static {
    /// The type tag for this primitive.
    const ELEM: ElemType;

    /// The little-endian raw encoding of this value, `ELEM.width()` bytes.
    fn to_raw(self) -> [u8; 8];

    /// Decode a value from its little-endian raw encoding.
    fn from_raw(raw: &[u8]) -> Self;
}

mod private {
    pub trait Sealed {}
    impl Sealed for i8 {}
    impl Sealed for i16 {}
    impl Sealed for i32 {}
    impl Sealed for i64 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
    impl Sealed for bool {}
}

macro_rules! primitive {
    ($t:ty, $elem:ident) => {
        impl Primitive for $t {
            const ELEM: ElemType = ElemType::$elem;

            fn to_raw(self) -> [u8; 8] {
                let mut raw = [0u8; 8];
                let bytes = self.to_le_bytes();
                raw[..bytes.len()].copy_from_slice(&bytes);
                raw
            }

            fn from_raw(raw: &[u8]) -> Self {
                let mut bytes = [0u8; std::mem::size_of::<$t>()];
                let len = bytes.len();
                bytes.copy_from_slice(&raw[..len]);
                <$t>::from_le_bytes(bytes)
            }
        }
    };
}

primitive!(i8, I8);
primitive!(i16, I16);
primitive!(i32, I32);
primitive!(i64, I64);
primitive!(f32, F32);
primitive!(f64, F64);

impl Primitive for bool {
    const ELEM: ElemType = ElemType::Bool;

    fn to_raw(self) -> [u8; 8] {
        let mut raw = [0u8; 8];
        raw[0] = self as u8;
        raw
    }

    fn from_raw(raw: &[u8]) -> Self {
        raw[0] != 0
    }
}

/// A single typed value held in its raw byte representation. Useful for
/// moving one element out of a column without a typed match at the call
/// site; too heavy to be used element-by-element in bulk paths.
#[derive(Serialize, Deserialize, PartialEq, Clone, Copy, Debug)]
pub struct Scalar {
    ty: ElemType,
    raw: [u8; 8],
}

impl Scalar {
    /// Create a zeroed scalar of the given type.
    pub fn new(ty: ElemType) -> Self {
        Scalar { ty, raw: [0u8; 8] }
    }

    /// Create a scalar from a typed value.
    pub fn from_value<T: Primitive>(v: T) -> Self {
        Scalar {
            ty: T::ELEM,
            raw: v.to_raw(),
        }
    }

    /// The element type of this scalar.
    pub fn elem_type(&self) -> ElemType {
        self.ty
    }

    /// The raw little-endian bytes of this scalar, `width()` of them.
    pub fn raw(&self) -> &[u8] {
        &self.raw[..self.ty.width()]
    }

    /// Overwrite the raw bytes. Succeeds iff `raw.len()` equals the width
    /// of this scalar's type.
    pub fn set_raw(&mut self, raw: &[u8]) -> bool {
        if raw.len() != self.ty.width() {
            return false;
        }
        self.raw[..raw.len()].copy_from_slice(raw);
        true
    }

    /// Read this scalar as a typed value. Returns `None` when `T` does not
    /// match the scalar's element type.
    pub fn get<T: Primitive>(&self) -> Option<T> {
        if T::ELEM != self.ty {
            return None;
        }
        Some(T::from_raw(&self.raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widths() {
        assert_eq!(ElemType::I8.width(), 1);
        assert_eq!(ElemType::Bool.width(), 1);
        assert_eq!(ElemType::I16.width(), 2);
        assert_eq!(ElemType::I32.width(), 4);
        assert_eq!(ElemType::F32.width(), 4);
        assert_eq!(ElemType::I64.width(), 8);
        assert_eq!(ElemType::F64.width(), 8);
    }

    #[test]
    fn test_of() {
        assert_eq!(ElemType::of::<i32>(), ElemType::I32);
        assert_eq!(ElemType::of::<f64>(), ElemType::F64);
        assert_eq!(ElemType::of::<bool>(), ElemType::Bool);
    }

    #[test]
    fn test_scalar_roundtrip() {
        let s = Scalar::from_value(-42i64);
        assert_eq!(s.elem_type(), ElemType::I64);
        assert_eq!(s.get::<i64>(), Some(-42));
        assert_eq!(s.get::<i32>(), None);

        let s = Scalar::from_value(3.5f64);
        assert_eq!(s.get::<f64>(), Some(3.5));
    }

    #[test]
    fn test_scalar_set_raw() {
        let mut s = Scalar::new(ElemType::I32);
        assert!(!s.set_raw(&[1, 2, 3]));
        assert!(s.set_raw(&7i32.to_le_bytes()));
        assert_eq!(s.get::<i32>(), Some(7));
        assert_eq!(s.raw().len(), 4);
    }
}
