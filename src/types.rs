//! Scalar and vector types carried by every IR statement.
//!
//! A statement's result type is a [`VectorType`]: an element [`DataType`] plus
//! a lane count. Per-lane payloads (constant values, storage descriptors, local
//! addresses) are stored in a [`LaneAttribute`], which knows how to replicate
//! itself when a statement is widened.

use std::fmt;
use std::ops::{Deref, DerefMut};

use itertools::Itertools;

/// Element type of a statement's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// 32-bit signed integer
    I32,
    /// 32-bit float
    F32,
    /// Not assigned yet; the type checker fills it in
    Unknown,
    /// Statements that produce no value (stores, control flow)
    Void,
}

impl DataType {
    /// Common type of two operands, or `None` when they cannot be combined.
    pub fn promote(self, other: DataType) -> Option<DataType> {
        match (self, other) {
            (DataType::I32, DataType::I32) => Some(DataType::I32),
            (DataType::F32, DataType::F32)
            | (DataType::I32, DataType::F32)
            | (DataType::F32, DataType::I32) => Some(DataType::F32),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::I32 | DataType::F32)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::I32 => "i32",
            DataType::F32 => "f32",
            DataType::Unknown => "unknown",
            DataType::Void => "void",
        };
        f.write_str(name)
    }
}

/// Result type of a statement: element type and number of lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VectorType {
    pub dtype: DataType,
    pub width: usize,
}

impl VectorType {
    pub fn new(dtype: DataType, width: usize) -> Self {
        Self { dtype, width }
    }

    /// Single-lane type, the shape of everything lowering produces.
    pub fn scalar(dtype: DataType) -> Self {
        Self::new(dtype, 1)
    }

    pub fn void() -> Self {
        Self::scalar(DataType::Void)
    }

    pub fn unknown() -> Self {
        Self::scalar(DataType::Unknown)
    }
}

impl fmt::Display for VectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.width == 1 {
            write!(f, "<{}>", self.dtype)
        } else {
            write!(f, "<{} x{}>", self.dtype, self.width)
        }
    }
}

/// A literal scalar value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TypedConstant {
    I32(i32),
    F32(f32),
}

impl TypedConstant {
    pub fn dtype(self) -> DataType {
        match self {
            TypedConstant::I32(_) => DataType::I32,
            TypedConstant::F32(_) => DataType::F32,
        }
    }

    /// Zero of `dtype`; non-numeric types fall back to an integer zero.
    pub fn zero(dtype: DataType) -> Self {
        match dtype {
            DataType::F32 => TypedConstant::F32(0.0),
            _ => TypedConstant::I32(0),
        }
    }

    pub fn as_f32(self) -> f32 {
        match self {
            TypedConstant::I32(v) => v as f32,
            TypedConstant::F32(v) => v,
        }
    }

    /// Integer view of the value (floats truncate toward zero).
    pub fn as_i32(self) -> i32 {
        match self {
            TypedConstant::I32(v) => v,
            TypedConstant::F32(v) => v as i32,
        }
    }

    /// Converts the value to `dtype`; non-numeric targets leave it unchanged.
    pub fn cast(self, dtype: DataType) -> Self {
        match dtype {
            DataType::I32 => TypedConstant::I32(self.as_i32()),
            DataType::F32 => TypedConstant::F32(self.as_f32()),
            DataType::Unknown | DataType::Void => self,
        }
    }

    pub fn is_truthy(self) -> bool {
        match self {
            TypedConstant::I32(v) => v != 0,
            TypedConstant::F32(v) => v != 0.0,
        }
    }
}

impl From<i32> for TypedConstant {
    fn from(value: i32) -> Self {
        TypedConstant::I32(value)
    }
}

impl From<f32> for TypedConstant {
    fn from(value: f32) -> Self {
        TypedConstant::F32(value)
    }
}

impl fmt::Display for TypedConstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedConstant::I32(v) => write!(f, "{v}"),
            TypedConstant::F32(v) => write!(f, "{v:?}"),
        }
    }
}

/// Ordered per-lane payload of a statement.
///
/// Lane `n` of the statement reads entry `n`. Widening by a factor `f` turns
/// `[a, b]` into `f` consecutive copies: `[a, b, a, b, ...]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LaneAttribute<T> {
    values: Vec<T>,
}

impl<T: Clone> LaneAttribute<T> {
    pub fn new(values: Vec<T>) -> Self {
        Self { values }
    }

    /// Single-lane attribute.
    pub fn splat(value: T) -> Self {
        Self::new(vec![value])
    }

    /// Replaces the contents with `factor` consecutive copies of the current pattern.
    pub fn repeat(&mut self, factor: usize) {
        if factor == 1 {
            return;
        }
        self.values = itertools::repeat_n(std::mem::take(&mut self.values), factor)
            .flatten()
            .collect();
    }

    pub fn into_vec(self) -> Vec<T> {
        self.values
    }
}

impl<T: fmt::Display> fmt::Display for LaneAttribute<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.values.iter().join(", "))
    }
}

impl<T> Deref for LaneAttribute<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.values
    }
}

impl<T> DerefMut for LaneAttribute<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.values
    }
}

impl<T> FromIterator<T> for LaneAttribute<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_lays_out_consecutive_copies() {
        let mut lanes = LaneAttribute::new(vec![1, 2, 3]);
        lanes.repeat(3);
        assert_eq!(&*lanes, &[1, 2, 3, 1, 2, 3, 1, 2, 3]);

        let mut single = LaneAttribute::splat('a');
        single.repeat(1);
        assert_eq!(&*single, &['a']);
    }

    #[test]
    fn test_promote() {
        assert_eq!(DataType::I32.promote(DataType::I32), Some(DataType::I32));
        assert_eq!(DataType::I32.promote(DataType::F32), Some(DataType::F32));
        assert_eq!(DataType::Void.promote(DataType::I32), None);
        assert_eq!(DataType::Unknown.promote(DataType::Unknown), None);
    }

    #[test]
    fn test_constant_conversions() {
        assert_eq!(TypedConstant::F32(2.7).cast(DataType::I32), TypedConstant::I32(2));
        assert_eq!(TypedConstant::I32(3).cast(DataType::F32), TypedConstant::F32(3.0));
        assert!(!TypedConstant::zero(DataType::F32).is_truthy());
        assert!(TypedConstant::I32(-1).is_truthy());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", VectorType::scalar(DataType::F32)), "<f32>");
        assert_eq!(format!("{}", VectorType::new(DataType::I32, 4)), "<i32 x4>");
        let lanes: LaneAttribute<TypedConstant> = [1.into(), 2.5f32.into()].into_iter().collect();
        assert_eq!(format!("{lanes}"), "[1, 2.5]");
    }
}
