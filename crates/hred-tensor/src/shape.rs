use crate::error::{Result, TensorError};
use std::fmt;

/// A tensor shape, wrapping a vector of dimension sizes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Create a new shape from a vector of dimensions.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape { dims }
    }

    /// Create a rank-2 shape `[rows, cols]`.
    pub fn matrix(rows: usize, cols: usize) -> Self {
        Shape {
            dims: vec![rows, cols],
        }
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements (product of all dimension sizes).
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns the size of dimension `i`.
    ///
    /// # Panics
    /// Panics if `i >= ndim()`.
    pub fn dim(&self, i: usize) -> usize {
        self.dims[i]
    }

    /// Returns a reference to the underlying dimension sizes.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Interpret this shape as a matrix.
    ///
    /// Rank-1 shapes are treated as a single row. Higher ranks fold every
    /// leading dimension into the row count, so `[b, t, d]` becomes
    /// `(b * t, d)`.
    pub fn as_matrix(&self) -> Result<(usize, usize)> {
        match self.dims.as_slice() {
            [] => Ok((1, 1)),
            [n] => Ok((1, *n)),
            [rest @ .., last] => Ok((rest.iter().product(), *last)),
        }
    }

    /// Returns an error unless this shape is exactly `[rows, cols]`.
    pub fn expect_matrix(&self, rows: usize, cols: usize) -> Result<()> {
        if self.dims.as_slice() == [rows, cols] {
            Ok(())
        } else {
            Err(TensorError::ShapeMismatch {
                expected: vec![rows, cols],
                got: self.dims.clone(),
            })
        }
    }

    /// Compute the broadcast shape of `a` and `b` using numpy-style broadcasting rules.
    ///
    /// Shapes are aligned from the right; each pair of sizes must be equal or
    /// contain a 1. Used to validate bias rows added to activation matrices.
    pub fn broadcast_shape(a: &Shape, b: &Shape) -> Result<Shape> {
        let max_ndim = a.ndim().max(b.ndim());
        let mut result = Vec::with_capacity(max_ndim);

        for i in 0..max_ndim {
            let da = if i < a.ndim() { a.dims[a.ndim() - 1 - i] } else { 1 };
            let db = if i < b.ndim() { b.dims[b.ndim() - 1 - i] } else { 1 };

            let d = match (da, db) {
                (x, y) if x == y => x,
                (1, y) => y,
                (x, 1) => x,
                _ => {
                    return Err(TensorError::BroadcastError {
                        a: a.dims.clone(),
                        b: b.dims.clone(),
                    })
                }
            };
            result.push(d);
        }

        result.reverse();
        Ok(Shape::new(result))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_shape() {
        let s = Shape::matrix(2, 3);
        assert_eq!(s.ndim(), 2);
        assert_eq!(s.numel(), 6);
        assert_eq!(s.as_matrix().unwrap(), (2, 3));
        assert!(s.expect_matrix(2, 3).is_ok());
        assert!(s.expect_matrix(3, 2).is_err());
    }

    #[test]
    fn test_as_matrix_folds_leading_dims() {
        let s = Shape::new(vec![4, 5, 7]);
        assert_eq!(s.as_matrix().unwrap(), (20, 7));
        assert_eq!(Shape::new(vec![9]).as_matrix().unwrap(), (1, 9));
    }

    #[test]
    fn test_scalar_shape() {
        let s = Shape::new(vec![]);
        assert_eq!(s.ndim(), 0);
        assert_eq!(s.numel(), 1);
        assert_eq!(s.as_matrix().unwrap(), (1, 1));
    }

    #[test]
    fn test_broadcast_bias_row() {
        let a = Shape::matrix(8, 3);
        let b = Shape::matrix(1, 3);
        let c = Shape::broadcast_shape(&a, &b).unwrap();
        assert_eq!(c.dims(), &[8, 3]);
    }

    #[test]
    fn test_broadcast_different_ndim() {
        let a = Shape::new(vec![3]);
        let b = Shape::new(vec![2, 3]);
        let c = Shape::broadcast_shape(&a, &b).unwrap();
        assert_eq!(c.dims(), &[2, 3]);
    }

    #[test]
    fn test_broadcast_error() {
        let a = Shape::new(vec![2, 3]);
        let b = Shape::new(vec![2, 4]);
        assert!(Shape::broadcast_shape(&a, &b).is_err());
    }
}
