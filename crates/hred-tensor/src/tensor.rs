use crate::backend::ComputeBackend;
use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::shape::Shape;
use crate::storage::CpuStorage;

/// A tensor backed by CPU storage.
///
/// Holds contiguous, row-major f32 data with an associated shape.
/// Operations that require computation are dispatched to a `ComputeBackend`.
#[derive(Debug, Clone)]
pub struct Tensor {
    storage: CpuStorage,
    shape: Shape,
}

impl Tensor {
    /// Create a new tensor from f32 data and a shape.
    ///
    /// # Panics
    /// Panics if `data.len() != shape.numel()`.
    pub fn new(data: Vec<f32>, shape: Shape) -> Self {
        assert_eq!(
            data.len(),
            shape.numel(),
            "data length {} does not match shape {:?} (numel={})",
            data.len(),
            shape,
            shape.numel()
        );
        Tensor {
            storage: CpuStorage::from_f32_vec(data),
            shape,
        }
    }

    /// Fallible constructor for data whose length comes from outside the crate.
    pub fn from_vec(data: Vec<f32>, shape: Shape) -> Result<Self> {
        if data.len() != shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: shape.dims().to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Tensor::new(data, shape))
    }

    /// Create a `[rows, cols]` tensor.
    ///
    /// # Panics
    /// Panics if `data.len() != rows * cols`.
    pub fn matrix(data: Vec<f32>, rows: usize, cols: usize) -> Self {
        Tensor::new(data, Shape::matrix(rows, cols))
    }

    /// Create a zero-filled tensor with the given shape.
    pub fn zeros(shape: Shape) -> Self {
        Tensor::full(shape, 0.0)
    }

    /// Create a tensor filled with ones with the given shape.
    pub fn ones(shape: Shape) -> Self {
        Tensor::full(shape, 1.0)
    }

    /// Create a tensor where every element is `value`.
    pub fn full(shape: Shape, value: f32) -> Self {
        let n = shape.numel();
        Tensor {
            storage: CpuStorage::from_f32_vec(vec![value; n]),
            shape,
        }
    }

    /// Returns a reference to the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    /// Number of rows when viewed as a matrix.
    pub fn rows(&self) -> usize {
        self.matrix_dims().0
    }

    /// Number of columns when viewed as a matrix.
    pub fn cols(&self) -> usize {
        self.matrix_dims().1
    }

    fn matrix_dims(&self) -> (usize, usize) {
        // as_matrix is total over all ranks.
        self.shape.as_matrix().unwrap_or((0, 0))
    }

    /// Returns the underlying data as an f32 slice.
    pub fn data_f32(&self) -> &[f32] {
        self.storage.as_f32_slice()
    }

    /// Returns the underlying data as a mutable f32 slice.
    pub fn data_f32_mut(&mut self) -> &mut [f32] {
        self.storage.as_f32_slice_mut()
    }

    /// Consume the tensor, returning its data buffer.
    pub fn into_data(self) -> Vec<f32> {
        self.storage.into_f32_vec()
    }

    /// Row `i` of the matrix view.
    pub fn row(&self, i: usize) -> &[f32] {
        let cols = self.cols();
        &self.data_f32()[i * cols..(i + 1) * cols]
    }

    /// Index of the largest element in every row. Ties resolve to the
    /// lowest index.
    pub fn argmax_rows(&self) -> Vec<usize> {
        (0..self.rows())
            .map(|r| {
                let mut best = 0;
                let row = self.row(r);
                for (i, v) in row.iter().enumerate() {
                    if *v > row[best] {
                        best = i;
                    }
                }
                best
            })
            .collect()
    }

    /// Reshape the tensor, returning a new tensor with the same data but
    /// a different shape.
    ///
    /// The total number of elements must remain the same.
    pub fn reshape(&self, new_shape: Shape) -> Result<Tensor> {
        if self.shape.numel() != new_shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: new_shape.dims().to_vec(),
            });
        }
        Ok(Tensor {
            storage: self.storage.clone(),
            shape: new_shape,
        })
    }

    /// Matrix multiplication of two 2D tensors using the given backend.
    ///
    /// self is [m, k], other is [k, n], result is [m, n].
    pub fn matmul(&self, other: &Tensor, backend: &dyn ComputeBackend) -> Result<Tensor> {
        if self.shape.ndim() != 2 || other.shape.ndim() != 2 {
            return Err(TensorError::Other(
                "matmul requires 2D tensors".to_string(),
            ));
        }

        let m = self.shape.dim(0);
        let k = self.shape.dim(1);
        let k2 = other.shape.dim(0);
        let n = other.shape.dim(1);

        if k != k2 {
            return Err(TensorError::MatmulMismatch { m, k, k2, n });
        }

        let result_data = backend.matmul(self.data_f32(), other.data_f32(), m, k, n)?;
        Ok(Tensor::matrix(result_data, m, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuBackend;

    #[test]
    fn test_new_tensor() {
        let t = Tensor::matrix(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3);
        assert_eq!(t.rows(), 2);
        assert_eq!(t.cols(), 3);
        assert_eq!(t.dtype(), DType::F32);
        assert_eq!(t.row(1), &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_from_vec_checks_length() {
        assert!(Tensor::from_vec(vec![1.0, 2.0], Shape::matrix(1, 3)).is_err());
        assert!(Tensor::from_vec(vec![1.0, 2.0, 3.0], Shape::matrix(1, 3)).is_ok());
    }

    #[test]
    fn test_full() {
        let z = Tensor::zeros(Shape::matrix(2, 3));
        assert_eq!(z.data_f32(), &[0.0; 6]);
        let o = Tensor::full(Shape::new(vec![3]), 0.5);
        assert_eq!(o.data_f32(), &[0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_argmax_rows() {
        let t = Tensor::matrix(vec![0.1, 0.9, 0.3, 2.0, 2.0, -1.0], 2, 3);
        assert_eq!(t.argmax_rows(), vec![1, 0]);
    }

    #[test]
    fn test_reshape_mismatch() {
        let t = Tensor::new(vec![1.0, 2.0, 3.0], Shape::new(vec![3]));
        assert!(t.reshape(Shape::matrix(2, 2)).is_err());
        assert_eq!(t.reshape(Shape::matrix(3, 1)).unwrap().rows(), 3);
    }

    #[test]
    #[should_panic]
    fn test_new_shape_mismatch_panics() {
        let _t = Tensor::new(vec![1.0, 2.0], Shape::new(vec![3]));
    }

    #[test]
    fn test_matmul() {
        let backend = CpuBackend::new();
        let a = Tensor::matrix(vec![1.0, 2.0, 3.0, 4.0], 2, 2);
        let b = Tensor::matrix(vec![5.0, 6.0, 7.0, 8.0], 2, 2);
        let c = a.matmul(&b, &backend).unwrap();
        assert_eq!(c.data_f32(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_dimension_mismatch() {
        let backend = CpuBackend::new();
        let a = Tensor::matrix(vec![1.0, 2.0, 3.0], 1, 3);
        let b = Tensor::matrix(vec![1.0, 2.0, 3.0, 4.0], 2, 2);
        assert!(a.matmul(&b, &backend).is_err());
    }
}
