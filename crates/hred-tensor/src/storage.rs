use crate::dtype::DType;
use crate::error::{Result, TensorError};

/// CPU-side tensor storage.
///
/// All compute is done in f32; half-precision only exists on disk and is
/// widened by the checkpoint reader before it reaches a `CpuStorage`.
#[derive(Debug, Clone)]
pub enum CpuStorage {
    /// 32-bit floating point storage.
    F32(Vec<f32>),
}

impl CpuStorage {
    /// Number of elements in this storage.
    pub fn len(&self) -> usize {
        match self {
            CpuStorage::F32(v) => v.len(),
        }
    }

    /// Returns true if the storage contains no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the data as an f32 slice.
    pub fn as_f32_slice(&self) -> &[f32] {
        match self {
            CpuStorage::F32(v) => v.as_slice(),
        }
    }

    /// Returns the data as a mutable f32 slice.
    pub fn as_f32_slice_mut(&mut self) -> &mut [f32] {
        match self {
            CpuStorage::F32(v) => v.as_mut_slice(),
        }
    }

    /// Consume the storage, returning the owned f32 buffer.
    pub fn into_f32_vec(self) -> Vec<f32> {
        match self {
            CpuStorage::F32(v) => v,
        }
    }

    /// Create zero-filled storage for the given dtype and element count.
    ///
    /// # Errors
    /// Only F32 is a compute dtype; F16 is rejected.
    pub fn zeros(dtype: DType, n: usize) -> Result<Self> {
        match dtype {
            DType::F32 => Ok(CpuStorage::F32(vec![0.0; n])),
            other => Err(TensorError::UnsupportedDType(format!(
                "{} is a storage-only dtype",
                other
            ))),
        }
    }

    /// Create storage from an f32 vector.
    pub fn from_f32_vec(data: Vec<f32>) -> Self {
        CpuStorage::F32(data)
    }

    /// Returns the dtype of this storage.
    pub fn dtype(&self) -> DType {
        match self {
            CpuStorage::F32(_) => DType::F32,
        }
    }
}
