pub mod matmul;
pub mod unary;

use crate::backend::ComputeBackend;
use crate::error::{Result, TensorError};

/// Pure-Rust CPU compute backend.
///
/// Implements all operations with straightforward loops optimized for
/// correctness rather than peak performance.
#[derive(Debug, Clone)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn zip_with(a: &[f32], b: &[f32], f: impl Fn(f32, f32) -> f32) -> Result<Vec<f32>> {
    if a.len() != b.len() {
        return Err(TensorError::ShapeMismatch {
            expected: vec![a.len()],
            got: vec![b.len()],
        });
    }
    Ok(a.iter().zip(b.iter()).map(|(x, y)| f(*x, *y)).collect())
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>> {
        matmul::matmul(a, b, m, k, n)
    }

    fn matmul_transposed_a(
        &self,
        a: &[f32],
        b: &[f32],
        m: usize,
        k: usize,
        n: usize,
    ) -> Result<Vec<f32>> {
        matmul::matmul_transposed_a(a, b, m, k, n)
    }

    fn matmul_transposed_b(
        &self,
        a: &[f32],
        b: &[f32],
        m: usize,
        k: usize,
        n: usize,
    ) -> Result<Vec<f32>> {
        matmul::matmul_transposed_b(a, b, m, k, n)
    }

    fn add(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
        zip_with(a, b, |x, y| x + y)
    }

    fn sub(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
        zip_with(a, b, |x, y| x - y)
    }

    fn mul(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
        zip_with(a, b, |x, y| x * y)
    }

    fn scale(&self, a: &[f32], s: f32) -> Result<Vec<f32>> {
        Ok(a.iter().map(|x| x * s).collect())
    }

    fn sigmoid(&self, x: &[f32]) -> Result<Vec<f32>> {
        Ok(unary::sigmoid(x))
    }

    fn tanh(&self, x: &[f32]) -> Result<Vec<f32>> {
        Ok(unary::tanh(x))
    }

    fn softmax(&self, x: &[f32], n_vocab: usize) -> Result<Vec<f32>> {
        unary::softmax(x, n_vocab)
    }

    fn log_softmax(&self, x: &[f32], n_vocab: usize) -> Result<Vec<f32>> {
        unary::log_softmax(x, n_vocab)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn backend() -> CpuBackend {
        CpuBackend::new()
    }

    #[test]
    fn test_matmul_identity() {
        let b = backend();
        let a = vec![1.0, 0.0, 0.0, 1.0];
        let x = vec![1.0, 2.0, 3.0, 4.0];
        let c = b.matmul(&a, &x, 2, 2, 2).unwrap();
        assert_eq!(c, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_elementwise() {
        let b = backend();
        assert_eq!(b.add(&[1.0, 2.0], &[3.0, 4.0]).unwrap(), vec![4.0, 6.0]);
        assert_eq!(b.sub(&[1.0, 2.0], &[3.0, 4.0]).unwrap(), vec![-2.0, -2.0]);
        assert_eq!(b.mul(&[2.0, 3.0], &[4.0, 5.0]).unwrap(), vec![8.0, 15.0]);
        assert_eq!(b.scale(&[1.0, 2.0, 3.0], 2.0).unwrap(), vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_add_length_mismatch() {
        let b = backend();
        assert!(b.add(&[1.0], &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_sigmoid_tanh() {
        let b = backend();
        let s = b.sigmoid(&[0.0, 2.0]).unwrap();
        assert_relative_eq!(s[0], 0.5);
        assert_relative_eq!(s[1], 0.880_797, epsilon = 1e-5);
        let t = b.tanh(&[0.0, 1.0]).unwrap();
        assert_relative_eq!(t[0], 0.0);
        assert_relative_eq!(t[1], 0.761_594_2, epsilon = 1e-5);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let b = backend();
        let r = b.softmax(&[1.0, 2.0, 3.0, 0.0, 0.0, 0.0], 3).unwrap();
        let first: f32 = r[..3].iter().sum();
        let second: f32 = r[3..].iter().sum();
        assert_relative_eq!(first, 1.0, epsilon = 1e-6);
        assert_relative_eq!(second, 1.0, epsilon = 1e-6);
        assert!(r[0] < r[1] && r[1] < r[2]);
        assert_relative_eq!(r[4], 1.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_log_softmax_matches_softmax() {
        let b = backend();
        let x = [0.3, -1.2, 4.0, 2.5];
        let p = b.softmax(&x, 4).unwrap();
        let lp = b.log_softmax(&x, 4).unwrap();
        for (a, l) in p.iter().zip(lp.iter()) {
            assert_relative_eq!(a.ln(), *l, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_softmax_rejects_ragged_input() {
        let b = backend();
        assert!(b.softmax(&[1.0, 2.0, 3.0], 2).is_err());
        assert!(b.log_softmax(&[1.0], 0).is_err());
    }
}
