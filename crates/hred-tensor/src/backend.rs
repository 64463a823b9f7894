use std::fmt::Debug;

use crate::error::Result;

/// Trait for pluggable compute backends.
///
/// All operations work on row-major f32 slices. Data is passed in as slices
/// and returned as owned vectors. The autodiff `Graph` dispatches every
/// forward kernel and the matrix products of the backward pass through
/// this trait.
pub trait ComputeBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "cpu").
    fn name(&self) -> &str;

    /// Matrix multiplication: C = A @ B.
    ///
    /// - `a`: row-major data of shape [m, k]
    /// - `b`: row-major data of shape [k, n]
    /// - Returns: row-major data of shape [m, n]
    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>>;

    /// C = A^T @ B where `a` is stored as [k, m] and `b` as [k, n].
    fn matmul_transposed_a(
        &self,
        a: &[f32],
        b: &[f32],
        m: usize,
        k: usize,
        n: usize,
    ) -> Result<Vec<f32>>;

    /// C = A @ B^T where `a` is stored as [m, k] and `b` as [n, k].
    fn matmul_transposed_b(
        &self,
        a: &[f32],
        b: &[f32],
        m: usize,
        k: usize,
        n: usize,
    ) -> Result<Vec<f32>>;

    /// Element-wise addition: result[i] = a[i] + b[i].
    fn add(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>>;

    /// Element-wise subtraction: result[i] = a[i] - b[i].
    fn sub(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>>;

    /// Element-wise multiplication: result[i] = a[i] * b[i].
    fn mul(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>>;

    /// Scalar multiplication: result[i] = a[i] * s.
    fn scale(&self, a: &[f32], s: f32) -> Result<Vec<f32>>;

    /// Logistic sigmoid: result[i] = 1 / (1 + exp(-x[i])).
    fn sigmoid(&self, x: &[f32]) -> Result<Vec<f32>>;

    /// Hyperbolic tangent.
    fn tanh(&self, x: &[f32]) -> Result<Vec<f32>>;

    /// Softmax over chunks of `n_vocab` elements.
    ///
    /// For each chunk: result[i] = exp(x[i] - max(x)) / sum(exp(x[j] - max(x)))
    fn softmax(&self, x: &[f32], n_vocab: usize) -> Result<Vec<f32>>;

    /// Log-softmax over chunks of `n_vocab` elements, computed stably as
    /// x[i] - max(x) - ln(sum(exp(x[j] - max(x)))).
    fn log_softmax(&self, x: &[f32], n_vocab: usize) -> Result<Vec<f32>>;
}
