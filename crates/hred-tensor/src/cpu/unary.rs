//! Element-wise activations and row-wise normalizers for the CPU backend.

use crate::error::{Result, TensorError};

pub fn sigmoid(x: &[f32]) -> Vec<f32> {
    x.iter().map(|&v| 1.0 / (1.0 + (-v).exp())).collect()
}

pub fn tanh(x: &[f32]) -> Vec<f32> {
    x.iter().map(|v| v.tanh()).collect()
}

fn check_chunks(op: &str, len: usize, n_vocab: usize) -> Result<usize> {
    if n_vocab == 0 {
        return Err(TensorError::Other(format!("{}: n_vocab must be > 0", op)));
    }
    if len % n_vocab != 0 {
        return Err(TensorError::Other(format!(
            "{}: x.len()={} is not a multiple of n_vocab={}",
            op, len, n_vocab
        )));
    }
    Ok(len / n_vocab)
}

/// Max and log-sum-exp of a chunk, both needed by softmax and log-softmax.
fn chunk_stats(chunk: &[f32]) -> (f32, f32) {
    let max_val = chunk.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = chunk.iter().map(|v| (v - max_val).exp()).sum();
    (max_val, sum.ln())
}

pub fn softmax(x: &[f32], n_vocab: usize) -> Result<Vec<f32>> {
    check_chunks("softmax", x.len(), n_vocab)?;
    let mut result = Vec::with_capacity(x.len());
    for chunk in x.chunks(n_vocab) {
        let (max_val, log_sum) = chunk_stats(chunk);
        result.extend(chunk.iter().map(|v| (v - max_val - log_sum).exp()));
    }
    Ok(result)
}

pub fn log_softmax(x: &[f32], n_vocab: usize) -> Result<Vec<f32>> {
    check_chunks("log_softmax", x.len(), n_vocab)?;
    let mut result = Vec::with_capacity(x.len());
    for chunk in x.chunks(n_vocab) {
        let (max_val, log_sum) = chunk_stats(chunk);
        result.extend(chunk.iter().map(|v| v - max_val - log_sum));
    }
    Ok(result)
}
