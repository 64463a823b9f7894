//! Dense matrix products for the CPU backend.
//!
//! The loops are ordered so the innermost index walks contiguous memory
//! in both operands where the layout allows it.

use crate::error::{Result, TensorError};

fn check_len(op: &str, name: &str, len: usize, expected: usize) -> Result<()> {
    if len != expected {
        return Err(TensorError::Other(format!(
            "{}: {}.len()={} but expected {}",
            op, name, len, expected
        )));
    }
    Ok(())
}

/// [m, k] @ [k, n] -> [m, n]
pub fn matmul(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>> {
    check_len("matmul", "a", a.len(), m * k)?;
    check_len("matmul", "b", b.len(), k * n)?;

    let mut c = vec![0.0f32; m * n];
    for i in 0..m {
        let c_row = &mut c[i * n..(i + 1) * n];
        for p in 0..k {
            let a_ip = a[i * k + p];
            if a_ip == 0.0 {
                continue;
            }
            let b_row = &b[p * n..(p + 1) * n];
            for (cv, bv) in c_row.iter_mut().zip(b_row) {
                *cv += a_ip * bv;
            }
        }
    }
    Ok(c)
}

/// A^T @ B with `a` stored as [k, m] and `b` as [k, n] -> [m, n]
pub fn matmul_transposed_a(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>> {
    check_len("matmul_transposed_a", "a", a.len(), k * m)?;
    check_len("matmul_transposed_a", "b", b.len(), k * n)?;

    let mut c = vec![0.0f32; m * n];
    for p in 0..k {
        let b_row = &b[p * n..(p + 1) * n];
        for i in 0..m {
            let a_pi = a[p * m + i];
            if a_pi == 0.0 {
                continue;
            }
            let c_row = &mut c[i * n..(i + 1) * n];
            for (cv, bv) in c_row.iter_mut().zip(b_row) {
                *cv += a_pi * bv;
            }
        }
    }
    Ok(c)
}

/// A @ B^T with `a` stored as [m, k] and `b` as [n, k] -> [m, n]
pub fn matmul_transposed_b(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>> {
    check_len("matmul_transposed_b", "a", a.len(), m * k)?;
    check_len("matmul_transposed_b", "b", b.len(), n * k)?;

    let mut c = vec![0.0f32; m * n];
    for i in 0..m {
        let a_row = &a[i * k..(i + 1) * k];
        for j in 0..n {
            let b_row = &b[j * k..(j + 1) * k];
            c[i * n + j] = a_row.iter().zip(b_row).map(|(x, y)| x * y).sum();
        }
    }
    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transposed_variants_agree() {
        // a: [2, 3], b: [3, 2]
        let a = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let plain = matmul(&a, &b, 2, 3, 2).unwrap();

        // a^T stored as [3, 2]
        let a_t = vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0];
        assert_eq!(matmul_transposed_a(&a_t, &b, 2, 3, 2).unwrap(), plain);

        // b^T stored as [2, 3]
        let b_t = vec![7.0, 9.0, 11.0, 8.0, 10.0, 12.0];
        assert_eq!(matmul_transposed_b(&a, &b_t, 2, 3, 2).unwrap(), plain);
    }

    #[test]
    fn test_length_check() {
        assert!(matmul(&[1.0], &[1.0, 2.0], 1, 2, 1).is_err());
    }
}
