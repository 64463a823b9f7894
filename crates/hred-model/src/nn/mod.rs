//! Parameterized building blocks shared by every HRED component.

pub mod cell;
pub mod embedding;
pub mod linear;

pub use cell::{LayeredState, MultiRnnCell, RnnCell, RnnState};
pub use embedding::Embedding;
pub use linear::Linear;

use rand::rngs::StdRng;
use rand::Rng;

use hred_tensor::{Graph, Init, ParamId, ParamStore, Shape, Var};

use crate::error::Result;

/// Registers named parameters in a [`ParamStore`].
///
/// Weights are drawn from uniform(-init_w, init_w). Names that already exist
/// resolve to the existing parameter, so building a second component under
/// the same scope shares its weights.
pub struct ParamBuilder<'a> {
    store: &'a mut ParamStore,
    rng: &'a mut StdRng,
    init_w: f32,
}

impl<'a> ParamBuilder<'a> {
    pub fn new(store: &'a mut ParamStore, rng: &'a mut StdRng, init_w: f32) -> Self {
        ParamBuilder { store, rng, init_w }
    }

    pub fn weight(&mut self, name: &str, rows: usize, cols: usize) -> Result<ParamId> {
        Ok(self.store.get_or_create(
            name,
            Shape::matrix(rows, cols),
            Init::Uniform(self.init_w),
            &mut *self.rng,
        )?)
    }

    /// A `[1, cols]` bias filled with `value`.
    pub fn bias(&mut self, name: &str, cols: usize, value: f32) -> Result<ParamId> {
        let init = if value == 0.0 {
            Init::Zeros
        } else {
            Init::Constant(value)
        };
        Ok(self
            .store
            .get_or_create(name, Shape::matrix(1, cols), init, &mut *self.rng)?)
    }
}

/// Inverted dropout: each element survives with probability `keep_prob` and
/// survivors are scaled by `1 / keep_prob`. A no-op when `keep_prob >= 1`.
pub fn dropout(g: &mut Graph, x: Var, keep_prob: f32, rng: &mut StdRng) -> Result<Var> {
    if keep_prob >= 1.0 {
        return Ok(x);
    }
    let (r, c) = g.dims(x);
    let scale = 1.0 / keep_prob;
    let mask = (0..r * c)
        .map(|_| if rng.gen::<f32>() < keep_prob { scale } else { 0.0 })
        .collect();
    Ok(g.mul_const(x, mask)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hred_tensor::{CpuBackend, Tensor};
    use rand::SeedableRng;

    #[test]
    fn test_builder_reuses_names() {
        let mut store = ParamStore::new();
        let mut rng = StdRng::seed_from_u64(0);
        let mut b = ParamBuilder::new(&mut store, &mut rng, 0.08);
        let w1 = b.weight("a/weights", 3, 4).unwrap();
        let w2 = b.weight("a/weights", 3, 4).unwrap();
        let bias = b.bias("a/biases", 4, 1.0).unwrap();
        assert_eq!(w1, w2);
        assert!(b.weight("a/weights", 4, 4).is_err());
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(bias).data_f32(), &[1.0; 4]);
        assert!(store.get(w1).data_f32().iter().all(|v| v.abs() <= 0.08));
    }

    #[test]
    fn test_dropout_identity_at_keep_one() {
        let backend = CpuBackend::new();
        let store = ParamStore::new();
        let mut g = Graph::new(&backend, &store);
        let mut rng = StdRng::seed_from_u64(1);
        let x = g.constant(Tensor::matrix(vec![1.0; 6], 2, 3));
        assert_eq!(dropout(&mut g, x, 1.0, &mut rng).unwrap(), x);

        let y = dropout(&mut g, x, 0.5, &mut rng).unwrap();
        assert!(g.value(y).data_f32().iter().all(|&v| v == 0.0 || v == 2.0));
    }
}
