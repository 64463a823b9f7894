use hred_tensor::{Graph, ParamId, Var};

use super::ParamBuilder;
use crate::error::Result;

/// Affine map `x W + b` with parameters `<scope>/weights` and `<scope>/biases`.
#[derive(Debug, Clone)]
pub struct Linear {
    weights: ParamId,
    biases: ParamId,
    in_dim: usize,
    out_dim: usize,
}

impl Linear {
    pub fn new(
        scope: &str,
        in_dim: usize,
        out_dim: usize,
        bias_init: f32,
        builder: &mut ParamBuilder<'_>,
    ) -> Result<Self> {
        let weights = builder.weight(&format!("{}/weights", scope), in_dim, out_dim)?;
        let biases = builder.bias(&format!("{}/biases", scope), out_dim, bias_init)?;
        Ok(Linear {
            weights,
            biases,
            in_dim,
            out_dim,
        })
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    pub fn forward(&self, g: &mut Graph, x: Var) -> Result<Var> {
        let w = g.param(self.weights);
        let b = g.param(self.biases);
        let y = g.matmul(x, w)?;
        Ok(g.add_row(y, b)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hred_tensor::{CpuBackend, ParamStore, Tensor};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_forward_shape_and_bias() {
        let mut store = ParamStore::new();
        let mut rng = StdRng::seed_from_u64(0);
        let lin = {
            let mut b = ParamBuilder::new(&mut store, &mut rng, 0.0);
            Linear::new("proj", 3, 2, 0.5, &mut b).unwrap()
        };
        let backend = CpuBackend::new();
        let mut g = Graph::new(&backend, &store);
        let x = g.constant(Tensor::matrix(vec![1.0; 12], 4, 3));
        let y = lin.forward(&mut g, x).unwrap();
        assert_eq!(g.dims(y), (4, 2));
        // init_w = 0 leaves zero weights, so only the bias remains.
        assert!(g.value(y).data_f32().iter().all(|&v| v == 0.5));
    }
}
