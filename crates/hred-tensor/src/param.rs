use std::collections::HashMap;

use rand::Rng;

use crate::error::{Result, TensorError};
use crate::shape::Shape;
use crate::tensor::Tensor;

/// Handle to a parameter inside a [`ParamStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(usize);

impl ParamId {
    pub fn index(&self) -> usize {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_index(i: usize) -> Self {
        ParamId(i)
    }
}

/// Initial values for a freshly created parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    /// Uniform samples in `[-w, w]`.
    Uniform(f32),
    Zeros,
    Constant(f32),
}

impl Init {
    fn materialize(&self, shape: Shape, rng: &mut impl Rng) -> Tensor {
        match *self {
            Init::Uniform(w) => {
                let data = (0..shape.numel())
                    .map(|_| if w > 0.0 { rng.gen_range(-w..=w) } else { 0.0 })
                    .collect();
                Tensor::new(data, shape)
            }
            Init::Zeros => Tensor::zeros(shape),
            Init::Constant(v) => Tensor::full(shape, v),
        }
    }
}

/// Named model parameters.
///
/// Names are hierarchical (`"contextRNN/cell_0/gates/weights"`). Asking for
/// an existing name returns the existing parameter, which is how separate
/// graphs (the context path and the response path, or the training and
/// inference graphs) share one set of weights.
#[derive(Debug, Default, Clone)]
pub struct ParamStore {
    names: Vec<String>,
    values: Vec<Tensor>,
    inits: Vec<Init>,
    index: HashMap<String, ParamId>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `name`, creating it with `init` if absent.
    ///
    /// # Errors
    /// Fails if `name` exists with a different shape.
    pub fn get_or_create(
        &mut self,
        name: &str,
        shape: Shape,
        init: Init,
        rng: &mut impl Rng,
    ) -> Result<ParamId> {
        if let Some(&id) = self.index.get(name) {
            let existing = self.values[id.0].shape();
            if *existing != shape {
                return Err(TensorError::ParamShapeConflict {
                    name: name.to_string(),
                    existing: existing.dims().to_vec(),
                    requested: shape.dims().to_vec(),
                });
            }
            // A restored value adopts the initializer of the graph that claims it.
            self.inits[id.0] = init;
            return Ok(id);
        }
        let tensor = init.materialize(shape, rng);
        Ok(self.push(name, tensor, init))
    }

    /// Insert or overwrite a parameter with an explicit value.
    pub fn insert(&mut self, name: &str, value: Tensor) -> ParamId {
        match self.index.get(name) {
            Some(&id) => {
                self.values[id.0] = value;
                id
            }
            None => self.push(name, value, Init::Zeros),
        }
    }

    fn push(&mut self, name: &str, value: Tensor, init: Init) -> ParamId {
        let id = ParamId(self.values.len());
        self.names.push(name.to_string());
        self.values.push(value);
        self.inits.push(init);
        self.index.insert(name.to_string(), id);
        id
    }

    /// Redraw every parameter from the initializer it was created with.
    pub fn reinitialize(&mut self, rng: &mut impl Rng) {
        for (value, init) in self.values.iter_mut().zip(&self.inits) {
            *value = init.materialize(value.shape().clone(), rng);
        }
    }

    pub fn id(&self, name: &str) -> Option<ParamId> {
        self.index.get(name).copied()
    }

    pub fn get(&self, id: ParamId) -> &Tensor {
        &self.values[id.0]
    }

    pub fn get_mut(&mut self, id: ParamId) -> &mut Tensor {
        &mut self.values[id.0]
    }

    /// Look up a parameter by name.
    pub fn by_name(&self, name: &str) -> Result<&Tensor> {
        self.id(name)
            .map(|id| self.get(id))
            .ok_or_else(|| TensorError::UnknownParam(name.to_string()))
    }

    pub fn name(&self, id: ParamId) -> &str {
        &self.names[id.0]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Total number of scalar weights.
    pub fn num_elements(&self) -> usize {
        self.values.iter().map(|t| t.shape().numel()).sum()
    }

    /// Iterate parameters in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (ParamId, &str, &Tensor)> {
        self.values
            .iter()
            .enumerate()
            .map(move |(i, t)| (ParamId(i), self.names[i].as_str(), t))
    }
}
