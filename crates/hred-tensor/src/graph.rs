//! Reverse-mode automatic differentiation over 2-D tensors.
//!
//! A [`Graph`] is a tape: every operation evaluates eagerly and appends a
//! node recording its inputs. Because inputs always precede outputs on the
//! tape, [`Graph::backward`] can walk the nodes in reverse index order and
//! every node's gradient is complete by the time it is visited.
//!
//! Parameters are read from a [`ParamStore`]; each parameter gets exactly
//! one leaf per graph so contributions from every use are summed.

use std::collections::HashMap;

use crate::backend::ComputeBackend;
use crate::error::{Result, TensorError};
use crate::param::{ParamId, ParamStore};
use crate::shape::Shape;
use crate::tensor::Tensor;

/// Handle to a node on a [`Graph`] tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Var(usize);

#[derive(Debug)]
enum Op {
    Leaf,
    Param(ParamId),
    MatMul(Var, Var),
    Add(Var, Var),
    Sub(Var, Var),
    Mul(Var, Var),
    AddScalar(Var),
    AddRow(Var, Var),
    ScaleRows(Var, Vec<f32>),
    MulConst(Var, Vec<f32>),
    Sigmoid(Var),
    Tanh(Var),
    Concat(Vec<Var>),
    SliceCols(Var, usize),
    Gather(Var, Vec<usize>),
    Select(Vec<bool>, Var, Var),
    SoftmaxCrossEntropy(Var, Vec<usize>),
    Mean(Var),
    Sum(Var),
}

#[derive(Debug)]
struct Node {
    value: Tensor,
    op: Op,
    requires_grad: bool,
}

/// Gradients of a scalar loss with respect to every parameter it touched.
#[derive(Debug, Default)]
pub struct Gradients {
    by_param: HashMap<ParamId, Tensor>,
}

impl Gradients {
    pub fn get(&self, id: ParamId) -> Option<&Tensor> {
        self.by_param.get(&id)
    }

    pub fn len(&self) -> usize {
        self.by_param.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_param.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamId, &Tensor)> {
        self.by_param.iter().map(|(id, t)| (*id, t))
    }

    /// L2 norm over every gradient element.
    pub fn global_norm(&self) -> f32 {
        self.by_param
            .values()
            .flat_map(|t| t.data_f32().iter())
            .map(|v| v * v)
            .sum::<f32>()
            .sqrt()
    }

    /// Rescale all gradients so their global norm is at most `max_norm`.
    ///
    /// Returns the norm measured before clipping.
    pub fn clip_by_global_norm(&mut self, max_norm: f32) -> f32 {
        let norm = self.global_norm();
        if norm > max_norm && norm > 0.0 {
            let factor = max_norm / norm;
            for t in self.by_param.values_mut() {
                for v in t.data_f32_mut() {
                    *v *= factor;
                }
            }
        }
        norm
    }
}

/// A computation tape bound to one backend and one parameter store.
pub struct Graph<'a> {
    backend: &'a dyn ComputeBackend,
    params: &'a ParamStore,
    nodes: Vec<Node>,
    param_vars: HashMap<ParamId, Var>,
}

impl<'a> Graph<'a> {
    pub fn new(backend: &'a dyn ComputeBackend, params: &'a ParamStore) -> Self {
        Graph {
            backend,
            params,
            nodes: Vec::new(),
            param_vars: HashMap::new(),
        }
    }

    pub fn backend(&self) -> &dyn ComputeBackend {
        self.backend
    }

    /// Number of nodes recorded so far.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn value(&self, v: Var) -> &Tensor {
        &self.nodes[v.0].value
    }

    /// `(rows, cols)` of a node's value.
    pub fn dims(&self, v: Var) -> (usize, usize) {
        let t = &self.nodes[v.0].value;
        (t.rows(), t.cols())
    }

    fn data(&self, v: Var) -> &[f32] {
        self.nodes[v.0].value.data_f32()
    }

    fn requires(&self, v: Var) -> bool {
        self.nodes[v.0].requires_grad
    }

    fn push(&mut self, value: Tensor, op: Op, requires_grad: bool) -> Var {
        self.nodes.push(Node {
            value,
            op,
            requires_grad,
        });
        Var(self.nodes.len() - 1)
    }

    fn same_dims(&self, a: Var, b: Var) -> Result<(usize, usize)> {
        let da = self.dims(a);
        let db = self.dims(b);
        if da != db {
            return Err(TensorError::ShapeMismatch {
                expected: vec![da.0, da.1],
                got: vec![db.0, db.1],
            });
        }
        Ok(da)
    }

    /// A value that never receives gradients.
    pub fn constant(&mut self, value: Tensor) -> Var {
        let (r, c) = (value.rows(), value.cols());
        let value = match value.reshape(Shape::matrix(r, c)) {
            Ok(t) => t,
            Err(_) => value,
        };
        self.push(value, Op::Leaf, false)
    }

    /// The leaf for parameter `id`, created on first use.
    pub fn param(&mut self, id: ParamId) -> Var {
        if let Some(&v) = self.param_vars.get(&id) {
            return v;
        }
        let value = self.params.get(id).clone();
        let v = self.push(value, Op::Param(id), true);
        self.param_vars.insert(id, v);
        v
    }

    pub fn matmul(&mut self, a: Var, b: Var) -> Result<Var> {
        let (m, k) = self.dims(a);
        let (k2, n) = self.dims(b);
        if k != k2 {
            return Err(TensorError::MatmulMismatch { m, k, k2, n });
        }
        let out = self.backend.matmul(self.data(a), self.data(b), m, k, n)?;
        let rg = self.requires(a) || self.requires(b);
        Ok(self.push(Tensor::matrix(out, m, n), Op::MatMul(a, b), rg))
    }

    pub fn add(&mut self, a: Var, b: Var) -> Result<Var> {
        let (r, c) = self.same_dims(a, b)?;
        let out = self.backend.add(self.data(a), self.data(b))?;
        let rg = self.requires(a) || self.requires(b);
        Ok(self.push(Tensor::matrix(out, r, c), Op::Add(a, b), rg))
    }

    pub fn sub(&mut self, a: Var, b: Var) -> Result<Var> {
        let (r, c) = self.same_dims(a, b)?;
        let out = self.backend.sub(self.data(a), self.data(b))?;
        let rg = self.requires(a) || self.requires(b);
        Ok(self.push(Tensor::matrix(out, r, c), Op::Sub(a, b), rg))
    }

    pub fn mul(&mut self, a: Var, b: Var) -> Result<Var> {
        let (r, c) = self.same_dims(a, b)?;
        let out = self.backend.mul(self.data(a), self.data(b))?;
        let rg = self.requires(a) || self.requires(b);
        Ok(self.push(Tensor::matrix(out, r, c), Op::Mul(a, b), rg))
    }

    /// Sum of a non-empty list of same-shaped vars.
    pub fn add_n(&mut self, vars: &[Var]) -> Result<Var> {
        let (first, rest) = vars
            .split_first()
            .ok_or_else(|| TensorError::Other("add_n of an empty list".to_string()))?;
        let mut acc = *first;
        for v in rest {
            acc = self.add(acc, *v)?;
        }
        Ok(acc)
    }

    pub fn add_scalar(&mut self, a: Var, s: f32) -> Var {
        let (r, c) = self.dims(a);
        let out = self.data(a).iter().map(|v| v + s).collect();
        let rg = self.requires(a);
        self.push(Tensor::matrix(out, r, c), Op::AddScalar(a), rg)
    }

    /// `x [r, c] + bias [1, c]`, the bias broadcast over rows.
    pub fn add_row(&mut self, x: Var, bias: Var) -> Result<Var> {
        let (r, c) = self.dims(x);
        let (br, bc) = self.dims(bias);
        let out_shape = Shape::broadcast_shape(&Shape::matrix(r, c), &Shape::matrix(br, bc))?;
        if br != 1 || out_shape.dims() != [r, c] {
            return Err(TensorError::BroadcastError {
                a: vec![r, c],
                b: vec![br, bc],
            });
        }
        let b = self.data(bias);
        let out = self
            .data(x)
            .chunks(c.max(1))
            .flat_map(|row| row.iter().zip(b).map(|(v, bv)| v + bv))
            .collect();
        let rg = self.requires(x) || self.requires(bias);
        Ok(self.push(Tensor::matrix(out, r, c), Op::AddRow(x, bias), rg))
    }

    /// Multiply row `i` by the constant `factors[i]`.
    pub fn scale_rows(&mut self, x: Var, factors: Vec<f32>) -> Result<Var> {
        let (r, c) = self.dims(x);
        if factors.len() != r {
            return Err(TensorError::ShapeMismatch {
                expected: vec![r],
                got: vec![factors.len()],
            });
        }
        let mut out = self.data(x).to_vec();
        for (row, f) in out.chunks_mut(c.max(1)).zip(&factors) {
            for v in row {
                *v *= f;
            }
        }
        let rg = self.requires(x);
        Ok(self.push(Tensor::matrix(out, r, c), Op::ScaleRows(x, factors), rg))
    }

    /// Element-wise product with a constant mask of the same shape.
    pub fn mul_const(&mut self, x: Var, mask: Vec<f32>) -> Result<Var> {
        let (r, c) = self.dims(x);
        let out = self.backend.mul(self.data(x), &mask)?;
        let rg = self.requires(x);
        Ok(self.push(Tensor::matrix(out, r, c), Op::MulConst(x, mask), rg))
    }

    pub fn sigmoid(&mut self, x: Var) -> Result<Var> {
        let (r, c) = self.dims(x);
        let out = self.backend.sigmoid(self.data(x))?;
        let rg = self.requires(x);
        Ok(self.push(Tensor::matrix(out, r, c), Op::Sigmoid(x), rg))
    }

    pub fn tanh(&mut self, x: Var) -> Result<Var> {
        let (r, c) = self.dims(x);
        let out = self.backend.tanh(self.data(x))?;
        let rg = self.requires(x);
        Ok(self.push(Tensor::matrix(out, r, c), Op::Tanh(x), rg))
    }

    /// Concatenate along the column axis.
    pub fn concat_cols(&mut self, parts: &[Var]) -> Result<Var> {
        let first = parts
            .first()
            .ok_or_else(|| TensorError::Other("concat of an empty list".to_string()))?;
        let rows = self.dims(*first).0;
        let mut total = 0;
        for p in parts {
            let (r, c) = self.dims(*p);
            if r != rows {
                return Err(TensorError::ShapeMismatch {
                    expected: vec![rows, c],
                    got: vec![r, c],
                });
            }
            total += c;
        }
        let mut out = Vec::with_capacity(rows * total);
        for i in 0..rows {
            for p in parts {
                out.extend_from_slice(self.value(*p).row(i));
            }
        }
        let rg = parts.iter().any(|p| self.requires(*p));
        Ok(self.push(
            Tensor::matrix(out, rows, total),
            Op::Concat(parts.to_vec()),
            rg,
        ))
    }

    /// Columns `start..start + width` of `x`.
    pub fn slice_cols(&mut self, x: Var, start: usize, width: usize) -> Result<Var> {
        let (r, c) = self.dims(x);
        if start + width > c {
            return Err(TensorError::InvalidAxis {
                axis: start + width,
                ndim: c,
            });
        }
        let mut out = Vec::with_capacity(r * width);
        for i in 0..r {
            out.extend_from_slice(&self.value(x).row(i)[start..start + width]);
        }
        let rg = self.requires(x);
        Ok(self.push(Tensor::matrix(out, r, width), Op::SliceCols(x, start), rg))
    }

    /// Rows `ids` of `table`, i.e. an embedding lookup.
    pub fn gather_rows(&mut self, table: Var, ids: &[usize]) -> Result<Var> {
        let (r, c) = self.dims(table);
        let mut out = Vec::with_capacity(ids.len() * c);
        for &id in ids {
            if id >= r {
                return Err(TensorError::IndexOutOfRange { index: id, len: r });
            }
            out.extend_from_slice(self.value(table).row(id));
        }
        let rg = self.requires(table);
        Ok(self.push(
            Tensor::matrix(out, ids.len(), c),
            Op::Gather(table, ids.to_vec()),
            rg,
        ))
    }

    /// Row `i` of the result is row `i` of `a` when `mask[i]`, else of `b`.
    pub fn select_rows(&mut self, mask: &[bool], a: Var, b: Var) -> Result<Var> {
        let (r, c) = self.same_dims(a, b)?;
        if mask.len() != r {
            return Err(TensorError::ShapeMismatch {
                expected: vec![r],
                got: vec![mask.len()],
            });
        }
        let mut out = Vec::with_capacity(r * c);
        for (i, keep_a) in mask.iter().enumerate() {
            let src = if *keep_a { a } else { b };
            out.extend_from_slice(self.value(src).row(i));
        }
        let rg = self.requires(a) || self.requires(b);
        Ok(self.push(
            Tensor::matrix(out, r, c),
            Op::Select(mask.to_vec(), a, b),
            rg,
        ))
    }

    /// Per-row cross-entropy between `softmax(logits)` and integer labels.
    ///
    /// Returns a `[rows, 1]` column of losses.
    pub fn softmax_cross_entropy(&mut self, logits: Var, labels: &[usize]) -> Result<Var> {
        let (r, v) = self.dims(logits);
        if labels.len() != r {
            return Err(TensorError::ShapeMismatch {
                expected: vec![r],
                got: vec![labels.len()],
            });
        }
        let log_probs = self.backend.log_softmax(self.data(logits), v)?;
        let mut out = Vec::with_capacity(r);
        for (i, &label) in labels.iter().enumerate() {
            if label >= v {
                return Err(TensorError::IndexOutOfRange { index: label, len: v });
            }
            out.push(-log_probs[i * v + label]);
        }
        let rg = self.requires(logits);
        Ok(self.push(
            Tensor::matrix(out, r, 1),
            Op::SoftmaxCrossEntropy(logits, labels.to_vec()),
            rg,
        ))
    }

    /// Mean of every element, as a `[1, 1]` value.
    pub fn mean(&mut self, x: Var) -> Var {
        let data = self.data(x);
        let m = if data.is_empty() {
            0.0
        } else {
            data.iter().sum::<f32>() / data.len() as f32
        };
        let rg = self.requires(x);
        self.push(Tensor::matrix(vec![m], 1, 1), Op::Mean(x), rg)
    }

    /// Sum of every element, as a `[1, 1]` value.
    pub fn sum(&mut self, x: Var) -> Var {
        let s = self.data(x).iter().sum::<f32>();
        let rg = self.requires(x);
        self.push(Tensor::matrix(vec![s], 1, 1), Op::Sum(x), rg)
    }

    /// Gradients of the scalar `loss` with respect to every parameter leaf.
    pub fn backward(&self, loss: Var) -> Result<Gradients> {
        let (lr, lc) = self.dims(loss);
        if lr * lc != 1 {
            return Err(TensorError::ShapeMismatch {
                expected: vec![1, 1],
                got: vec![lr, lc],
            });
        }

        let mut grads: Vec<Option<Vec<f32>>> = vec![None; loss.0 + 1];
        grads[loss.0] = Some(vec![1.0]);
        let mut by_param = HashMap::new();

        for idx in (0..=loss.0).rev() {
            let Some(g) = grads[idx].take() else {
                continue;
            };
            let node = &self.nodes[idx];
            if !node.requires_grad {
                continue;
            }
            match &node.op {
                Op::Leaf => {}
                Op::Param(id) => {
                    by_param.insert(*id, Tensor::new(g, node.value.shape().clone()));
                }
                Op::MatMul(a, b) => {
                    let (m, k) = self.dims(*a);
                    let n = self.dims(*b).1;
                    if self.requires(*a) {
                        let ga = self.backend.matmul_transposed_b(&g, self.data(*b), m, n, k)?;
                        self.accumulate(&mut grads, *a, ga);
                    }
                    if self.requires(*b) {
                        let gb = self.backend.matmul_transposed_a(self.data(*a), &g, k, m, n)?;
                        self.accumulate(&mut grads, *b, gb);
                    }
                }
                Op::Add(a, b) => {
                    self.accumulate(&mut grads, *a, g.clone());
                    self.accumulate(&mut grads, *b, g);
                }
                Op::Sub(a, b) => {
                    self.accumulate(&mut grads, *a, g.clone());
                    self.accumulate(&mut grads, *b, g.iter().map(|v| -v).collect());
                }
                Op::Mul(a, b) => {
                    if self.requires(*a) {
                        let ga = self.backend.mul(&g, self.data(*b))?;
                        self.accumulate(&mut grads, *a, ga);
                    }
                    if self.requires(*b) {
                        let gb = self.backend.mul(&g, self.data(*a))?;
                        self.accumulate(&mut grads, *b, gb);
                    }
                }
                Op::AddScalar(a) => self.accumulate(&mut grads, *a, g),
                Op::AddRow(x, bias) => {
                    if self.requires(*bias) {
                        let c = self.dims(*bias).1;
                        let mut gb = vec![0.0f32; c];
                        for row in g.chunks(c.max(1)) {
                            for (acc, v) in gb.iter_mut().zip(row) {
                                *acc += v;
                            }
                        }
                        self.accumulate(&mut grads, *bias, gb);
                    }
                    self.accumulate(&mut grads, *x, g);
                }
                Op::ScaleRows(x, factors) => {
                    let c = self.dims(*x).1;
                    let mut gx = g;
                    for (row, f) in gx.chunks_mut(c.max(1)).zip(factors) {
                        for v in row {
                            *v *= f;
                        }
                    }
                    self.accumulate(&mut grads, *x, gx);
                }
                Op::MulConst(x, mask) => {
                    let gx = self.backend.mul(&g, mask)?;
                    self.accumulate(&mut grads, *x, gx);
                }
                Op::Sigmoid(x) => {
                    let y = node.value.data_f32();
                    let gx = g.iter().zip(y).map(|(gv, yv)| gv * yv * (1.0 - yv)).collect();
                    self.accumulate(&mut grads, *x, gx);
                }
                Op::Tanh(x) => {
                    let y = node.value.data_f32();
                    let gx = g.iter().zip(y).map(|(gv, yv)| gv * (1.0 - yv * yv)).collect();
                    self.accumulate(&mut grads, *x, gx);
                }
                Op::Concat(parts) => {
                    let total = node.value.cols();
                    let rows = node.value.rows();
                    let mut offset = 0;
                    for p in parts {
                        let w = self.dims(*p).1;
                        if self.requires(*p) {
                            let mut gp = Vec::with_capacity(rows * w);
                            for i in 0..rows {
                                let start = i * total + offset;
                                gp.extend_from_slice(&g[start..start + w]);
                            }
                            self.accumulate(&mut grads, *p, gp);
                        }
                        offset += w;
                    }
                }
                Op::SliceCols(x, start) => {
                    let (r, c) = self.dims(*x);
                    let w = node.value.cols();
                    let mut gx = vec![0.0f32; r * c];
                    for i in 0..r {
                        gx[i * c + start..i * c + start + w].copy_from_slice(&g[i * w..(i + 1) * w]);
                    }
                    self.accumulate(&mut grads, *x, gx);
                }
                Op::Gather(table, ids) => {
                    let (r, c) = self.dims(*table);
                    let mut gt = vec![0.0f32; r * c];
                    for (i, &id) in ids.iter().enumerate() {
                        for j in 0..c {
                            gt[id * c + j] += g[i * c + j];
                        }
                    }
                    self.accumulate(&mut grads, *table, gt);
                }
                Op::Select(mask, a, b) => {
                    let c = node.value.cols();
                    let mut ga = vec![0.0f32; g.len()];
                    let mut gb = vec![0.0f32; g.len()];
                    for (i, keep_a) in mask.iter().enumerate() {
                        let dst = if *keep_a { &mut ga } else { &mut gb };
                        dst[i * c..(i + 1) * c].copy_from_slice(&g[i * c..(i + 1) * c]);
                    }
                    self.accumulate(&mut grads, *a, ga);
                    self.accumulate(&mut grads, *b, gb);
                }
                Op::SoftmaxCrossEntropy(logits, labels) => {
                    let v = self.dims(*logits).1;
                    let mut gl = self.backend.softmax(self.data(*logits), v)?;
                    for (i, &label) in labels.iter().enumerate() {
                        gl[i * v + label] -= 1.0;
                        for p in &mut gl[i * v..(i + 1) * v] {
                            *p *= g[i];
                        }
                    }
                    self.accumulate(&mut grads, *logits, gl);
                }
                Op::Mean(x) => {
                    let n = self.data(*x).len().max(1);
                    self.accumulate(&mut grads, *x, vec![g[0] / n as f32; n]);
                }
                Op::Sum(x) => {
                    let n = self.data(*x).len();
                    self.accumulate(&mut grads, *x, vec![g[0]; n]);
                }
            }
        }

        Ok(Gradients { by_param })
    }

    fn accumulate(&self, grads: &mut [Option<Vec<f32>>], v: Var, g: Vec<f32>) {
        if !self.requires(v) {
            return;
        }
        match &mut grads[v.0] {
            Some(existing) => {
                for (e, x) in existing.iter_mut().zip(g) {
                    *e += x;
                }
            }
            slot @ None => *slot = Some(g),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuBackend;
    use crate::param::Init;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn store_with(params: &[(&str, usize, usize)]) -> ParamStore {
        let mut rng = StdRng::seed_from_u64(11);
        let mut store = ParamStore::new();
        for (name, r, c) in params {
            store
                .get_or_create(name, Shape::matrix(*r, *c), Init::Uniform(0.5), &mut rng)
                .unwrap();
        }
        store
    }

    /// Compare analytic gradients against central finite differences.
    fn check_gradients<F>(store: &ParamStore, build: F)
    where
        F: Fn(&mut Graph) -> Result<Var>,
    {
        let backend = CpuBackend::new();
        let mut g = Graph::new(&backend, store);
        let loss = build(&mut g).unwrap();
        let grads = g.backward(loss).unwrap();

        let eps = 1e-2f32;
        for (id, name, value) in store.iter() {
            for i in 0..value.shape().numel() {
                let eval = |delta: f32| {
                    let mut shifted = store.clone();
                    shifted.get_mut(id).data_f32_mut()[i] += delta;
                    let mut g = Graph::new(&backend, &shifted);
                    let l = build(&mut g).unwrap();
                    let out = g.value(l).data_f32()[0];
                    out
                };
                let numeric = (eval(eps) - eval(-eps)) / (2.0 * eps);
                let analytic = grads.get(id).map(|t| t.data_f32()[i]).unwrap_or(0.0);
                assert!(
                    (numeric - analytic).abs() < 2e-2 * (1.0 + analytic.abs()),
                    "{}[{}]: numeric {} vs analytic {}",
                    name,
                    i,
                    numeric,
                    analytic
                );
            }
        }
    }

    #[test]
    fn test_affine_sigmoid_tanh_gradients() {
        let store = store_with(&[("w", 3, 2), ("b", 1, 2), ("x", 2, 3)]);
        check_gradients(&store, |g| {
            let w = g.param(store.id("w").unwrap());
            let b = g.param(store.id("b").unwrap());
            let x = g.param(store.id("x").unwrap());
            let h = g.matmul(x, w)?;
            let h = g.add_row(h, b)?;
            let s = g.sigmoid(h)?;
            let t = g.tanh(h)?;
            let p = g.mul(s, t)?;
            let q = g.sub(p, s)?;
            let q = g.add_scalar(q, 1.0);
            Ok(g.sum(q))
        });
    }

    #[test]
    fn test_concat_slice_select_gradients() {
        let store = store_with(&[("a", 2, 2), ("b", 2, 3)]);
        check_gradients(&store, |g| {
            let a = g.param(store.id("a").unwrap());
            let b = g.param(store.id("b").unwrap());
            let c = g.concat_cols(&[a, b])?;
            let left = g.slice_cols(c, 1, 3)?;
            let right = g.slice_cols(c, 2, 3)?;
            let sel = g.select_rows(&[true, false], left, right)?;
            let sq = g.mul(sel, sel)?;
            let scaled = g.scale_rows(sq, vec![0.5, 2.0])?;
            let masked = g.mul_const(scaled, vec![1.0, 0.0, 1.0, 1.0, 1.0, 0.0])?;
            Ok(g.mean(masked))
        });
    }

    #[test]
    fn test_gather_cross_entropy_gradients() {
        let store = store_with(&[("emb", 4, 3), ("proj", 3, 5)]);
        check_gradients(&store, |g| {
            let emb = g.param(store.id("emb").unwrap());
            let proj = g.param(store.id("proj").unwrap());
            let x = g.gather_rows(emb, &[1, 3, 1])?;
            let logits = g.matmul(x, proj)?;
            let ce = g.softmax_cross_entropy(logits, &[0, 4, 2])?;
            let ce2 = g.add_n(&[ce, ce])?;
            Ok(g.mean(ce2))
        });
    }

    #[test]
    fn test_shared_param_leaf_accumulates() {
        let store = store_with(&[("w", 1, 1)]);
        let backend = CpuBackend::new();
        let mut g = Graph::new(&backend, &store);
        let id = store.id("w").unwrap();
        let w1 = g.param(id);
        let w2 = g.param(id);
        assert_eq!(w1, w2);
        let y = g.add(w1, w2).unwrap();
        let loss = g.sum(y);
        let grads = g.backward(loss).unwrap();
        assert_relative_eq!(grads.get(id).unwrap().data_f32()[0], 2.0);
    }

    #[test]
    fn test_constants_receive_no_gradient() {
        let store = store_with(&[("w", 1, 2)]);
        let backend = CpuBackend::new();
        let mut g = Graph::new(&backend, &store);
        let w = g.param(store.id("w").unwrap());
        let c = g.constant(Tensor::matrix(vec![3.0, 4.0], 1, 2));
        let y = g.mul(w, c).unwrap();
        let loss = g.sum(y);
        let grads = g.backward(loss).unwrap();
        assert_eq!(grads.len(), 1);
        assert_eq!(grads.get(store.id("w").unwrap()).unwrap().data_f32(), &[3.0, 4.0]);
    }

    #[test]
    fn test_backward_requires_scalar() {
        let store = store_with(&[("w", 2, 2)]);
        let backend = CpuBackend::new();
        let mut g = Graph::new(&backend, &store);
        let w = g.param(store.id("w").unwrap());
        assert!(g.backward(w).is_err());
    }

    #[test]
    fn test_cross_entropy_value() {
        let store = ParamStore::new();
        let backend = CpuBackend::new();
        let mut g = Graph::new(&backend, &store);
        let logits = g.constant(Tensor::matrix(vec![0.0, 0.0, 0.0, 0.0], 1, 4));
        let ce = g.softmax_cross_entropy(logits, &[2]).unwrap();
        assert_relative_eq!(g.value(ce).data_f32()[0], 4.0f32.ln(), epsilon = 1e-6);
        assert!(g.softmax_cross_entropy(logits, &[4]).is_err());
    }

    #[test]
    fn test_clip_by_global_norm() {
        let mut grads = Gradients::default();
        grads
            .by_param
            .insert(ParamId::from_index(0), Tensor::matrix(vec![3.0, 4.0], 1, 2));
        let norm = grads.clip_by_global_norm(1.0);
        assert_relative_eq!(norm, 5.0);
        assert_relative_eq!(grads.global_norm(), 1.0, epsilon = 1e-6);
    }
}
