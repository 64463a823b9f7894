use rand::rngs::StdRng;

use hred_tensor::{Graph, Tensor, Var};

use super::{dropout, Linear, ParamBuilder};
use crate::config::CellType;
use crate::error::{ModelError, Result};

/// Recurrent state of one layer: a GRU carries only `h`, an LSTM carries the
/// memory `c` alongside the output `h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RnnState {
    Simple(Var),
    Paired { c: Var, h: Var },
}

impl RnnState {
    pub fn zeros(g: &mut Graph, cell_type: CellType, batch: usize, units: usize) -> Self {
        let z = g.constant(Tensor::matrix(vec![0.0; batch * units], batch, units));
        match cell_type {
            CellType::Gru => RnnState::Simple(z),
            CellType::Lstm => RnnState::Paired { c: z, h: z },
        }
    }

    /// Build a state from one vector, duplicating it into both halves for LSTM.
    pub fn from_vector(cell_type: CellType, v: Var) -> Self {
        match cell_type {
            CellType::Gru => RnnState::Simple(v),
            CellType::Lstm => RnnState::Paired { c: v, h: v },
        }
    }

    /// The output half of the state.
    pub fn output(&self) -> Var {
        match *self {
            RnnState::Simple(h) => h,
            RnnState::Paired { h, .. } => h,
        }
    }

    /// Rows where `active` is set come from `next`, the rest keep `self`.
    pub fn select(&self, g: &mut Graph, active: &[bool], next: &RnnState) -> Result<RnnState> {
        match (*self, *next) {
            (RnnState::Simple(old), RnnState::Simple(new)) => {
                Ok(RnnState::Simple(g.select_rows(active, new, old)?))
            }
            (RnnState::Paired { c: oc, h: oh }, RnnState::Paired { c: nc, h: nh }) => {
                Ok(RnnState::Paired {
                    c: g.select_rows(active, nc, oc)?,
                    h: g.select_rows(active, nh, oh)?,
                })
            }
            _ => Err(ModelError::Other(
                "cannot mix simple and paired recurrent states".to_string(),
            )),
        }
    }
}

/// One [`RnnState`] per stacked layer, bottom first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayeredState(pub Vec<RnnState>);

impl LayeredState {
    pub fn layers(&self) -> &[RnnState] {
        &self.0
    }

    /// Output halves of every layer concatenated column-wise.
    pub fn flatten_outputs(&self, g: &mut Graph) -> Result<Var> {
        let outs: Vec<Var> = self.0.iter().map(RnnState::output).collect();
        if outs.len() == 1 {
            return Ok(outs[0]);
        }
        Ok(g.concat_cols(&outs)?)
    }

    pub fn select(&self, g: &mut Graph, active: &[bool], next: &LayeredState) -> Result<Self> {
        let layers = self
            .0
            .iter()
            .zip(&next.0)
            .map(|(old, new)| old.select(g, active, new))
            .collect::<Result<Vec<_>>>()?;
        Ok(LayeredState(layers))
    }
}

/// Gated recurrent unit.
///
/// Reset and update gates come from `[x, h]` with biases starting at 1.0;
/// the candidate reads `[x, r * h]`.
#[derive(Debug, Clone)]
pub struct GruCell {
    gates: Linear,
    candidate: Linear,
    units: usize,
}

impl GruCell {
    pub fn new(
        scope: &str,
        input_dim: usize,
        units: usize,
        builder: &mut ParamBuilder<'_>,
    ) -> Result<Self> {
        let gates = Linear::new(
            &format!("{}/gates", scope),
            input_dim + units,
            2 * units,
            1.0,
            builder,
        )?;
        let candidate = Linear::new(
            &format!("{}/candidate", scope),
            input_dim + units,
            units,
            0.0,
            builder,
        )?;
        Ok(GruCell {
            gates,
            candidate,
            units,
        })
    }

    pub fn step(&self, g: &mut Graph, x: Var, h: Var) -> Result<Var> {
        let xh = g.concat_cols(&[x, h])?;
        let pre = self.gates.forward(g, xh)?;
        let gates = g.sigmoid(pre)?;
        let r = g.slice_cols(gates, 0, self.units)?;
        let u = g.slice_cols(gates, self.units, self.units)?;

        let rh = g.mul(r, h)?;
        let xrh = g.concat_cols(&[x, rh])?;
        let pre_c = self.candidate.forward(g, xrh)?;
        let c = g.tanh(pre_c)?;

        // u * h + (1 - u) * c == c + u * (h - c)
        let diff = g.sub(h, c)?;
        let gated = g.mul(u, diff)?;
        Ok(g.add(c, gated)?)
    }
}

/// Long short-term memory cell with gates `i, j, f, o` computed by one
/// projection of `[x, h]` and a constant forget bias added before the sigmoid.
#[derive(Debug, Clone)]
pub struct LstmCell {
    linear: Linear,
    units: usize,
    forget_bias: f32,
}

impl LstmCell {
    pub fn new(
        scope: &str,
        input_dim: usize,
        units: usize,
        builder: &mut ParamBuilder<'_>,
    ) -> Result<Self> {
        let linear = Linear::new(scope, input_dim + units, 4 * units, 0.0, builder)?;
        Ok(LstmCell {
            linear,
            units,
            forget_bias: 1.0,
        })
    }

    pub fn step(&self, g: &mut Graph, x: Var, c: Var, h: Var) -> Result<(Var, Var)> {
        let n = self.units;
        let xh = g.concat_cols(&[x, h])?;
        let z = self.linear.forward(g, xh)?;
        let i = g.slice_cols(z, 0, n)?;
        let j = g.slice_cols(z, n, n)?;
        let f = g.slice_cols(z, 2 * n, n)?;
        let o = g.slice_cols(z, 3 * n, n)?;

        let f = g.add_scalar(f, self.forget_bias);
        let f = g.sigmoid(f)?;
        let i = g.sigmoid(i)?;
        let j = g.tanh(j)?;
        let o = g.sigmoid(o)?;

        let keep = g.mul(c, f)?;
        let write = g.mul(i, j)?;
        let new_c = g.add(keep, write)?;
        let squashed = g.tanh(new_c)?;
        let new_h = g.mul(squashed, o)?;
        Ok((new_c, new_h))
    }
}

#[derive(Debug, Clone)]
pub enum RnnCell {
    Gru(GruCell),
    Lstm(LstmCell),
}

impl RnnCell {
    pub fn new(
        cell_type: CellType,
        scope: &str,
        input_dim: usize,
        units: usize,
        builder: &mut ParamBuilder<'_>,
    ) -> Result<Self> {
        Ok(match cell_type {
            CellType::Gru => RnnCell::Gru(GruCell::new(scope, input_dim, units, builder)?),
            CellType::Lstm => RnnCell::Lstm(LstmCell::new(scope, input_dim, units, builder)?),
        })
    }

    pub fn cell_type(&self) -> CellType {
        match self {
            RnnCell::Gru(_) => CellType::Gru,
            RnnCell::Lstm(_) => CellType::Lstm,
        }
    }

    pub fn units(&self) -> usize {
        match self {
            RnnCell::Gru(c) => c.units,
            RnnCell::Lstm(c) => c.units,
        }
    }

    pub fn zero_state(&self, g: &mut Graph, batch: usize) -> RnnState {
        RnnState::zeros(g, self.cell_type(), batch, self.units())
    }

    pub fn step(&self, g: &mut Graph, x: Var, state: &RnnState) -> Result<RnnState> {
        match (self, *state) {
            (RnnCell::Gru(cell), RnnState::Simple(h)) => Ok(RnnState::Simple(cell.step(g, x, h)?)),
            (RnnCell::Lstm(cell), RnnState::Paired { c, h }) => {
                let (c, h) = cell.step(g, x, c, h)?;
                Ok(RnnState::Paired { c, h })
            }
            _ => Err(ModelError::Other(format!(
                "{} cell given a mismatched state",
                self.cell_type()
            ))),
        }
    }
}

/// A stack of cells with separate weights per layer (`<scope>/cell_<i>`).
/// A single layer lives directly under `<scope>`.
///
/// Each layer's output passes through dropout with `keep_prob` when the
/// caller supplies an RNG, which only training graphs do. States are never
/// dropped.
#[derive(Debug, Clone)]
pub struct MultiRnnCell {
    cells: Vec<RnnCell>,
    keep_prob: f32,
}

impl MultiRnnCell {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cell_type: CellType,
        scope: &str,
        input_dim: usize,
        units: usize,
        num_layer: usize,
        keep_prob: f32,
        builder: &mut ParamBuilder<'_>,
    ) -> Result<Self> {
        let mut cells = Vec::with_capacity(num_layer);
        for i in 0..num_layer {
            let layer_scope = if num_layer == 1 {
                scope.to_string()
            } else {
                format!("{}/cell_{}", scope, i)
            };
            let in_dim = if i == 0 { input_dim } else { units };
            cells.push(RnnCell::new(cell_type, &layer_scope, in_dim, units, builder)?);
        }
        Ok(MultiRnnCell { cells, keep_prob })
    }

    pub fn num_layers(&self) -> usize {
        self.cells.len()
    }

    pub fn units(&self) -> usize {
        self.cells.first().map_or(0, RnnCell::units)
    }

    pub fn cell_type(&self) -> CellType {
        self.cells.first().map_or(CellType::Gru, RnnCell::cell_type)
    }

    pub fn zero_state(&self, g: &mut Graph, batch: usize) -> LayeredState {
        LayeredState(self.cells.iter().map(|c| c.zero_state(g, batch)).collect())
    }

    /// One time step through every layer; returns the top output.
    pub fn step(
        &self,
        g: &mut Graph,
        x: Var,
        state: &LayeredState,
        mut rng: Option<&mut StdRng>,
    ) -> Result<(Var, LayeredState)> {
        if state.0.len() != self.cells.len() {
            return Err(ModelError::Other(format!(
                "state has {} layers, cell has {}",
                state.0.len(),
                self.cells.len()
            )));
        }
        let mut input = x;
        let mut next = Vec::with_capacity(self.cells.len());
        for (cell, s) in self.cells.iter().zip(&state.0) {
            let new_state = cell.step(g, input, s)?;
            input = new_state.output();
            if let Some(r) = rng.as_deref_mut() {
                input = dropout(g, input, self.keep_prob, r)?;
            }
            next.push(new_state);
        }
        Ok((input, LayeredState(next)))
    }

    /// Run over `inputs` (one `[batch, in]` var per step). Row `b` stops
    /// updating once `t >= lengths[b]`: its state is carried forward and its
    /// output is zero, so the final state is the state after the last valid
    /// step.
    pub fn unroll(
        &self,
        g: &mut Graph,
        inputs: &[Var],
        lengths: &[usize],
        init: LayeredState,
        mut rng: Option<&mut StdRng>,
    ) -> Result<(Vec<Var>, LayeredState)> {
        let mut state = init;
        let mut outputs = Vec::with_capacity(inputs.len());
        for (t, &x) in inputs.iter().enumerate() {
            let active: Vec<bool> = lengths.iter().map(|&len| t < len).collect();
            if !active.iter().any(|&a| a) {
                let (rows, _) = g.dims(x);
                let zeros = Tensor::matrix(vec![0.0; rows * self.units()], rows, self.units());
                outputs.push(g.constant(zeros));
                continue;
            }
            let (out, next) = self.step(g, x, &state, rng.as_deref_mut())?;
            if active.iter().all(|&a| a) {
                state = next;
                outputs.push(out);
            } else {
                state = state.select(g, &active, &next)?;
                let keep = active.iter().map(|&a| if a { 1.0 } else { 0.0 }).collect();
                outputs.push(g.scale_rows(out, keep)?);
            }
        }
        Ok((outputs, state))
    }
}
