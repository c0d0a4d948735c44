//! Recurrent gate cells
//!
//! Every cell computes one state update for one layer:
//! `forward(input[batch, input_width], state[batch, state_width]) -> state[batch, state_width]`.
//!
//! Gate weights have shape `[input_width + state_width, H]` and are applied to
//! the concatenation `[input | state]`. Biases have shape `[1, H]`.

use caption_rnn_common::tensor::{affine, concat_features, sigmoid, tanh};
use caption_rnn_common::{DecoderError, Result};
use ndarray::{s, Array2, ArrayView2};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::config::CellType;

/// Weight/bias pair for one gate
#[derive(Debug, Clone, PartialEq)]
pub struct GateParams {
    weight: Array2<f32>,
    bias: Array2<f32>,
}

impl GateParams {
    /// Variance-scaling init: `W ~ N(0, 1/fan_in)`, zero bias
    pub fn variance_scaled<R: Rng + ?Sized>(
        fan_in: usize,
        hidden_size: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if fan_in == 0 || hidden_size == 0 {
            return Err(DecoderError::Configuration(format!(
                "gate dimensions must be non-zero (fan_in={}, hidden={})",
                fan_in, hidden_size
            )));
        }
        let std = 1.0 / (fan_in as f32).sqrt();
        let normal = Normal::new(0.0f32, std).map_err(|e| {
            DecoderError::Configuration(format!("Invalid init distribution: {}", e))
        })?;
        let weight = Array2::from_shape_fn((fan_in, hidden_size), |_| normal.sample(&mut *rng));
        Ok(Self {
            weight,
            bias: Array2::zeros((1, hidden_size)),
        })
    }

    /// Every weight entry set to `weight`, every bias entry to `bias`
    #[must_use]
    pub fn constant(fan_in: usize, hidden_size: usize, weight: f32, bias: f32) -> Self {
        Self {
            weight: Array2::from_elem((fan_in, hidden_size), weight),
            bias: Array2::from_elem((1, hidden_size), bias),
        }
    }

    /// Wrap explicit arrays; `bias` must be `[1, weight.ncols()]`
    pub fn from_arrays(weight: Array2<f32>, bias: Array2<f32>) -> Result<Self> {
        if bias.dim() != (1, weight.ncols()) {
            return Err(DecoderError::shape(
                "gate bias",
                (1, weight.ncols()),
                bias.dim(),
            ));
        }
        Ok(Self { weight, bias })
    }

    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    pub fn bias(&self) -> &Array2<f32> {
        &self.bias
    }

    fn check(&self, name: &str, fan_in: usize, hidden_size: usize) -> Result<()> {
        if self.weight.dim() != (fan_in, hidden_size) {
            return Err(DecoderError::Configuration(format!(
                "{} weight has shape {:?}, expected {:?}",
                name,
                self.weight.dim(),
                (fan_in, hidden_size)
            )));
        }
        Ok(())
    }

    #[inline]
    fn apply(&self, x: &ArrayView2<'_, f32>) -> Array2<f32> {
        affine(x, &self.weight, &self.bias)
    }
}

fn check_forward_shapes(
    input: &ArrayView2<'_, f32>,
    state: &ArrayView2<'_, f32>,
    input_width: usize,
    state_width: usize,
) -> Result<()> {
    if input.ncols() != input_width {
        return Err(DecoderError::shape(
            "cell input width",
            input_width,
            input.ncols(),
        ));
    }
    if state.ncols() != state_width {
        return Err(DecoderError::shape(
            "cell state width",
            state_width,
            state.ncols(),
        ));
    }
    if input.nrows() != state.nrows() {
        return Err(DecoderError::shape(
            "cell batch size",
            input.nrows(),
            state.nrows(),
        ));
    }
    Ok(())
}

/// `tanh([x | h] · W + b)`
#[derive(Debug, Clone)]
pub struct SimpleCell {
    input_width: usize,
    hidden_size: usize,
    transform: GateParams,
}

impl SimpleCell {
    pub fn new<R: Rng + ?Sized>(input_width: usize, hidden_size: usize, rng: &mut R) -> Result<Self> {
        let transform = GateParams::variance_scaled(input_width + hidden_size, hidden_size, rng)?;
        Ok(Self {
            input_width,
            hidden_size,
            transform,
        })
    }

    pub fn from_params(input_width: usize, hidden_size: usize, transform: GateParams) -> Result<Self> {
        transform.check("simple", input_width + hidden_size, hidden_size)?;
        Ok(Self {
            input_width,
            hidden_size,
            transform,
        })
    }

    pub fn forward(&self, input: ArrayView2<'_, f32>, state: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        check_forward_shapes(&input, &state, self.input_width, self.hidden_size)?;
        let joined = concat_features(&[input.view(), state.view()])?;
        Ok(tanh(&self.transform.apply(&joined.view())))
    }
}

/// Reset/update gated cell without a memory slice
#[derive(Debug, Clone)]
pub struct GruCell {
    input_width: usize,
    hidden_size: usize,
    update: GateParams,
    reset: GateParams,
    candidate: GateParams,
}

impl GruCell {
    pub fn new<R: Rng + ?Sized>(input_width: usize, hidden_size: usize, rng: &mut R) -> Result<Self> {
        let fan_in = input_width + hidden_size;
        Ok(Self {
            input_width,
            hidden_size,
            update: GateParams::variance_scaled(fan_in, hidden_size, rng)?,
            reset: GateParams::variance_scaled(fan_in, hidden_size, rng)?,
            candidate: GateParams::variance_scaled(fan_in, hidden_size, rng)?,
        })
    }

    pub fn from_params(
        input_width: usize,
        hidden_size: usize,
        update: GateParams,
        reset: GateParams,
        candidate: GateParams,
    ) -> Result<Self> {
        let fan_in = input_width + hidden_size;
        update.check("update gate", fan_in, hidden_size)?;
        reset.check("reset gate", fan_in, hidden_size)?;
        candidate.check("candidate", fan_in, hidden_size)?;
        Ok(Self {
            input_width,
            hidden_size,
            update,
            reset,
            candidate,
        })
    }

    /// The candidate reuses the input rows of the reset weight for `x` and the
    /// state rows of the candidate weight for `reset ⊙ h`.
    pub fn forward(&self, input: ArrayView2<'_, f32>, state: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        check_forward_shapes(&input, &state, self.input_width, self.hidden_size)?;
        let joined = concat_features(&[input.view(), state.view()])?;

        let reset = sigmoid(&self.reset.apply(&joined.view()));
        let update = sigmoid(&self.update.apply(&joined.view()));
        let gated_state = &reset * &state;

        let x_rows = self.reset.weight.slice(s![..self.input_width, ..]);
        let h_rows = self.candidate.weight.slice(s![self.input_width.., ..]);
        let candidate = tanh(&(input.dot(&x_rows) + gated_state.dot(&h_rows) + &self.candidate.bias));

        let keep = &update * &state;
        let replace = update.mapv(|u| 1.0 - u) * &candidate;
        Ok(keep + replace)
    }
}

/// Gate parameters of an [`LstmCell`]
#[derive(Debug, Clone)]
pub struct LstmParams {
    pub input_gate: GateParams,
    pub forget_gate: GateParams,
    pub output_gate: GateParams,
    pub candidate: GateParams,
}

/// Input/forget/output gated cell; state layout `[visible_hidden | memory]`
#[derive(Debug, Clone)]
pub struct LstmCell {
    input_width: usize,
    hidden_size: usize,
    params: LstmParams,
}

impl LstmCell {
    pub fn new<R: Rng + ?Sized>(input_width: usize, hidden_size: usize, rng: &mut R) -> Result<Self> {
        let fan_in = input_width + 2 * hidden_size;
        let params = LstmParams {
            forget_gate: GateParams::variance_scaled(fan_in, hidden_size, rng)?,
            input_gate: GateParams::variance_scaled(fan_in, hidden_size, rng)?,
            candidate: GateParams::variance_scaled(fan_in, hidden_size, rng)?,
            output_gate: GateParams::variance_scaled(fan_in, hidden_size, rng)?,
        };
        Ok(Self {
            input_width,
            hidden_size,
            params,
        })
    }

    pub fn from_params(input_width: usize, hidden_size: usize, params: LstmParams) -> Result<Self> {
        let fan_in = input_width + 2 * hidden_size;
        params.input_gate.check("input gate", fan_in, hidden_size)?;
        params.forget_gate.check("forget gate", fan_in, hidden_size)?;
        params.output_gate.check("output gate", fan_in, hidden_size)?;
        params.candidate.check("candidate memory", fan_in, hidden_size)?;
        Ok(Self {
            input_width,
            hidden_size,
            params,
        })
    }

    pub fn params(&self) -> &LstmParams {
        &self.params
    }

    /// Returns `[o ⊙ tanh(tanh(c')) | c']` with `c' = f ⊙ c + i ⊙ tanh(candidate)`.
    ///
    /// The hidden slice squashes the memory twice; the raw `c'` is carried forward.
    pub fn forward(&self, input: ArrayView2<'_, f32>, state: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        let h = self.hidden_size;
        check_forward_shapes(&input, &state, self.input_width, 2 * h)?;
        let joined = concat_features(&[input.view(), state.view()])?;
        let joined = joined.view();

        let input_gate = sigmoid(&self.params.input_gate.apply(&joined));
        let forget_gate = sigmoid(&self.params.forget_gate.apply(&joined));
        let output_gate = sigmoid(&self.params.output_gate.apply(&joined));
        let candidate = tanh(&self.params.candidate.apply(&joined));

        let old_memory = state.slice(s![.., h..2 * h]);
        let memory = &forget_gate * &old_memory + &input_gate * &candidate;
        let visible = &output_gate * &tanh(&tanh(&memory));

        concat_features(&[visible.view(), memory.view()])
    }
}

/// One layer's cell, tagged by variant
#[derive(Debug, Clone)]
pub enum GateCell {
    Simple(SimpleCell),
    Gru(GruCell),
    Lstm(LstmCell),
}

impl GateCell {
    /// Build a freshly initialised cell of the given variant
    pub fn new<R: Rng + ?Sized>(
        cell_type: CellType,
        input_width: usize,
        hidden_size: usize,
        rng: &mut R,
    ) -> Result<Self> {
        Ok(match cell_type {
            CellType::Simple => GateCell::Simple(SimpleCell::new(input_width, hidden_size, rng)?),
            CellType::Gru => GateCell::Gru(GruCell::new(input_width, hidden_size, rng)?),
            CellType::Lstm => GateCell::Lstm(LstmCell::new(input_width, hidden_size, rng)?),
        })
    }

    #[must_use]
    pub fn cell_type(&self) -> CellType {
        match self {
            GateCell::Simple(_) => CellType::Simple,
            GateCell::Gru(_) => CellType::Gru,
            GateCell::Lstm(_) => CellType::Lstm,
        }
    }

    #[must_use]
    pub fn input_width(&self) -> usize {
        match self {
            GateCell::Simple(c) => c.input_width,
            GateCell::Gru(c) => c.input_width,
            GateCell::Lstm(c) => c.input_width,
        }
    }

    #[must_use]
    pub fn hidden_size(&self) -> usize {
        match self {
            GateCell::Simple(c) => c.hidden_size,
            GateCell::Gru(c) => c.hidden_size,
            GateCell::Lstm(c) => c.hidden_size,
        }
    }

    #[must_use]
    pub fn state_width(&self) -> usize {
        self.cell_type().state_width(self.hidden_size())
    }

    pub fn forward(&self, input: ArrayView2<'_, f32>, state: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        match self {
            GateCell::Simple(c) => c.forward(input, state),
            GateCell::Gru(c) => c.forward(input, state),
            GateCell::Lstm(c) => c.forward(input, state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn saturated_lstm(input_bias: f32, forget_bias: f32, candidate_bias: f32) -> LstmCell {
        let (input_width, h) = (3, 2);
        let fan_in = input_width + 2 * h;
        LstmCell::from_params(
            input_width,
            h,
            LstmParams {
                input_gate: GateParams::constant(fan_in, h, 0.0, input_bias),
                forget_gate: GateParams::constant(fan_in, h, 0.0, forget_bias),
                output_gate: GateParams::constant(fan_in, h, 0.0, 0.0),
                candidate: GateParams::constant(fan_in, h, 0.0, candidate_bias),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_output_width_independent_of_batch() {
        let mut rng = rng();
        for cell_type in [CellType::Simple, CellType::Gru, CellType::Lstm] {
            let cell = GateCell::new(cell_type, 5, 4, &mut rng).unwrap();
            for batch in [1, 3, 8] {
                let input = Array2::<f32>::ones((batch, 5));
                let state = Array2::<f32>::zeros((batch, cell.state_width()));
                let out = cell.forward(input.view(), state.view()).unwrap();
                assert_eq!(out.dim(), (batch, cell_type.state_width(4)));
            }
        }
    }

    #[test]
    fn test_variance_scaled_init() {
        let mut rng = rng();
        let params = GateParams::variance_scaled(400, 50, &mut rng).unwrap();
        let n = params.weight().len() as f32;
        let mean = params.weight().sum() / n;
        let var = params.weight().mapv(|w| (w - mean) * (w - mean)).sum() / n;
        assert!(mean.abs() < 0.005, "mean {}", mean);
        assert!((var - 1.0 / 400.0).abs() < 0.0005, "var {}", var);
        assert!(params.bias().iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_same_seed_same_parameters() {
        let a = GateParams::variance_scaled(6, 3, &mut StdRng::seed_from_u64(11)).unwrap();
        let b = GateParams::variance_scaled(6, 3, &mut StdRng::seed_from_u64(11)).unwrap();
        let c = GateParams::variance_scaled(6, 3, &mut StdRng::seed_from_u64(12)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_simple_cell_formula() {
        let cell = SimpleCell::from_params(2, 1, GateParams::constant(3, 1, 0.5, 0.25)).unwrap();
        let out = cell
            .forward(array![[1.0f32, 2.0]].view(), array![[-1.0f32]].view())
            .unwrap();
        let expected = (0.5f32 * (1.0 + 2.0 - 1.0) + 0.25).tanh();
        assert!((out[[0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_gru_keeps_state_when_update_saturated() {
        let (input_width, h) = (2, 3);
        let fan_in = input_width + h;
        let cell = GruCell::from_params(
            input_width,
            h,
            GateParams::constant(fan_in, h, 0.0, 50.0),
            GateParams::constant(fan_in, h, 0.1, 0.0),
            GateParams::constant(fan_in, h, 0.1, 0.0),
        )
        .unwrap();
        let state = array![[0.3f32, -0.2, 0.7]];
        let out = cell.forward(array![[1.0f32, 1.0]].view(), state.view()).unwrap();
        for (a, b) in out.iter().zip(state.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_gru_candidate_when_update_closed() {
        let (input_width, h) = (2, 1);
        let cell = GruCell::from_params(
            input_width,
            h,
            GateParams::constant(3, h, 0.0, -50.0),
            GateParams::constant(3, h, 0.2, 0.0),
            GateParams::constant(3, h, 0.4, 0.1),
        )
        .unwrap();
        let x = array![[1.0f32, 2.0]];
        let state = array![[0.5f32]];
        let out = cell.forward(x.view(), state.view()).unwrap();

        let reset = 1.0 / (1.0 + (-(0.2f32 * 3.5)).exp());
        let expected = (0.2f32 * 3.0 + 0.4 * reset * 0.5 + 0.1).tanh();
        assert!((out[[0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_lstm_memory_preserved_when_forget_open_and_input_closed() {
        let cell = saturated_lstm(-50.0, 50.0, 0.8);
        let state = array![[0.1f32, -0.4, 0.9, -1.5]];
        let out = cell.forward(array![[0.2f32, 0.3, 0.4]].view(), state.view()).unwrap();
        assert_eq!(out.slice(s![.., 2..]), state.slice(s![.., 2..]));
    }

    #[test]
    fn test_lstm_memory_replaced_when_forget_closed_and_input_open() {
        let cell = saturated_lstm(50.0, -50.0, 0.8);
        let state = array![[0.1f32, -0.4, 0.9, -1.5]];
        let out = cell.forward(array![[0.2f32, 0.3, 0.4]].view(), state.view()).unwrap();
        let candidate = 0.8f32.tanh();
        assert_eq!(out[[0, 2]], candidate);
        assert_eq!(out[[0, 3]], candidate);
    }

    // Locks the double squashing of the memory in the visible hidden slice.
    #[test]
    fn test_lstm_hidden_applies_tanh_twice() {
        let cell = saturated_lstm(50.0, -50.0, 2.0);
        let state = Array2::<f32>::zeros((1, 4));
        let out = cell.forward(Array2::<f32>::zeros((1, 3)).view(), state.view()).unwrap();
        let memory = 2.0f32.tanh();
        let expected = 0.5 * memory.tanh().tanh();
        assert_eq!(out[[0, 2]], memory);
        assert!((out[[0, 0]] - expected).abs() < 1e-7);
        assert!((out[[0, 0]] - 0.5 * memory.tanh()).abs() > 1e-3);
    }

    #[test]
    fn test_forward_rejects_bad_shapes() {
        let mut rng = rng();
        let cell = GateCell::new(CellType::Lstm, 5, 4, &mut rng).unwrap();
        let input = Array2::<f32>::zeros((2, 5));
        let narrow_state = Array2::<f32>::zeros((2, 4));
        assert!(matches!(
            cell.forward(input.view(), narrow_state.view()),
            Err(DecoderError::Shape { .. })
        ));
        let other_batch = Array2::<f32>::zeros((3, 8));
        assert!(cell.forward(input.view(), other_batch.view()).is_err());
        let wide_input = Array2::<f32>::zeros((2, 6));
        let state = Array2::<f32>::zeros((2, 8));
        assert!(cell.forward(wide_input.view(), state.view()).is_err());
    }

    #[test]
    fn test_from_params_rejects_wrong_weight_shape() {
        let err = SimpleCell::from_params(2, 3, GateParams::constant(4, 3, 0.1, 0.0)).unwrap_err();
        assert!(matches!(err, DecoderError::Configuration(_)));
    }
}
