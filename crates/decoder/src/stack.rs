//! Stacked multi-layer decoder
//!
//! Layer 0 reads `[image_feature | token_vec]`. Every layer `k >= 1` reads
//! `[prev_state[k-1] | attention(prev_state[k-1])]`, where `prev_state` is the
//! state from the previous timestep. No layer reads a sibling's output from the
//! current timestep.

use caption_rnn_common::tensor::{concat_features, expect_dims2, expect_dims3};
use caption_rnn_common::{DecoderError, Result};
use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::cell::GateCell;
use crate::collaborators::AttentionScorer;
use crate::config::{CellType, DecoderConfig};

/// Input feature width for each layer, one entry per layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInputSpec {
    widths: Vec<usize>,
}

impl LayerInputSpec {
    pub fn new(widths: Vec<usize>) -> Self {
        Self { widths }
    }

    /// `[E + F, A + state_width, A + state_width, ...]` with `num_layers` entries
    #[must_use]
    pub fn for_config(config: &DecoderConfig) -> Self {
        let first = config.embedding_size + config.image_feature_size;
        let upper = config.attention_size + config.state_width();
        let widths = (0..config.num_layers)
            .map(|layer| if layer == 0 { first } else { upper })
            .collect();
        Self { widths }
    }

    /// The fixed two-entry table: layer 0 and a single upper layer
    #[must_use]
    pub fn two_layer(config: &DecoderConfig) -> Self {
        Self {
            widths: vec![
                config.embedding_size + config.image_feature_size,
                config.attention_size + config.state_width(),
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.widths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widths.is_empty()
    }

    pub fn width(&self, layer: usize) -> Option<usize> {
        self.widths.get(layer).copied()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.widths
    }

    /// Reject tables that do not have exactly one correctly sized entry per layer
    fn validate(&self, config: &DecoderConfig) -> Result<()> {
        if config.num_layers > self.widths.len() {
            return Err(DecoderError::Configuration(format!(
                "{} layers requested but the input-size table only has {} entries",
                config.num_layers,
                self.widths.len()
            )));
        }
        if config.num_layers < self.widths.len() {
            return Err(DecoderError::Configuration(format!(
                "input-size table has {} entries for {} layers",
                self.widths.len(),
                config.num_layers
            )));
        }
        let expected = Self::for_config(config);
        for (layer, (&have, &want)) in self.widths.iter().zip(&expected.widths).enumerate() {
            if have != want {
                return Err(DecoderError::Configuration(format!(
                    "layer {} input width is {}, expected {}",
                    layer, have, want
                )));
            }
        }
        Ok(())
    }
}

/// Ordered stack of same-variant cells driven one timestep at a time
#[derive(Debug, Clone)]
pub struct StackedDecoder {
    cells: Vec<GateCell>,
    input_spec: LayerInputSpec,
    cell_type: CellType,
    hidden_size: usize,
    embedding_size: usize,
    image_feature_size: usize,
    attention_size: usize,
    max_generated_length: usize,
}

impl StackedDecoder {
    /// Build a decoder with freshly initialised cells seeded from `config.seed`
    pub fn new(config: &DecoderConfig) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        Self::with_rng(config, LayerInputSpec::for_config(config), &mut rng)
    }

    /// Build a decoder from an explicit input-size table and RNG
    pub fn with_rng<R: Rng + ?Sized>(
        config: &DecoderConfig,
        input_spec: LayerInputSpec,
        rng: &mut R,
    ) -> Result<Self> {
        config.validate()?;
        input_spec.validate(config)?;
        let cell_type = config.effective_cell_type();

        let cells = input_spec
            .as_slice()
            .iter()
            .map(|&width| GateCell::new(cell_type, width, config.hidden_size, rng))
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Built {:?} decoder: {} layers, hidden size {}, input widths {:?}",
            cell_type,
            cells.len(),
            config.hidden_size,
            input_spec.as_slice()
        );

        Self::assemble(config, input_spec, cells)
    }

    /// Build a decoder from pre-built cells (one per table entry, same variant)
    pub fn from_cells(
        config: &DecoderConfig,
        input_spec: LayerInputSpec,
        cells: Vec<GateCell>,
    ) -> Result<Self> {
        config.validate()?;
        input_spec.validate(config)?;
        Self::assemble(config, input_spec, cells)
    }

    fn assemble(
        config: &DecoderConfig,
        input_spec: LayerInputSpec,
        cells: Vec<GateCell>,
    ) -> Result<Self> {
        if cells.len() != input_spec.len() {
            return Err(DecoderError::Configuration(format!(
                "{} cells supplied for {} layers",
                cells.len(),
                input_spec.len()
            )));
        }
        let cell_type = cells[0].cell_type();
        let state_width = cells[0].state_width();
        for (layer, cell) in cells.iter().enumerate() {
            if cell.cell_type() != cell_type || cell.state_width() != state_width {
                return Err(DecoderError::Configuration(format!(
                    "layer {} is a {:?} cell with state width {}, layer 0 is {:?} with {}",
                    layer,
                    cell.cell_type(),
                    cell.state_width(),
                    cell_type,
                    state_width
                )));
            }
            if cell.hidden_size() != config.hidden_size {
                return Err(DecoderError::Configuration(format!(
                    "layer {} hidden size is {}, expected {}",
                    layer,
                    cell.hidden_size(),
                    config.hidden_size
                )));
            }
            if Some(cell.input_width()) != input_spec.width(layer) {
                return Err(DecoderError::Configuration(format!(
                    "layer {} cell expects input width {}, table says {:?}",
                    layer,
                    cell.input_width(),
                    input_spec.width(layer)
                )));
            }
        }
        if cell_type != config.built_cell_type() {
            return Err(DecoderError::Configuration(format!(
                "{:?} cells supplied, configuration builds {:?}",
                cell_type,
                config.built_cell_type()
            )));
        }
        // Upper layers consume the lower layer's full state; the table was built for it.
        if state_width != config.state_width() {
            return Err(DecoderError::Configuration(format!(
                "{:?} cells have state width {}, configuration implies {}",
                cell_type,
                state_width,
                config.state_width()
            )));
        }

        Ok(Self {
            cells,
            input_spec,
            cell_type,
            hidden_size: config.hidden_size,
            embedding_size: config.embedding_size,
            image_feature_size: config.image_feature_size,
            attention_size: config.attention_size,
            max_generated_length: config.max_generated_length,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.cells.len()
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn embedding_size(&self) -> usize {
        self.embedding_size
    }

    pub fn image_feature_size(&self) -> usize {
        self.image_feature_size
    }

    pub fn attention_size(&self) -> usize {
        self.attention_size
    }

    /// Steps produced by [`DecodeMode::free_running`](crate::DecodeMode::free_running)
    pub fn max_generated_length(&self) -> usize {
        self.max_generated_length
    }

    /// H, or 2H for cells with a memory slice
    pub fn state_width(&self) -> usize {
        self.cell_type.state_width(self.hidden_size)
    }

    pub fn cells(&self) -> &[GateCell] {
        &self.cells
    }

    pub fn input_spec(&self) -> &LayerInputSpec {
        &self.input_spec
    }

    /// All-zero state `[num_layers, batch, state_width]`
    pub fn zero_state(&self, batch: usize) -> Array3<f32> {
        Array3::zeros((self.num_layers(), batch, self.state_width()))
    }

    /// Validate a carried-forward state for `batch` rows
    pub fn check_state(&self, state: &ArrayView3<'_, f32>, batch: usize) -> Result<()> {
        expect_dims3(
            "hidden state",
            state,
            (self.num_layers(), batch, self.state_width()),
        )
    }

    /// Advance every layer by one timestep
    ///
    /// All inputs are validated before any layer is updated.
    pub fn step<A: AttentionScorer + ?Sized>(
        &self,
        image_feature: ArrayView2<'_, f32>,
        token_vec: ArrayView2<'_, f32>,
        prev_state: ArrayView3<'_, f32>,
        attention: &A,
    ) -> Result<Array3<f32>> {
        let batch = image_feature.nrows();
        expect_dims2(
            "image feature",
            &image_feature,
            (batch, self.image_feature_size),
        )?;
        expect_dims2("token embedding", &token_vec, (batch, self.embedding_size))?;
        self.check_state(&prev_state, batch)?;

        let mut next_state = Array3::zeros(prev_state.raw_dim());

        let layer0_input = concat_features(&[image_feature.view(), token_vec.view()])?;
        let updated = self.cells[0].forward(layer0_input.view(), prev_state.index_axis(Axis(0), 0))?;
        next_state.index_axis_mut(Axis(0), 0).assign(&updated);

        for layer in 1..self.cells.len() {
            let below = prev_state.index_axis(Axis(0), layer - 1);
            let score = attention.score(below)?;
            expect_dims2("attention score", &score.view(), (batch, self.attention_size))?;

            let layer_input = concat_features(&[below, score.view()])?;
            let updated = self.cells[layer]
                .forward(layer_input.view(), prev_state.index_axis(Axis(0), layer))?;
            next_state.index_axis_mut(Axis(0), layer).assign(&updated);
        }

        debug!("Decoder step complete (batch={}, layers={})", batch, self.cells.len());
        Ok(next_state)
    }

    /// Visible hidden slice `[batch, H]` of the top layer
    pub fn visible_hidden(&self, state: ArrayView3<'_, f32>) -> Result<Array2<f32>> {
        let batch = state.len_of(Axis(1));
        self.check_state(&state, batch)?;
        let top = state.index_axis(Axis(0), self.num_layers() - 1);
        Ok(top.slice(s![.., ..self.hidden_size]).to_owned())
    }
}
