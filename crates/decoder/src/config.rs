//! Decoder configuration

use caption_rnn_common::{DecoderError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Recurrent cell variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    /// Single affine transform + tanh
    Simple,
    /// Reset/update gating, no memory slice
    Gru,
    /// Input/forget/output gating with a memory slice
    #[default]
    Lstm,
}

impl CellType {
    /// Whether the state carries a memory slice after the visible hidden slice
    #[must_use]
    pub fn has_memory(self) -> bool {
        matches!(self, CellType::Lstm)
    }

    /// Per-layer state width for a given hidden size (H or 2H)
    #[must_use]
    pub fn state_width(self, hidden_size: usize) -> usize {
        if self.has_memory() {
            2 * hidden_size
        } else {
            hidden_size
        }
    }
}

/// Configuration for the stacked decoder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Hidden size H of every layer
    pub hidden_size: usize,
    /// Token embedding width E
    pub embedding_size: usize,
    /// Width F of the preprocessed image feature
    pub image_feature_size: usize,
    /// Width A of the attention score fed into layers above 0
    pub attention_size: usize,
    /// Number of stacked layers
    pub num_layers: usize,
    /// Requested cell variant
    pub cell_type: CellType,
    /// Build `cell_type` instead of always building LSTM cells
    pub honor_cell_type: bool,
    /// Timesteps produced in free-running mode
    pub max_generated_length: usize,
    /// Seed for parameter initialisation
    pub seed: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            hidden_size: 512,
            embedding_size: 300,
            image_feature_size: 512,
            attention_size: 10,
            num_layers: 2,
            cell_type: CellType::Lstm,
            honor_cell_type: false,
            max_generated_length: 40,
            seed: 0,
        }
    }
}

impl DecoderConfig {
    /// Cell variant the decoder actually builds
    ///
    /// Unless `honor_cell_type` is set, this is always [`CellType::Lstm`].
    #[must_use]
    pub fn effective_cell_type(&self) -> CellType {
        if !self.honor_cell_type && self.cell_type != CellType::Lstm {
            warn!(
                "Configured cell type {:?} ignored; stacked decoder always uses LSTM cells",
                self.cell_type
            );
        }
        self.built_cell_type()
    }

    /// State width of the cells that will be built
    #[must_use]
    pub fn state_width(&self) -> usize {
        self.built_cell_type().state_width(self.hidden_size)
    }

    pub(crate) fn built_cell_type(&self) -> CellType {
        if self.honor_cell_type {
            self.cell_type
        } else {
            CellType::Lstm
        }
    }

    /// Reject zero-sized dimensions
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("hidden_size", self.hidden_size),
            ("embedding_size", self.embedding_size),
            ("image_feature_size", self.image_feature_size),
            ("attention_size", self.attention_size),
            ("num_layers", self.num_layers),
            ("max_generated_length", self.max_generated_length),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(DecoderError::Configuration(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }
}
