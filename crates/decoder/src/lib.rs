//! Stacked recurrent decoder for image-caption generation
//!
//! Turns a per-image feature vector into a distribution over vocabulary tokens
//! at each output position.
//!
//! # Components
//! - [`cell`]: the three gate-cell variants (simple, GRU-style, LSTM-style)
//! - [`stack`]: per-layer input-size table and the multi-layer timestep update
//! - [`driver`]: teacher-forced / free-running loop and output assembly
//! - [`loss`]: weighted cross-entropy for training
//!
//! # State layout
//! The hidden state is `[num_layers, batch, state_width]`. Cells without a
//! memory slice use `state_width = H`; LSTM cells use `2H` laid out as
//! `[visible_hidden | memory]`. Only the visible slice leaves the decoder.
//!
//! # Example
//! ```no_run
//! use caption_rnn_decoder::{DecoderConfig, StackedDecoder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DecoderConfig::default();
//! let decoder = StackedDecoder::new(&config)?;
//! let state = decoder.zero_state(4);
//! assert_eq!(state.dim(), (2, 4, 1024));
//! # Ok(())
//! # }
//! ```

pub mod cell;
pub mod collaborators;
pub mod config;
pub mod driver;
pub mod loss;
pub mod stack;

pub use caption_rnn_common::{DecoderError, Result};
pub use cell::{GateCell, GateParams, GruCell, LstmCell, LstmParams, SimpleCell};
pub use collaborators::{AttentionScorer, ImageFeatureProjector, OutputProjection, TokenEmbedder};
pub use config::{CellType, DecoderConfig};
pub use driver::{AutoregressiveDriver, DecodeMode, DecodeOutput};
pub use loss::{weighted_cross_entropy, LossOutput, LOSS_EPSILON};
pub use stack::{LayerInputSpec, StackedDecoder};
