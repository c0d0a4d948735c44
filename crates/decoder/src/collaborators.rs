//! Interfaces of the sub-networks the decoder consumes
//!
//! The decoder only relies on the shape contracts below. Concrete networks
//! live in the caption-generation crate; tests use small hand-written ones.

use caption_rnn_common::Result;
use ndarray::{Array2, ArrayView2, ArrayView3};

/// Token id -> embedding vector lookup
pub trait TokenEmbedder {
    /// Embedding width E
    fn embedding_size(&self) -> usize;

    /// Embed one token per batch row: `[batch] -> [batch, E]`
    fn embed(&self, tokens: &[usize]) -> Result<Array2<f32>>;
}

/// Fixed-width summary of a layer state, fed into the layer above
pub trait AttentionScorer {
    /// Score width A
    fn output_size(&self) -> usize;

    /// `[batch, state_width] -> [batch, A]`
    fn score(&self, state: ArrayView2<'_, f32>) -> Result<Array2<f32>>;
}

/// Visible hidden -> vocabulary logits
pub trait OutputProjection {
    fn vocab_size(&self) -> usize;

    /// `[batch, H] -> [batch, vocab_size]`
    fn project(&self, hidden: ArrayView2<'_, f32>) -> Result<Array2<f32>>;
}

/// Raw CNN features -> one fixed-width vector per image
pub trait ImageFeatureProjector {
    /// Output width F
    fn output_size(&self) -> usize;

    /// `[batch, channels, spatial] -> [batch, F]`
    fn project_features(&self, features: ArrayView3<'_, f32>) -> Result<Array2<f32>>;
}
