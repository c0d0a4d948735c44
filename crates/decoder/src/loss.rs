//! Weighted softmax cross-entropy over `[batch, seq, vocab]` logits

use caption_rnn_common::{DecoderError, Result};
use ndarray::{ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

/// Added to the weight total so an all-zero mask yields a finite mean
pub const LOSS_EPSILON: f32 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossOutput {
    /// Σ weight · cross-entropy
    pub sum: f32,
    /// `sum / (Σ weight + ε)`
    pub mean: f32,
}

/// Cross-entropy of every `(batch, step)` position weighted by `weights`
pub fn weighted_cross_entropy(
    logits: ArrayView3<'_, f32>,
    labels: ArrayView2<'_, usize>,
    weights: ArrayView2<'_, f32>,
) -> Result<LossOutput> {
    let (batch, seq_len, vocab_size) = logits.dim();
    if labels.dim() != (batch, seq_len) {
        return Err(DecoderError::shape("loss labels", (batch, seq_len), labels.dim()));
    }
    if weights.dim() != (batch, seq_len) {
        return Err(DecoderError::shape("loss weights", (batch, seq_len), weights.dim()));
    }
    if let Some(&token) = labels.iter().find(|&&t| t >= vocab_size) {
        return Err(DecoderError::InvalidToken { token, vocab_size });
    }

    let mut sum = 0.0f32;
    for (b, row_logits) in logits.axis_iter(Axis(0)).enumerate() {
        for (t, position) in row_logits.axis_iter(Axis(0)).enumerate() {
            let max = position.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
            let log_norm = position.mapv(|v| (v - max).exp()).sum().ln() + max;
            let nll = log_norm - position[labels[[b, t]]];
            sum += nll * weights[[b, t]];
        }
    }

    let mean = sum / (weights.sum() + LOSS_EPSILON);
    Ok(LossOutput { sum, mean })
}
