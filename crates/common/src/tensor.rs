//! Batch tensor helpers
//!
//! All helpers operate on `[batch, features]` matrices. Shape checks return
//! [`DecoderError::Shape`] so callers can validate before doing any arithmetic.

use ndarray::{concatenate, Array2, ArrayView2, ArrayView3, Axis};

use crate::{DecoderError, Result};

/// Concatenate matrices along the feature axis, left to right
pub fn concat_features(parts: &[ArrayView2<'_, f32>]) -> Result<Array2<f32>> {
    if let Some(first) = parts.first() {
        let batch = first.nrows();
        if let Some(bad) = parts.iter().find(|p| p.nrows() != batch) {
            return Err(DecoderError::shape(
                "feature concatenation (batch)",
                batch,
                bad.nrows(),
            ));
        }
    }
    Ok(concatenate(Axis(1), parts)?)
}

/// `input · weight + bias`, with `bias` broadcast from `[1, out]`
pub fn affine(input: &ArrayView2<'_, f32>, weight: &Array2<f32>, bias: &Array2<f32>) -> Array2<f32> {
    input.dot(weight) + bias
}

#[inline]
fn sigmoid_scalar(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// Elementwise logistic sigmoid
pub fn sigmoid(x: &Array2<f32>) -> Array2<f32> {
    x.mapv(sigmoid_scalar)
}

/// Elementwise hyperbolic tangent
pub fn tanh(x: &Array2<f32>) -> Array2<f32> {
    x.mapv(f32::tanh)
}

/// Elementwise leaky ReLU
pub fn leaky_relu(x: &Array2<f32>, slope: f32) -> Array2<f32> {
    x.mapv(|v| if v >= 0.0 { v } else { v * slope })
}

/// Row-wise softmax (max-subtracted)
pub fn softmax_rows(x: &Array2<f32>) -> Array2<f32> {
    let mut out = x.clone();
    for mut row in out.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let total = row.sum();
        row.mapv_inplace(|v| v / total);
    }
    out
}

/// Index of the maximum value in each row. Ties resolve to the lowest index.
pub fn argmax_rows(x: &ArrayView2<'_, f32>) -> Vec<usize> {
    x.rows()
        .into_iter()
        .map(|row| {
            let mut best_idx = 0;
            let mut best = f32::NEG_INFINITY;
            for (idx, &v) in row.iter().enumerate() {
                if v > best {
                    best = v;
                    best_idx = idx;
                }
            }
            best_idx
        })
        .collect()
}

/// Check a `[rows, cols]` matrix against its expected dimensions
pub fn expect_dims2(context: &str, x: &ArrayView2<'_, f32>, expected: (usize, usize)) -> Result<()> {
    if x.dim() != expected {
        return Err(DecoderError::shape(context, expected, x.dim()));
    }
    Ok(())
}

/// Check a `[layers, rows, cols]` tensor against its expected dimensions
pub fn expect_dims3(
    context: &str,
    x: &ArrayView3<'_, f32>,
    expected: (usize, usize, usize),
) -> Result<()> {
    if x.dim() != expected {
        return Err(DecoderError::shape(context, expected, x.dim()));
    }
    Ok(())
}
