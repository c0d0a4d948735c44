//! Autoregressive decoding loop
//!
//! Runs [`StackedDecoder::step`] once per timestep, chooses the next token
//! embedding according to the [`DecodeMode`], and stacks the per-step logits
//! into `[batch, seq_len, vocab_size]`.

use caption_rnn_common::tensor::{argmax_rows, expect_dims2};
use caption_rnn_common::{DecoderError, Result};
use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collaborators::{AttentionScorer, OutputProjection, TokenEmbedder};
use crate::stack::StackedDecoder;

/// How the next step's input token is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    /// Feed ground-truth token `k` at step `k`; length = number of token columns
    TeacherForced,
    /// Feed the arg-max of the previous step's logits for `max_length` steps
    FreeRunning { max_length: usize },
}

impl DecodeMode {
    /// Free-running for the decoder's configured `max_generated_length` steps
    #[must_use]
    pub fn free_running(decoder: &StackedDecoder) -> Self {
        DecodeMode::FreeRunning {
            max_length: decoder.max_generated_length(),
        }
    }
}

/// Result of one decode call
#[derive(Debug, Clone)]
pub struct DecodeOutput {
    /// `[batch, seq_len, vocab_size]` in timestep order
    pub logits: Array3<f32>,
    /// State after the last step; pass back in to continue decoding
    pub final_state: Array3<f32>,
    /// Greedy arg-max token of every step, `[batch, seq_len]`
    pub predicted_tokens: Array2<usize>,
}

impl DecodeOutput {
    pub fn seq_len(&self) -> usize {
        self.logits.len_of(Axis(1))
    }
}

/// Drives a [`StackedDecoder`] with its collaborators
pub struct AutoregressiveDriver<'a, E: ?Sized, A: ?Sized, P: ?Sized> {
    decoder: &'a StackedDecoder,
    embedder: &'a E,
    attention: &'a A,
    projection: &'a P,
}

impl<'a, E, A, P> AutoregressiveDriver<'a, E, A, P>
where
    E: TokenEmbedder + ?Sized,
    A: AttentionScorer + ?Sized,
    P: OutputProjection + ?Sized,
{
    /// Pair a decoder with its collaborators, checking their widths agree
    pub fn new(
        decoder: &'a StackedDecoder,
        embedder: &'a E,
        attention: &'a A,
        projection: &'a P,
    ) -> Result<Self> {
        if embedder.embedding_size() != decoder.embedding_size() {
            return Err(DecoderError::Configuration(format!(
                "embedding width {} does not match decoder embedding size {}",
                embedder.embedding_size(),
                decoder.embedding_size()
            )));
        }
        if decoder.num_layers() > 1 && attention.output_size() != decoder.attention_size() {
            return Err(DecoderError::Configuration(format!(
                "attention width {} does not match decoder attention size {}",
                attention.output_size(),
                decoder.attention_size()
            )));
        }
        Ok(Self {
            decoder,
            embedder,
            attention,
            projection,
        })
    }

    /// Decode a sequence
    ///
    /// `tokens` is `[batch, seq]`. In teacher-forced mode every column is fed
    /// in turn; in free-running mode only column 0 (the seed token) is read.
    /// `initial_state` is used verbatim when given, otherwise decoding starts
    /// from zeros.
    pub fn run(
        &self,
        image_feature: ArrayView2<'_, f32>,
        tokens: ArrayView2<'_, usize>,
        mode: DecodeMode,
        initial_state: Option<Array3<f32>>,
    ) -> Result<DecodeOutput> {
        let batch = image_feature.nrows();
        if tokens.nrows() != batch {
            return Err(DecoderError::shape("token batch", batch, tokens.nrows()));
        }
        if tokens.ncols() == 0 {
            return Err(DecoderError::shape("token sequence", "at least 1 column", 0));
        }

        let seq_len = match mode {
            DecodeMode::TeacherForced => tokens.ncols(),
            DecodeMode::FreeRunning { max_length } => max_length,
        };
        if seq_len == 0 {
            return Err(DecoderError::Configuration(
                "free-running decode needs max_length > 0".to_string(),
            ));
        }

        let mut state = match initial_state {
            Some(state) => {
                self.decoder.check_state(&state.view(), batch)?;
                state
            }
            None => self.decoder.zero_state(batch),
        };

        debug!("Decoding {} steps ({:?}, batch={})", seq_len, mode, batch);

        let vocab_size = self.projection.vocab_size();
        let mut logits = Array3::zeros((batch, seq_len, vocab_size));
        let mut predicted_tokens = Array2::zeros((batch, seq_len));

        let seed: Vec<usize> = tokens.column(0).to_vec();
        let mut token_vec = self.embedder.embed(&seed)?;

        for step in 0..seq_len {
            let next_state =
                self.decoder
                    .step(image_feature, token_vec.view(), state.view(), self.attention)?;
            let hidden = self.decoder.visible_hidden(next_state.view())?;
            let step_logits = self.projection.project(hidden.view())?;
            expect_dims2("step logits", &step_logits.view(), (batch, vocab_size))?;

            let next_tokens = argmax_rows(&step_logits.view());
            debug!("Step {}: arg-max tokens {:?}", step, next_tokens);

            logits.index_axis_mut(Axis(1), step).assign(&step_logits);
            predicted_tokens
                .column_mut(step)
                .assign(&Array1::from(next_tokens.clone()));
            state = next_state;

            if step + 1 < seq_len {
                token_vec = match mode {
                    DecodeMode::TeacherForced => {
                        let column: Vec<usize> = tokens.column(step + 1).to_vec();
                        self.embedder.embed(&column)?
                    }
                    DecodeMode::FreeRunning { .. } => self.embedder.embed(&next_tokens)?,
                };
            }
        }

        Ok(DecodeOutput {
            logits,
            final_state: state,
            predicted_tokens,
        })
    }
}
