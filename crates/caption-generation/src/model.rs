//! Full caption model: projector + embedding + stacked decoder + output layer

use caption_rnn_decoder::{
    weighted_cross_entropy, AutoregressiveDriver, DecodeMode, DecodeOutput, DecoderError,
    ImageFeatureProjector, LayerInputSpec, LossOutput, StackedDecoder,
};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::config::CaptionConfig;
use crate::layers::{AttentionMlp, EmbeddingTable, FeatureProjector, Linear};
use crate::CaptionError;

/// Image caption model
#[derive(Debug, Clone)]
pub struct CaptionModel {
    config: CaptionConfig,
    embedding: EmbeddingTable,
    output_layer: Linear,
    feature_projector: FeatureProjector,
    attention: AttentionMlp,
    decoder: StackedDecoder,
}

impl CaptionModel {
    /// Build a model with every parameter initialised from `config.seed`
    pub fn new(config: CaptionConfig) -> Result<Self, CaptionError> {
        config.validate()?;
        let decoder_config = config.decoder_config();
        let mut rng = StdRng::seed_from_u64(config.seed);

        info!(
            "Initialising caption model (vocab: {}, hidden: {}, layers: {}, seed: {})",
            config.vocabulary_size, config.hidden_size, config.num_layers, config.seed
        );

        let embedding = EmbeddingTable::new(config.vocabulary_size, config.embedding_size, &mut rng);
        let output_layer = Linear::new(config.hidden_size, config.vocabulary_size, &mut rng);
        let feature_projector = FeatureProjector::new(
            config.number_of_cnn_features,
            config.feature_map_size,
            config.leaky_relu_slope,
            config.batch_norm_eps,
            &mut rng,
        );
        let attention = AttentionMlp::new(
            decoder_config.state_width(),
            config.attention_hidden_size,
            config.attention_size,
            config.leaky_relu_slope,
            &mut rng,
        );
        let decoder = StackedDecoder::with_rng(
            &decoder_config,
            LayerInputSpec::for_config(&decoder_config),
            &mut rng,
        )?;

        Ok(Self {
            config,
            embedding,
            output_layer,
            feature_projector,
            attention,
            decoder,
        })
    }

    pub fn config(&self) -> &CaptionConfig {
        &self.config
    }

    pub fn decoder(&self) -> &StackedDecoder {
        &self.decoder
    }

    pub fn embedding(&self) -> &EmbeddingTable {
        &self.embedding
    }

    /// Project raw CNN features `[batch, C, 1]` to `[batch, feature_map_size]`
    pub fn project_image(&self, cnn_features: ArrayView3<'_, f32>) -> Result<Array2<f32>, CaptionError> {
        Ok(self.feature_projector.project_features(cnn_features)?)
    }

    /// Run the decoder over `tokens` `[batch, seq]`
    ///
    /// Returns logits `[batch, seq_len, vocab]` and the final state, which can
    /// be passed back as `carried_state` to continue generation.
    pub fn forward(
        &self,
        cnn_features: ArrayView3<'_, f32>,
        tokens: ArrayView2<'_, usize>,
        mode: DecodeMode,
        carried_state: Option<Array3<f32>>,
    ) -> Result<DecodeOutput, CaptionError> {
        let image_feature = self.project_image(cnn_features)?;
        let driver = AutoregressiveDriver::new(
            &self.decoder,
            &self.embedding,
            &self.attention,
            &self.output_layer,
        )?;
        Ok(driver.run(image_feature.view(), tokens, mode, carried_state)?)
    }

    /// Weighted cross-entropy of `logits` against `labels`
    pub fn loss(
        &self,
        logits: ArrayView3<'_, f32>,
        labels: ArrayView2<'_, usize>,
        weights: ArrayView2<'_, f32>,
    ) -> Result<LossOutput, CaptionError> {
        Ok(weighted_cross_entropy(logits, labels, weights)?)
    }

    /// Greedy caption token ids for each image, `max_generated_length` steps long
    pub fn generate(
        &self,
        cnn_features: ArrayView3<'_, f32>,
        seed_tokens: &[usize],
    ) -> Result<Vec<Vec<usize>>, CaptionError> {
        let tokens = Array2::from_shape_vec((seed_tokens.len(), 1), seed_tokens.to_vec())
            .map_err(DecoderError::from)?;
        let mode = DecodeMode::free_running(&self.decoder);
        let output = self.forward(cnn_features, tokens.view(), mode, None)?;

        let captions: Vec<Vec<usize>> = output
            .predicted_tokens
            .rows()
            .into_iter()
            .map(|row| row.to_vec())
            .collect();
        debug!("Generated {} captions", captions.len());
        Ok(captions)
    }
}

/// Tokens before the first `end_token` (all of them if it never appears)
pub fn truncate_at(tokens: &[usize], end_token: usize) -> &[usize] {
    match tokens.iter().position(|&t| t == end_token) {
        Some(end) => &tokens[..end],
        None => tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> CaptionConfig {
        CaptionConfig {
            vocabulary_size: 12,
            embedding_size: 4,
            number_of_cnn_features: 6,
            hidden_size: 5,
            feature_map_size: 7,
            attention_hidden_size: 8,
            max_generated_length: 6,
            seed: 21,
            ..Default::default()
        }
    }

    fn features(batch: usize) -> Array3<f32> {
        Array3::from_shape_fn((batch, 6, 1), |(b, c, _)| ((b + c) % 4) as f32 * 0.5 - 0.5)
    }

    #[test]
    fn test_forward_shapes() {
        let model = CaptionModel::new(tiny_config()).unwrap();
        let tokens = Array2::from_shape_fn((2, 3), |(b, t)| (b + t) % 12);
        let out = model
            .forward(features(2).view(), tokens.view(), DecodeMode::TeacherForced, None)
            .unwrap();
        assert_eq!(out.logits.dim(), (2, 3, 12));
        assert_eq!(out.final_state.dim(), (2, 2, 10));
    }

    #[test]
    fn test_same_seed_same_model_output() {
        let a = CaptionModel::new(tiny_config()).unwrap();
        let b = CaptionModel::new(tiny_config()).unwrap();
        let tokens = Array2::from_elem((1, 2), 3usize);
        let out_a = a
            .forward(features(1).view(), tokens.view(), DecodeMode::TeacherForced, None)
            .unwrap();
        let out_b = b
            .forward(features(1).view(), tokens.view(), DecodeMode::TeacherForced, None)
            .unwrap();
        assert_eq!(out_a.logits, out_b.logits);
    }

    #[test]
    fn test_generate_length_and_vocab_range() {
        let model = CaptionModel::new(tiny_config()).unwrap();
        let captions = model.generate(features(3).view(), &[0, 1, 2]).unwrap();
        assert_eq!(captions.len(), 3);
        for caption in &captions {
            assert_eq!(caption.len(), 6);
            assert!(caption.iter().all(|&t| t < 12));
        }
    }

    #[test]
    fn test_forward_rejects_unknown_seed_token() {
        let model = CaptionModel::new(tiny_config()).unwrap();
        let err = model.generate(features(1).view(), &[12]).unwrap_err();
        assert!(matches!(err, CaptionError::Decoder(_)));
    }

    #[test]
    fn test_loss_on_model_logits() {
        let model = CaptionModel::new(tiny_config()).unwrap();
        let tokens = Array2::from_shape_fn((2, 4), |(b, t)| (3 * b + t) % 12);
        let out = model
            .forward(features(2).view(), tokens.view(), DecodeMode::TeacherForced, None)
            .unwrap();
        let weights = Array2::from_shape_fn((2, 4), |(_, t)| if t < 3 { 1.0 } else { 0.0 });
        let loss = model
            .loss(out.logits.view(), tokens.view(), weights.view())
            .unwrap();
        assert!(loss.sum.is_finite() && loss.sum > 0.0);
        assert!((loss.mean - loss.sum / 6.0).abs() < 1e-5);
    }

    #[test]
    fn test_truncate_at_end_token() {
        assert_eq!(truncate_at(&[4, 7, 2, 9, 2], 2), &[4, 7]);
        assert_eq!(truncate_at(&[4, 7], 2), &[4, 7]);
        assert!(truncate_at(&[2, 5], 2).is_empty());
    }
}
