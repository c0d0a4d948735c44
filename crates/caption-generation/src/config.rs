//! Caption model configuration and loading

use caption_rnn_decoder::{CellType, DecoderConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::CaptionError;

/// Configuration for the full caption model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionConfig {
    /// Number of tokens in the vocabulary
    pub vocabulary_size: usize,
    /// Token embedding width
    pub embedding_size: usize,
    /// Channels of the raw CNN feature map
    pub number_of_cnn_features: usize,
    /// Hidden size H of every decoder layer
    pub hidden_size: usize,
    /// Number of stacked decoder layers
    pub num_layers: usize,
    /// Requested cell variant (ignored unless `honor_cell_type` is set)
    pub cell_type: CellType,
    /// Build `cell_type` cells instead of always building LSTM cells (default: false)
    pub honor_cell_type: bool,
    /// Width of the projected image feature (default: 512)
    pub feature_map_size: usize,
    /// Hidden width of the attention MLP (default: 50)
    pub attention_hidden_size: usize,
    /// Width of the attention score (default: 10)
    pub attention_size: usize,
    /// Negative slope of the leaky ReLUs (default: 0.01)
    pub leaky_relu_slope: f32,
    /// Batch-norm variance epsilon (default: 1e-5)
    pub batch_norm_eps: f32,
    /// Steps generated in free-running mode (default: 40)
    pub max_generated_length: usize,
    /// Seed for parameter initialisation
    pub seed: u64,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            vocabulary_size: 10_000,
            embedding_size: 300,
            number_of_cnn_features: 2048,
            hidden_size: 512,
            num_layers: 2,
            cell_type: CellType::Lstm,
            honor_cell_type: false,
            feature_map_size: 512,
            attention_hidden_size: 50,
            attention_size: 10,
            leaky_relu_slope: 0.01,
            batch_norm_eps: 1e-5,
            max_generated_length: 40,
            seed: 0,
        }
    }
}

impl CaptionConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml(yaml_path: impl AsRef<Path>) -> Result<Self, CaptionError> {
        let yaml_path = yaml_path.as_ref();
        info!("Loading caption model configuration from {}", yaml_path.display());
        let contents = std::fs::read_to_string(yaml_path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, CaptionError> {
        let config: CaptionConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, CaptionError> {
        let config: CaptionConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject zero sizes and out-of-range scalars
    pub fn validate(&self) -> Result<(), CaptionError> {
        let sizes = [
            ("vocabulary_size", self.vocabulary_size),
            ("embedding_size", self.embedding_size),
            ("number_of_cnn_features", self.number_of_cnn_features),
            ("hidden_size", self.hidden_size),
            ("num_layers", self.num_layers),
            ("feature_map_size", self.feature_map_size),
            ("attention_hidden_size", self.attention_hidden_size),
            ("attention_size", self.attention_size),
            ("max_generated_length", self.max_generated_length),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(CaptionError::InvalidConfig(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        if self.batch_norm_eps.is_nan() || self.batch_norm_eps <= 0.0 {
            return Err(CaptionError::InvalidConfig(
                "batch_norm_eps must be positive".to_string(),
            ));
        }
        if !self.leaky_relu_slope.is_finite() {
            return Err(CaptionError::InvalidConfig(
                "leaky_relu_slope must be finite".to_string(),
            ));
        }
        Ok(())
    }

    /// Settings for the stacked decoder
    #[must_use]
    pub fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            hidden_size: self.hidden_size,
            embedding_size: self.embedding_size,
            image_feature_size: self.feature_map_size,
            attention_size: self.attention_size,
            num_layers: self.num_layers,
            cell_type: self.cell_type,
            honor_cell_type: self.honor_cell_type,
            max_generated_length: self.max_generated_length,
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_caption_config_default() {
        let config = CaptionConfig::default();
        assert_eq!(config.feature_map_size, 512);
        assert_eq!(config.attention_size, 10);
        assert_eq!(config.max_generated_length, 40);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "vocabulary_size: 20\nembedding_size: 6\nhidden_size: 8\ncell_type: gru\nseed: 9"
        )
        .unwrap();

        let config = CaptionConfig::from_yaml(file.path()).unwrap();
        assert_eq!(config.vocabulary_size, 20);
        assert_eq!(config.hidden_size, 8);
        assert_eq!(config.cell_type, CellType::Gru);
        assert_eq!(config.seed, 9);
        assert_eq!(config.num_layers, 2);
    }

    #[test]
    fn test_from_yaml_missing_file() {
        let err = CaptionConfig::from_yaml("/nonexistent/caption.yaml").unwrap_err();
        assert!(matches!(err, CaptionError::Io(_)));
    }

    #[test]
    fn test_from_json_rejects_zero_sizes() {
        let err = CaptionConfig::from_json_str(r#"{"hidden_size": 0}"#).unwrap_err();
        assert!(matches!(err, CaptionError::InvalidConfig(_)));
    }

    #[test]
    fn test_decoder_config_mapping() {
        let config = CaptionConfig {
            feature_map_size: 64,
            hidden_size: 16,
            ..Default::default()
        };
        let decoder = config.decoder_config();
        assert_eq!(decoder.image_feature_size, 64);
        assert_eq!(decoder.hidden_size, 16);
        assert_eq!(decoder.state_width(), 32);
        assert_eq!(decoder.max_generated_length, 40);
    }
}
