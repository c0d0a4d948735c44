//! Image caption generation with a stacked recurrent decoder
//!
//! This crate assembles the full captioning model around
//! [`caption_rnn_decoder::StackedDecoder`]:
//! - Image projector: 1×1 convolution + batch norm + leaky ReLU over CNN features
//! - Token embedding table
//! - Attention MLP feeding every layer above the first
//! - Output layer from the top visible hidden state to vocabulary logits
//!
//! # Example
//! ```no_run
//! use caption_rnn_generation::{CaptionConfig, CaptionModel};
//! use ndarray::Array3;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CaptionConfig::from_yaml("config/caption.yaml")?;
//! let model = CaptionModel::new(config)?;
//!
//! let features = Array3::<f32>::zeros((1, model.config().number_of_cnn_features, 1));
//! let captions = model.generate(features.view(), &[1])?;
//! println!("Tokens: {:?}", captions[0]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod layers;
mod model;

use caption_rnn_decoder::DecoderError;
use thiserror::Error;

pub use config::CaptionConfig;
pub use layers::{AttentionMlp, BatchNorm, EmbeddingTable, FeatureProjector, Linear};
pub use model::{truncate_at, CaptionModel};

/// Errors that can occur during caption generation
#[derive(Error, Debug)]
pub enum CaptionError {
    #[error("Decoder error: {0}")]
    Decoder(#[from] DecoderError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_error_conversion() {
        let err: CaptionError = DecoderError::Configuration("bad table".to_string()).into();
        assert!(matches!(err, CaptionError::Decoder(_)));
        assert_eq!(
            err.to_string(),
            "Decoder error: Configuration error: bad table"
        );
    }
}
