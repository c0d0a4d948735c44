//! Sub-networks around the decoder: embedding, image projector, attention MLP
//! and the output layer.

use caption_rnn_common::tensor::{affine, leaky_relu, softmax_rows};
use caption_rnn_decoder::{
    AttentionScorer, DecoderError, ImageFeatureProjector, OutputProjection, Result,
    TokenEmbedder,
};
use ndarray::{Array2, ArrayView2, ArrayView3, Axis};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// `[vocab, E]` lookup table
#[derive(Debug, Clone)]
pub struct EmbeddingTable {
    weight: Array2<f32>,
}

impl EmbeddingTable {
    /// Entries drawn from N(0, 1)
    pub fn new<R: Rng + ?Sized>(vocab_size: usize, embedding_size: usize, rng: &mut R) -> Self {
        let weight: Array2<f32> = Array2::from_shape_fn((vocab_size, embedding_size), |_| {
            StandardNormal.sample(&mut *rng)
        });
        Self { weight }
    }

    pub fn from_weights(weight: Array2<f32>) -> Self {
        Self { weight }
    }

    pub fn vocab_size(&self) -> usize {
        self.weight.nrows()
    }
}

impl TokenEmbedder for EmbeddingTable {
    fn embedding_size(&self) -> usize {
        self.weight.ncols()
    }

    fn embed(&self, tokens: &[usize]) -> Result<Array2<f32>> {
        let vocab_size = self.vocab_size();
        if let Some(&token) = tokens.iter().find(|&&t| t >= vocab_size) {
            return Err(DecoderError::InvalidToken { token, vocab_size });
        }
        Ok(self.weight.select(Axis(0), tokens))
    }
}

/// Dense affine layer `[in] -> [out]`
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Array2<f32>,
    bias: Array2<f32>,
}

impl Linear {
    /// Weights and bias drawn from U(-1/sqrt(in), 1/sqrt(in))
    pub fn new<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (in_features.max(1) as f32).sqrt();
        let weight = Array2::from_shape_fn((in_features, out_features), |_| {
            rng.random_range(-bound..bound)
        });
        let bias = Array2::from_shape_fn((1, out_features), |_| rng.random_range(-bound..bound));
        Self { weight, bias }
    }

    pub fn from_arrays(weight: Array2<f32>, bias: Array2<f32>) -> Result<Self> {
        if bias.dim() != (1, weight.ncols()) {
            return Err(DecoderError::shape("linear bias", (1, weight.ncols()), bias.dim()));
        }
        Ok(Self { weight, bias })
    }

    pub fn in_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn out_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn forward(&self, x: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.in_features() {
            return Err(DecoderError::shape("linear input width", self.in_features(), x.ncols()));
        }
        Ok(affine(&x, &self.weight, &self.bias))
    }
}

impl OutputProjection for Linear {
    fn vocab_size(&self) -> usize {
        self.out_features()
    }

    fn project(&self, hidden: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        self.forward(hidden)
    }
}

/// Inference-mode batch normalisation with running statistics
#[derive(Debug, Clone)]
pub struct BatchNorm {
    running_mean: Array2<f32>,
    running_var: Array2<f32>,
    gamma: Array2<f32>,
    beta: Array2<f32>,
    eps: f32,
}

impl BatchNorm {
    /// Identity statistics: mean 0, variance 1, γ = 1, β = 0
    pub fn new(width: usize, eps: f32) -> Self {
        Self {
            running_mean: Array2::zeros((1, width)),
            running_var: Array2::ones((1, width)),
            gamma: Array2::ones((1, width)),
            beta: Array2::zeros((1, width)),
            eps,
        }
    }

    /// Replace the running statistics; both must be `[1, width]`
    pub fn with_statistics(mut self, mean: Array2<f32>, var: Array2<f32>) -> Result<Self> {
        let dim = self.running_mean.dim();
        if mean.dim() != dim || var.dim() != dim {
            return Err(DecoderError::shape("batch-norm statistics", dim, (mean.dim(), var.dim())));
        }
        self.running_mean = mean;
        self.running_var = var;
        Ok(self)
    }

    /// Replace the learned scale γ and shift β; both must be `[1, width]`
    pub fn with_affine(mut self, gamma: Array2<f32>, beta: Array2<f32>) -> Result<Self> {
        let dim = self.gamma.dim();
        if gamma.dim() != dim || beta.dim() != dim {
            return Err(DecoderError::shape("batch-norm affine", dim, (gamma.dim(), beta.dim())));
        }
        self.gamma = gamma;
        self.beta = beta;
        Ok(self)
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let scale = self.running_var.mapv(|v| 1.0 / (v + self.eps).sqrt()) * &self.gamma;
        (x - &self.running_mean) * &scale + &self.beta
    }
}

/// 1×1 convolution over channels, batch norm, leaky ReLU
#[derive(Debug, Clone)]
pub struct FeatureProjector {
    conv: Linear,
    norm: BatchNorm,
    slope: f32,
}

impl FeatureProjector {
    pub fn new<R: Rng + ?Sized>(
        channels: usize,
        map_size: usize,
        slope: f32,
        eps: f32,
        rng: &mut R,
    ) -> Self {
        Self {
            conv: Linear::new(channels, map_size, rng),
            norm: BatchNorm::new(map_size, eps),
            slope,
        }
    }

    pub fn from_parts(conv: Linear, norm: BatchNorm, slope: f32) -> Self {
        Self { conv, norm, slope }
    }
}

impl ImageFeatureProjector for FeatureProjector {
    fn output_size(&self) -> usize {
        self.conv.out_features()
    }

    /// Only a single spatial position is supported; it is squeezed away.
    fn project_features(&self, features: ArrayView3<'_, f32>) -> Result<Array2<f32>> {
        let (batch, channels, spatial) = features.dim();
        if channels != self.conv.in_features() || spatial != 1 {
            return Err(DecoderError::shape(
                "CNN features",
                (batch, self.conv.in_features(), 1),
                (batch, channels, spatial),
            ));
        }
        let pooled = features.index_axis(Axis(2), 0);
        let mapped = self.conv.forward(pooled)?;
        Ok(leaky_relu(&self.norm.forward(&mapped), self.slope))
    }
}

/// Two-layer MLP with softmax output, scoring a layer state
#[derive(Debug, Clone)]
pub struct AttentionMlp {
    hidden: Linear,
    output: Linear,
    slope: f32,
}

impl AttentionMlp {
    pub fn new<R: Rng + ?Sized>(
        state_width: usize,
        hidden_size: usize,
        output_size: usize,
        slope: f32,
        rng: &mut R,
    ) -> Self {
        Self {
            hidden: Linear::new(state_width, hidden_size, rng),
            output: Linear::new(hidden_size, output_size, rng),
            slope,
        }
    }

    pub fn from_parts(hidden: Linear, output: Linear, slope: f32) -> Result<Self> {
        if hidden.out_features() != output.in_features() {
            return Err(DecoderError::Configuration(format!(
                "attention hidden width {} does not feed output layer width {}",
                hidden.out_features(),
                output.in_features()
            )));
        }
        Ok(Self {
            hidden,
            output,
            slope,
        })
    }
}

impl AttentionScorer for AttentionMlp {
    fn output_size(&self) -> usize {
        self.output.out_features()
    }

    fn score(&self, state: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        let hidden = leaky_relu(&self.hidden.forward(state)?, self.slope);
        let logits = self.output.forward(hidden.view())?;
        Ok(softmax_rows(&logits))
    }
}
