//! Caption RNN: stacked recurrent decoder for image-caption generation
//!
//! Re-exports the workspace crates under one roof:
//! - [`common`]: error taxonomy and batch tensor helpers
//! - [`decoder`]: gate cells, stacked decoder, autoregressive driver, loss
//! - [`generation`]: concrete sub-networks and the assembled caption model

pub use caption_rnn_common as common;
pub use caption_rnn_decoder as decoder;
pub use caption_rnn_generation as generation;
