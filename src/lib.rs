//! civicpulse: delayed, aggregated attention maps from public civic text.
//!
//! A run takes a batch of raw records and walks them through
//! normalize → encode → cluster → score → safety buffer → governance →
//! tier export. Only aggregate, delayed, allow-listed views leave the crate.

pub mod audit;
pub mod buffer;
pub mod clustering;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod export;
pub mod governance;
pub mod pipeline;
pub mod run_lock;
pub mod runner;
pub mod signals;
pub mod util;

pub use config::{load_config, PipelineConfig};
pub use error::PipelineError;
pub use pipeline::{CancellationFlag, Pipeline, RunOutput, RunStats};
