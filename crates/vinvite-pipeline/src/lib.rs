//! Background image pipeline for the invite generator.
//!
//! This crate provides:
//! - The stage list (extraction, generation, evaluation, background removal)
//!   with per-stage timeouts and attempt budgets
//! - The single-run pipeline state machine with cache short-circuit
//! - Synchronous status observers with drop-to-unsubscribe handles
//! - Structured run logging

pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod observer;
pub mod pipeline;
pub mod stage;

pub use backend::GenerationBackend;
pub use config::{PipelineConfig, PipelineOptions, StageLimits};
pub use error::{PipelineError, PipelineResult};
pub use logging::RunLogger;
pub use observer::Subscription;
pub use pipeline::ImagePipeline;
pub use stage::{run_stage, Stage, StageSpec};
