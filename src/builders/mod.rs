//! Builders
//!
//! Fluent builder patterns for pipeline configuration.

pub mod config;

pub use config::{pipeline_config, PipelineConfigBuilder};
