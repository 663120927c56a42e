pub mod config;
pub mod core;
pub mod error;
pub mod tables;

pub use crate::config::{EngineConfig, HaltedPolicy};
pub use crate::core::engine::{AnalysisEngine, PublishedResults, RunReport};
pub use crate::error::{Error, Result};
