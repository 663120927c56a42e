//! Configuration for the lineage engine
//!
//! CLI arguments and environment variable handling using clap, and the
//! validated engine settings derived from them.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::resolve::{DEFAULT_MAX_STEPS, ResolverConfig};
use crate::core::types::EntityId;

pub const DEFAULT_TOP_ABSORBERS: usize = 10;

/// What happens to the records of a seed whose resolution halted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HaltedPolicy {
    /// leave them out of the aggregates (conservation will flag the event)
    #[default]
    Exclude,
    /// aggregate them under their own original id
    KeepOriginal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationConfig {
    pub halted_policy: HaltedPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub resolver: ResolverConfig,
    pub aggregation: AggregationConfig,
    pub top_absorbers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resolver: ResolverConfig::default(),
            aggregation: AggregationConfig::default(),
            top_absorbers: DEFAULT_TOP_ABSORBERS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("max steps must be at least 1, got {0}")]
    StepBoundTooSmall(u32),
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolver.max_steps == 0 {
            return Err(ConfigError::StepBoundTooSmall(self.resolver.max_steps));
        }
        Ok(())
    }
}

/// lineage - stable municipal identities for long-running vote series
#[derive(Parser, Debug, Clone)]
#[command(name = "lineage")]
#[command(about = "Resolve municipal lineage and aggregate vote tallies onto stable identities")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LINEAGE_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Resolve, aggregate, validate and write every artifact
    Run(RunArgs),
    /// Show how a single municipality resolves, edge by edge
    Trace(TraceArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct InputArgs {
    /// TOON file holding a `mutations` table
    #[arg(long, env = "LINEAGE_MUTATIONS")]
    pub mutations: PathBuf,

    /// TOON file holding `events` and `records` tables
    #[arg(long, env = "LINEAGE_MEASUREMENTS")]
    pub measurements: PathBuf,

    /// Maximum mutation edges followed per municipality
    #[arg(long, env = "LINEAGE_MAX_STEPS", default_value_t = DEFAULT_MAX_STEPS)]
    pub max_steps: u32,

    /// Treatment of municipalities whose resolution halted
    #[arg(long, env = "LINEAGE_HALTED_POLICY", value_enum, default_value_t = HaltedPolicy::Exclude)]
    pub halted_policy: HaltedPolicy,
}

impl InputArgs {
    pub fn engine_config(&self, top_absorbers: usize) -> EngineConfig {
        EngineConfig {
            resolver: ResolverConfig {
                max_steps: self.max_steps,
            },
            aggregation: AggregationConfig {
                halted_policy: self.halted_policy,
            },
            top_absorbers,
        }
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Output directory for identity map, aggregates, export and report
    #[arg(long, env = "LINEAGE_OUT", default_value = "out")]
    pub out: PathBuf,

    /// Number of most-absorbing identities listed in the quality report
    #[arg(long, env = "LINEAGE_TOP", default_value_t = DEFAULT_TOP_ABSORBERS)]
    pub top: usize,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct TraceArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Municipality number to trace
    #[arg(long)]
    pub entity: EntityId,
}
