use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use lockward_ir::Type;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("Unknown memory model '{0}' (expected: default)")]
    UnknownMemoryModel(String),
}

/// How memory regions and access offsets are typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryModel {
    /// Regions are `[int]int` maps with `int` offsets.
    #[default]
    Default,
}

impl MemoryModel {
    pub fn offset_type(self) -> Type {
        match self {
            MemoryModel::Default => Type::Int,
        }
    }
}

impl fmt::Display for MemoryModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryModel::Default => write!(f, "default"),
        }
    }
}

impl FromStr for MemoryModel {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(MemoryModel::Default),
            other => Err(OptionsError::UnknownMemoryModel(other.to_string())),
        }
    }
}

/// Options for the instrumentation pipeline.
///
/// Passed by reference to every pass; nothing reads configuration from
/// global state.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Share one existential constant across sites guarding the same fact.
    pub merge_existentials: bool,
    /// Record a `PassProfile` for every pass and entry point.
    pub measure_pass_time: bool,
    pub memory_model: MemoryModel,
    /// Metadata role tag of the designated init routine.
    pub init_role: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            merge_existentials: true,
            measure_pass_time: false,
            memory_model: MemoryModel::Default,
            init_role: "probe".to_string(),
        }
    }
}
