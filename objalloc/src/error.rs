//! Errors raised by the object allocation phase.
//!
//! None of these describe a problem with the program being compiled. Each
//! one means the IR handed to the phase, or the order in which the phase
//! was driven, broke an invariant; the caller should abandon the
//! compilation of that method.

use thiserror::Error;

use crate::ir::{BasicBlockId, LocalId};

/// Errors that can occur while analyzing or rewriting a method.
#[derive(Debug, Error)]
pub enum AllocError {
    #[error("escape analysis has already run for this method")]
    AnalysisAlreadyDone,

    #[error("escape information queried before the analysis ran")]
    AnalysisNotDone,

    #[error("escape analysis requested while object stack allocation is disabled")]
    AnalysisDisabled,

    #[error("allocation in {block} statement {stmt} is not in canonical `local = new T` form")]
    NonCanonicalAllocation { block: BasicBlockId, stmt: usize },

    #[error("{block} contains an allocation but is not flagged as having one")]
    MissingBlockFlag { block: BasicBlockId },

    #[error("unknown local {local}")]
    UnknownLocal { local: LocalId },

    #[error("unknown block {block}")]
    UnknownBlock { block: BasicBlockId },

    #[error("no statement {index} in {block}")]
    UnknownStatement { block: BasicBlockId, index: usize },

    #[error("failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("invalid value {value:?} for environment variable {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AllocError>;
