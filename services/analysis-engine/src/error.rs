//! Error types for the analysis engine and signal pipeline

use services_common::StorageError;
use thiserror::Error;

/// Analysis engine errors
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// An analyzer with this name is already registered
    #[error("Analyzer already registered: {0}")]
    DuplicateAnalyzer(String),

    /// No analyzer with this name
    #[error("Analyzer not found: {0}")]
    AnalyzerNotFound(String),

    /// Symbol rejected before analysis
    #[error("Invalid symbol: '{0}'")]
    InvalidSymbol(String),

    /// `start` called on a running engine
    #[error("Analysis engine already running")]
    AlreadyRunning,

    /// `stop` called on a stopped engine
    #[error("Analysis engine not running")]
    NotRunning,

    /// Storage collaborator failed
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Signal pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A processing stage failed
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        /// Stage name
        stage: String,
        /// Source error
        source: anyhow::Error,
    },

    /// `start` called on a running pipeline
    #[error("Signal pipeline already running")]
    AlreadyRunning,

    /// `stop` called on a stopped pipeline
    #[error("Signal pipeline not running")]
    NotRunning,
}

/// Result type for analysis engine operations
pub type EngineResult<T> = std::result::Result<T, AnalysisError>;

/// Result type for signal pipeline operations
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
