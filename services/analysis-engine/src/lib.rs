//! Analysis Engine Service
//!
//! Turns candle history into trading signals:
//! - Registry of pluggable analyzers (price change, volume spike, momentum)
//! - Ordered filter chain (confidence, volume, per-direction rate limit)
//! - Scheduled and event-driven analysis runs publishing `signal_detected`
//! - Signal pipeline normalizing detected signals into `signal_filtered`

pub mod analyzers;
pub mod config;
pub mod engine;
pub mod error;
pub mod filters;
pub mod pipeline;

pub use analyzers::{
    Analyzer, AnalyzerFactory, MomentumAnalyzer, PriceChangeAnalyzer, VolumeSpikeAnalyzer,
};
pub use config::{
    AnalysisConfig, AnalyzerConfig, FilterConfig, SettingValue, SignalPipelineConfig,
};
pub use engine::{AnalysisEngine, AnalysisResult, AnalysisStats};
pub use error::{AnalysisError, EngineResult, PipelineError, PipelineResult};
pub use filters::{ConfidenceFilter, RateLimitFilter, SignalFilter, VolumeFilter, default_filters};
pub use pipeline::{
    EnrichmentStage, PipelineStats, SignalPipeline, SignalStage, SlidingWindowLimiter,
    ValidationStage,
};
