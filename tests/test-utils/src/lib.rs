//! Test utilities and fixtures for the signal pipeline
//!
//! This module provides shared testing utilities including:
//! - Tick, candle and signal factories
//! - Mock managed services and recording subscribers
//! - rstest fixtures for clocks, stores and buses
//! - Async wait helpers and domain assertions

pub mod assertions;
pub mod factories;
pub mod fixtures;
pub mod helpers;
pub mod mocks;

pub use assertions::*;
pub use factories::*;
pub use fixtures::*;
pub use helpers::*;
pub use mocks::*;
