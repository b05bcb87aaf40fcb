//! Domain types shared across services

pub mod market;
pub mod signal;

pub use market::{Candle, CandleKey, Period, PriceTick};
pub use signal::{Signal, SignalDirection, SignalMetadata, SignalStrength, SignalType};
