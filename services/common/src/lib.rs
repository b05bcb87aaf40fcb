//! Shared building blocks for the market signal pipeline
//!
//! Every service in the workspace depends on this crate for:
//! - Domain types (ticks, periods, candles, signals)
//! - The publish/subscribe event bus and its middleware
//! - Storage contracts and the in-memory reference stores
//! - The lifecycle contract implemented by every managed service

pub mod clock;
pub mod constants;
pub mod errors;
pub mod event_bus;
pub mod lifecycle;
pub mod logging;
pub mod storage;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use constants::*;
pub use errors::*;
pub use event_bus::*;
pub use lifecycle::{ManagedService, ServiceState};
pub use logging::{LoggingConfig, init_tracing};
pub use storage::{
    CandleStorage, MemoryCandleStorage, MemoryPriceStorage, PriceStorage, StorageResult,
};
pub use types::*;
