//! Common constants used across all services
//!
//! Single source of truth for tunables that have no better home in a config struct.

// Time constants
pub const MILLIS_PER_SEC: u64 = 1000;
pub const SECS_PER_MIN: u64 = 60;
pub const SECS_PER_HOUR: u64 = 3600;
pub const SECS_PER_DAY: u64 = 86_400;

// Event bus defaults
pub const DEFAULT_BUS_BUFFER_SIZE: usize = 10_000;
pub const DEFAULT_BUS_WORKERS: usize = 4;
pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 1000;
pub const SLOW_DISPATCH_WARN_MS: u64 = 500;

// Retry constants
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 100;

// Shutdown
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5000;

// Candle rules (fractions of the period duration)
/// Share of the period that must be covered by real ticks for a bar to count as real
pub const REAL_CANDLE_COVERAGE: f64 = 0.80;
/// Share of the period after which an open bar is closed on the next tick
pub const EARLY_CLOSE_RATIO: f64 = 0.95;
/// Multiple of the period after which an open bar is considered stale
pub const STALE_CANDLE_MULTIPLIER: i64 = 2;
/// Idle time after which a synthetic bar is closed
pub const SYNTHETIC_IDLE_SECS: i64 = 120;

// Storage defaults
pub const DEFAULT_PRICE_HISTORY_PER_SYMBOL: usize = 10_000;
pub const DEFAULT_CANDLE_HISTORY_DEPTH: usize = 1000;
