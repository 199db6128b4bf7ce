//! Stopwatch engine: tri-state run control, drift-correcting elapsed time and
//! a limit that notifies and resets.

pub mod clock;
pub mod config;
pub mod engine;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use engine::{LimitNotifier, Snapshot, StopwatchEngine};
pub use timer_core::{format_hms_millis, TimerState, DEFAULT_LIMIT_MS};
