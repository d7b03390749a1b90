//! Scheduling core: schedule strategies, the tick loop, and the control
//! surface used by the API and CLI.

pub mod clock;
mod control;
pub mod engine;
pub mod strategy;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::control::Scheduler;
pub use self::engine::{SchedulerEngine, TickReport};
