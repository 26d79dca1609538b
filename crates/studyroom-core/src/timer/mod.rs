mod registry;
mod schedule;

pub use registry::{TickOutcome, TimerHandle, TimerRegistry};
pub use schedule::{next_phase, PhaseSchedule, LONG_BREAK_EVERY};
