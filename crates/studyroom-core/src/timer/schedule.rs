use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::Phase;

/// Every 4th completed work interval is followed by a long break.
pub const LONG_BREAK_EVERY: u32 = 4;

/// Canonical phase durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSchedule {
    pub work_secs: u64,
    pub short_break_secs: u64,
    pub long_break_secs: u64,
}

impl PhaseSchedule {
    /// Build a schedule from minute values.
    ///
    /// All durations must be non-zero and the short break must be shorter
    /// than the long break.
    pub fn from_minutes(
        work_min: u64,
        short_break_min: u64,
        long_break_min: u64,
    ) -> Result<Self, ValidationError> {
        Self::from_secs(
            work_min.saturating_mul(60),
            short_break_min.saturating_mul(60),
            long_break_min.saturating_mul(60),
        )
    }

    pub fn from_secs(
        work_secs: u64,
        short_break_secs: u64,
        long_break_secs: u64,
    ) -> Result<Self, ValidationError> {
        for (field, value) in [
            ("work", work_secs),
            ("short_break", short_break_secs),
            ("long_break", long_break_secs),
        ] {
            if value == 0 {
                return Err(ValidationError::InvalidValue {
                    field,
                    message: "duration must be greater than zero".into(),
                });
            }
        }
        if short_break_secs >= long_break_secs {
            return Err(ValidationError::InvalidValue {
                field: "short_break",
                message: "short break must be shorter than long break".into(),
            });
        }
        Ok(Self {
            work_secs,
            short_break_secs,
            long_break_secs,
        })
    }

    /// Canonical duration of `phase` in seconds.
    pub fn duration_secs(&self, phase: Phase) -> u64 {
        match phase {
            Phase::Active => self.work_secs,
            Phase::Break => self.short_break_secs,
            Phase::LongBreak => self.long_break_secs,
            Phase::Finished => 0,
        }
    }
}

impl Default for PhaseSchedule {
    fn default() -> Self {
        Self {
            work_secs: 25 * 60,
            short_break_secs: 5 * 60,
            long_break_secs: 15 * 60,
        }
    }
}

/// Phase that follows `completed`, given the work counter *after* it was
/// advanced for the completed phase.
pub fn next_phase(completed: Phase, active_count: u32) -> Phase {
    match completed {
        Phase::Active if active_count > 0 && active_count % LONG_BREAK_EVERY == 0 => {
            Phase::LongBreak
        }
        Phase::Active => Phase::Break,
        Phase::Break | Phase::LongBreak => Phase::Active,
        Phase::Finished => Phase::Finished,
    }
}
