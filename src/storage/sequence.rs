use chrono::{DateTime, NaiveDate, Utc};

use crate::contracts::{CounterStore, CounterTx, SequenceError, SequenceType};

/// Per-type counter digit widths. The defaults match the front desk's
/// conventions (3 digits for medical record numbers, 6 for registrations)
/// but are a configurable mapping, not constants baked into call sites.
#[derive(Debug, Clone, Copy)]
pub struct SequenceFormat {
    medical_record_width: usize,
    registration_width: usize,
}

impl Default for SequenceFormat {
    fn default() -> Self {
        Self {
            medical_record_width: 3,
            registration_width: 6,
        }
    }
}

impl SequenceFormat {
    pub fn new(medical_record_width: usize, registration_width: usize) -> Self {
        Self {
            medical_record_width,
            registration_width,
        }
    }

    /// Creates a format from environment variables.
    ///
    /// Environment variables:
    /// - `FRONTDESK_RM_WIDTH`: medical record counter digits (default: 3)
    /// - `FRONTDESK_REG_WIDTH`: registration counter digits (default: 6)
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            medical_record_width: std::env::var("FRONTDESK_RM_WIDTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|w| *w > 0)
                .unwrap_or(default.medical_record_width),
            registration_width: std::env::var("FRONTDESK_REG_WIDTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|w| *w > 0)
                .unwrap_or(default.registration_width),
        }
    }

    pub fn width(&self, seq_type: SequenceType) -> usize {
        match seq_type {
            SequenceType::MedicalRecord => self.medical_record_width,
            SequenceType::Registration => self.registration_width,
        }
    }

    /// Largest counter value that still fits in the configured width.
    pub fn capacity(&self, seq_type: SequenceType) -> u64 {
        10u64
            .checked_pow(self.width(seq_type).min(19) as u32)
            .map(|p| p - 1)
            .unwrap_or(u64::MAX)
    }

    /// Renders a code as `YYMMDD` + zero-padded counter. A counter that does
    /// not fit in the configured width is an overflow error rather than a
    /// silently longer code; the caller's transaction rolls back, so the
    /// counter value is not burned.
    pub fn render(
        &self,
        seq_type: SequenceType,
        date: NaiveDate,
        counter: u64,
    ) -> Result<String, SequenceError> {
        let width = self.width(seq_type);
        if counter > self.capacity(seq_type) {
            return Err(SequenceError::Overflow {
                seq_type: seq_type.tag(),
                counter,
                width,
            });
        }
        Ok(format!(
            "{}{:0width$}",
            date.format("%y%m%d"),
            counter,
            width = width
        ))
    }
}

/// Issues date-prefixed daily sequence codes.
///
/// The generator owns no storage; callers inject a transaction handle
/// (`issue`) or a counter store (`issue_standalone`). No two calls for the
/// same type on the same UTC day ever return the same code, and committed
/// counters for a (date, type) pair form a dense sequence starting at 1.
#[derive(Debug, Clone, Default)]
pub struct DailySequenceGenerator {
    format: SequenceFormat,
}

impl DailySequenceGenerator {
    pub fn new(format: SequenceFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> &SequenceFormat {
        &self.format
    }

    /// Issues the next code for `seq_type` inside the caller's transaction.
    ///
    /// Only the UTC calendar date of `now` matters; time-of-day is discarded,
    /// and a transaction spanning midnight keeps the date computed here. The
    /// generator never commits or rolls back `tx` — if the surrounding work
    /// fails, the caller's rollback also reverts the counter increment.
    pub fn issue(
        &self,
        seq_type: SequenceType,
        now: DateTime<Utc>,
        tx: &dyn CounterTx,
    ) -> Result<String, SequenceError> {
        let date = now.date_naive();
        let counter = tx.increment(date, seq_type)?;
        self.format.render(seq_type, date, counter)
    }

    /// Issues a code outside any caller-managed transaction.
    ///
    /// Opens a scoped transaction on `store`, delegates to [`issue`], commits
    /// on success and rolls back on any error. The committed increment is
    /// permanent even if the caller's subsequent work fails — standalone
    /// issuance can leave gaps, which is accepted behavior.
    ///
    /// [`issue`]: DailySequenceGenerator::issue
    pub fn issue_standalone<S: CounterStore>(
        &self,
        seq_type: SequenceType,
        now: DateTime<Utc>,
        store: &S,
    ) -> Result<String, SequenceError> {
        store.with_counter_tx(|tx| self.issue(seq_type, now, tx))
    }
}
