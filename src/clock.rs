use chrono::NaiveDateTime;

/// Source of the current instant for lifecycle transitions.
///
/// All timestamps written to notification records flow through a `Clock`
/// instead of ambient `Utc::now()` calls, so retry scheduling and engagement
/// timestamps are deterministic under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Production clock backed by the system time (UTC).
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Clock pinned to a fixed instant.
    pub struct FixedClock(pub NaiveDateTime);

    impl Clock for FixedClock {
        fn now(&self) -> NaiveDateTime {
            self.0
        }
    }
}
