use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

/// Process-wide usage-limit gate.
///
/// When an AI provider signals rate exhaustion, the orchestrator records an
/// absolute expiry instant here. While the deadline lies in the future, async
/// transitions are skipped; sync transitions keep executing. Reads are
/// lock-protected snapshots; an expired deadline is cleared on read.
#[derive(Clone, Default)]
pub struct UsageLimiter {
    inner: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl UsageLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a deadline. A later deadline replaces an earlier one; an
    /// earlier one is ignored.
    pub fn set_limited_until(&self, until: DateTime<Utc>) {
        let mut cell = self.inner.lock().expect("usage limit lock poisoned");
        match *cell {
            Some(existing) if existing >= until => {}
            _ => {
                tracing::warn!(until = %until, "usage limit engaged");
                *cell = Some(until);
            }
        }
    }

    /// Drop the gate regardless of deadline.
    pub fn clear(&self) {
        let mut cell = self.inner.lock().expect("usage limit lock poisoned");
        if cell.take().is_some() {
            tracing::info!("usage limit cleared");
        }
    }

    /// True while the deadline lies in the future.
    pub fn is_limited(&self) -> bool {
        let mut cell = self.inner.lock().expect("usage limit lock poisoned");
        match *cell {
            Some(until) if until > Utc::now() => true,
            Some(_) => {
                // Deadline elapsed; normal operation resumes.
                *cell = None;
                false
            }
            None => false,
        }
    }

    /// The current deadline, if one is set (expired or not).
    pub fn limited_until(&self) -> Option<DateTime<Utc>> {
        *self.inner.lock().expect("usage limit lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn future_deadline_gates() {
        let gate = UsageLimiter::new();
        assert!(!gate.is_limited());

        gate.set_limited_until(Utc::now() + Duration::minutes(10));
        assert!(gate.is_limited());

        gate.clear();
        assert!(!gate.is_limited());
    }

    #[test]
    fn past_deadline_clears_on_read() {
        let gate = UsageLimiter::new();
        gate.set_limited_until(Utc::now() - Duration::seconds(1));
        assert!(!gate.is_limited());
        assert_eq!(gate.limited_until(), None);
    }

    #[test]
    fn earlier_deadline_does_not_shrink_gate() {
        let gate = UsageLimiter::new();
        let far = Utc::now() + Duration::minutes(30);
        gate.set_limited_until(far);
        gate.set_limited_until(Utc::now() + Duration::minutes(1));
        assert_eq!(gate.limited_until(), Some(far));
    }
}
