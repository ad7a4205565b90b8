//! Global audit write gate.
//!
//! One shared window across every identity and outcome: after a write,
//! nothing else is logged until the window has strictly elapsed.

use crate::audit::{AuditRecord, AuditSink, AuditWriteError};
use crate::policy::AccessDecision;
use std::time::{Duration, Instant};

pub const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(5);

pub struct RateLimitedLogger<S> {
    sink: S,
    interval: Duration,
    /// `None` until the first successful write, so the first candidate always passes.
    last_log_time: Option<Instant>,
}

impl<S: AuditSink> RateLimitedLogger<S> {
    pub fn new(sink: S) -> Self {
        Self::with_interval(sink, DEFAULT_LOG_INTERVAL)
    }

    pub fn with_interval(sink: S, interval: Duration) -> Self {
        Self {
            sink,
            interval,
            last_log_time: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_log_time(&self) -> Option<Instant> {
        self.last_log_time
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// True if a write at `now` would pass the gate.
    pub fn permits(&self, now: Instant) -> bool {
        match self.last_log_time {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.interval,
        }
    }

    /// Append the decision if the window allows it.
    ///
    /// Returns `Ok(true)` when a row was written. Frame-level outcomes
    /// (no face, multiple faces) are never written. A failed append leaves
    /// the window untouched so the next candidate is tried straight away.
    pub fn maybe_log(
        &mut self,
        decision: &AccessDecision,
        now: Instant,
    ) -> Result<bool, AuditWriteError> {
        let Some(record) = AuditRecord::from_decision(decision) else {
            return Ok(false);
        };

        if !self.permits(now) {
            tracing::trace!(status = %record.access_status, "audit write suppressed by rate limit");
            return Ok(false);
        }

        self.sink.append(&record)?;
        self.last_log_time = Some(now);

        tracing::info!(
            person = %record.person_name,
            status = %record.access_status,
            confidence = record.confidence,
            "access logged"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::AccessStatus;

    #[derive(Default)]
    struct MemorySink {
        rows: Vec<AuditRecord>,
        fail: bool,
    }

    impl AuditSink for MemorySink {
        fn append(&mut self, record: &AuditRecord) -> Result<(), AuditWriteError> {
            if self.fail {
                return Err(AuditWriteError::Unavailable("backend down".into()));
            }
            self.rows.push(record.clone());
            Ok(())
        }
    }

    fn decision(status: AccessStatus, name: &str) -> AccessDecision {
        AccessDecision {
            status,
            name: Some(name.into()),
            confidence: Some(0.8),
            faces: 1,
        }
    }

    fn secs(s: f32) -> Duration {
        Duration::from_secs_f32(s)
    }

    #[test]
    fn test_writes_at_zero_and_six_not_three() {
        let start = Instant::now();
        let mut logger = RateLimitedLogger::new(MemorySink::default());
        let granted = decision(AccessStatus::Granted, "alice");

        assert!(logger.maybe_log(&granted, start).unwrap());
        assert!(!logger.maybe_log(&granted, start + secs(3.0)).unwrap());
        assert!(logger.maybe_log(&granted, start + secs(6.0)).unwrap());

        assert_eq!(logger.sink().rows.len(), 2);
        assert_eq!(logger.last_log_time(), Some(start + secs(6.0)));
    }

    #[test]
    fn test_exactly_interval_is_suppressed() {
        let start = Instant::now();
        let mut logger = RateLimitedLogger::new(MemorySink::default());
        let granted = decision(AccessStatus::Granted, "alice");

        assert!(logger.maybe_log(&granted, start).unwrap());
        assert!(!logger
            .maybe_log(&granted, start + Duration::from_secs(5))
            .unwrap());
        assert!(logger
            .maybe_log(&granted, start + Duration::from_millis(5001))
            .unwrap());
    }

    #[test]
    fn test_gate_is_shared_across_identities() {
        let start = Instant::now();
        let mut logger = RateLimitedLogger::new(MemorySink::default());

        assert!(logger
            .maybe_log(&decision(AccessStatus::Granted, "alice"), start)
            .unwrap());
        assert!(!logger
            .maybe_log(&decision(AccessStatus::Granted, "bob"), start + secs(1.0))
            .unwrap());
        assert!(!logger
            .maybe_log(&decision(AccessStatus::Denied, "Unknown"), start + secs(2.0))
            .unwrap());

        assert_eq!(logger.sink().rows.len(), 1);
        assert_eq!(logger.sink().rows[0].person_name, "alice");
    }

    #[test]
    fn test_frame_level_outcomes_never_written() {
        let mut logger = RateLimitedLogger::new(MemorySink::default());
        let now = Instant::now();

        assert!(!logger.maybe_log(&AccessDecision::no_face(), now).unwrap());
        assert!(!logger.maybe_log(&AccessDecision::multi_face(2), now).unwrap());
        assert!(logger.sink().rows.is_empty());
        assert_eq!(logger.last_log_time(), None);
    }

    #[test]
    fn test_failed_write_keeps_window_open() {
        let start = Instant::now();
        let mut logger = RateLimitedLogger::new(MemorySink {
            rows: Vec::new(),
            fail: true,
        });
        let granted = decision(AccessStatus::Granted, "alice");

        assert!(logger.maybe_log(&granted, start).is_err());
        assert_eq!(logger.last_log_time(), None);
        assert!(logger.permits(start + secs(1.0)));
    }

    #[test]
    fn test_custom_interval() {
        let start = Instant::now();
        let mut logger = RateLimitedLogger::with_interval(MemorySink::default(), secs(1.0));
        let denied = decision(AccessStatus::Denied, "Unknown");

        assert!(logger.maybe_log(&denied, start).unwrap());
        assert!(logger.maybe_log(&denied, start + secs(1.5)).unwrap());
        assert_eq!(logger.interval(), secs(1.0));
    }
}
