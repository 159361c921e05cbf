use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Quota constants.
///
/// A single mechanism: a shorter window (e.g. 2 days) is the same policy
/// with a different `window`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaPolicy {
    /// Deferrals allowed per window.
    pub max_deferrals: u32,
    /// Length of the quota window.
    pub window: Duration,
    /// Suppression period after each deferral.
    pub short_cooldown: Duration,
    /// Minimum spacing between two prompts.
    pub min_modal_gap: Duration,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            max_deferrals: 3,
            window: Duration::days(7),
            short_cooldown: Duration::minutes(10),
            min_modal_gap: Duration::seconds(2),
        }
    }
}

/// Durable deferral state, one per profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub deferral_count: u32,
    pub window_reset_at: DateTime<Utc>,
    pub defer_until: Option<DateTime<Utc>>,
    pub last_modal_shown_at: Option<DateTime<Utc>>,
}

impl QuotaRecord {
    /// A record with no deferrals and a window starting now.
    pub fn fresh(now: DateTime<Utc>, policy: &QuotaPolicy) -> Self {
        Self {
            deferral_count: 0,
            window_reset_at: now + policy.window,
            defer_until: None,
            last_modal_shown_at: None,
        }
    }

    /// Start a new window if the current one has elapsed.
    ///
    /// Returns `true` when the record changed.
    pub fn roll_over_if_due(&mut self, now: DateTime<Utc>, policy: &QuotaPolicy) -> bool {
        if now <= self.window_reset_at {
            return false;
        }
        self.deferral_count = 0;
        self.window_reset_at = now + policy.window;
        true
    }

    /// Deferrals still available in this window.
    pub fn remaining(&self, policy: &QuotaPolicy) -> u32 {
        policy.max_deferrals.saturating_sub(self.deferral_count)
    }

    pub fn is_exhausted(&self, policy: &QuotaPolicy) -> bool {
        self.deferral_count >= policy.max_deferrals
    }

    /// End of the short cooldown, if it is still running at `now`.
    pub fn suppressed_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.defer_until.filter(|until| now < *until)
    }

    /// When the next prompt may appear, if the previous one was too recent.
    pub fn prompt_gap_until(
        &self,
        now: DateTime<Utc>,
        policy: &QuotaPolicy,
    ) -> Option<DateTime<Utc>> {
        let earliest = self.last_modal_shown_at? + policy.min_modal_gap;
        (now < earliest).then_some(earliest)
    }

    /// Count a deferral and start the short cooldown.
    ///
    /// Returns the end of the cooldown, or `None` when the quota is already
    /// exhausted (the record is left untouched).
    pub fn record_deferral(
        &mut self,
        now: DateTime<Utc>,
        policy: &QuotaPolicy,
    ) -> Option<DateTime<Utc>> {
        if self.is_exhausted(policy) {
            return None;
        }
        self.deferral_count += 1;
        let until = now + policy.short_cooldown;
        self.defer_until = Some(until);
        Some(until)
    }

    /// The visitor disabled their blocker: clear the count and the cooldown.
    pub fn reset_after_disable(&mut self) {
        self.deferral_count = 0;
        self.defer_until = None;
    }

    pub fn mark_modal_shown(&mut self, now: DateTime<Utc>) {
        self.last_modal_shown_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn fresh_record_opens_a_week_long_window() {
        let policy = QuotaPolicy::default();
        let record = QuotaRecord::fresh(t0(), &policy);
        assert_eq!(record.deferral_count, 0);
        assert_eq!(record.window_reset_at, t0() + Duration::days(7));
        assert_eq!(record.remaining(&policy), 3);
    }

    #[test]
    fn deferral_saturates_at_max() {
        let policy = QuotaPolicy::default();
        let mut record = QuotaRecord::fresh(t0(), &policy);
        for _ in 0..3 {
            assert!(record.record_deferral(t0(), &policy).is_some());
        }
        assert!(record.is_exhausted(&policy));
        assert_eq!(record.record_deferral(t0(), &policy), None);
        assert_eq!(record.deferral_count, 3);
    }

    #[test]
    fn deferral_sets_ten_minute_cooldown() {
        let policy = QuotaPolicy::default();
        let mut record = QuotaRecord::fresh(t0(), &policy);
        let until = record.record_deferral(t0(), &policy).unwrap();
        assert_eq!(until, t0() + Duration::minutes(10));
        assert_eq!(record.suppressed_until(t0() + Duration::minutes(9)), Some(until));
        assert_eq!(record.suppressed_until(until), None);
    }

    #[test]
    fn rollover_only_after_window_end() {
        let policy = QuotaPolicy::default();
        let mut record = QuotaRecord::fresh(t0(), &policy);
        record.deferral_count = 3;
        let end = record.window_reset_at;

        assert!(!record.roll_over_if_due(end, &policy));
        assert_eq!(record.deferral_count, 3);

        let later = end + Duration::seconds(1);
        assert!(record.roll_over_if_due(later, &policy));
        assert_eq!(record.deferral_count, 0);
        assert_eq!(record.window_reset_at, later + Duration::days(7));
    }

    #[test]
    fn reset_after_disable_clears_count_and_cooldown() {
        let policy = QuotaPolicy::default();
        let mut record = QuotaRecord::fresh(t0(), &policy);
        record.record_deferral(t0(), &policy);
        record.reset_after_disable();
        assert_eq!(record.deferral_count, 0);
        assert_eq!(record.defer_until, None);
    }

    #[test]
    fn prompt_gap_postpones_rapid_reprompts() {
        let policy = QuotaPolicy::default();
        let mut record = QuotaRecord::fresh(t0(), &policy);
        assert_eq!(record.prompt_gap_until(t0(), &policy), None);
        record.mark_modal_shown(t0());
        assert_eq!(
            record.prompt_gap_until(t0() + Duration::seconds(1), &policy),
            Some(t0() + Duration::seconds(2))
        );
        assert_eq!(record.prompt_gap_until(t0() + Duration::seconds(2), &policy), None);
    }
}
