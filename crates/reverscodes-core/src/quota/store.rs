//! String-encoded persistence of [`QuotaRecord`].
//!
//! Keys and value formats match what the site writes to `localStorage`, so
//! a record exported from a browser profile loads unchanged:
//!
//! | key                      | value                              |
//! |--------------------------|------------------------------------|
//! | `adBlockDeferrals`       | integer                            |
//! | `adBlockResetDate`       | ISO-8601 UTC, millisecond precision |
//! | `adBlockDeferUntil`      | epoch milliseconds                 |
//! | `adBlockLastModalShown`  | epoch milliseconds                 |

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

use super::record::{QuotaPolicy, QuotaRecord};
use crate::error::DatabaseError;
use crate::storage::KeyValue;

pub const DEFERRALS_KEY: &str = "adBlockDeferrals";
pub const RESET_DATE_KEY: &str = "adBlockResetDate";
pub const DEFER_UNTIL_KEY: &str = "adBlockDeferUntil";
pub const LAST_MODAL_SHOWN_KEY: &str = "adBlockLastModalShown";

/// Loads and saves the quota record over any [`KeyValue`] backend.
///
/// Loading never fails: unreadable or malformed values fall back to
/// defaults, and an elapsed window is rolled over and written back.
pub struct QuotaStore<K> {
    kv: K,
    policy: QuotaPolicy,
}

impl<K: KeyValue> QuotaStore<K> {
    pub fn new(kv: K, policy: QuotaPolicy) -> Self {
        Self { kv, policy }
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }

    pub fn into_inner(self) -> K {
        self.kv
    }

    /// Read the record as of `now`, applying the window-rollover rule.
    pub fn load(&self, now: DateTime<Utc>) -> QuotaRecord {
        let now = now.trunc_subsecs(3);
        let mut dirty = false;

        let deferral_count = match self.read(DEFERRALS_KEY).map(|raw| raw.trim().parse::<i64>()) {
            None => 0,
            Some(Ok(n)) if n < 0 => {
                tracing::warn!(value = n, "negative deferral count, using 0");
                dirty = true;
                0
            }
            Some(Ok(n)) if n > i64::from(self.policy.max_deferrals) => {
                tracing::warn!(value = n, "deferral count above quota, clamping");
                dirty = true;
                self.policy.max_deferrals
            }
            Some(Ok(n)) => n as u32,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "unparsable deferral count, using 0");
                dirty = true;
                0
            }
        };

        let window_reset_at = self
            .read(RESET_DATE_KEY)
            .and_then(|raw| match DateTime::parse_from_rfc3339(raw.trim()) {
                Ok(dt) => Some(dt.with_timezone(&Utc).trunc_subsecs(3)),
                Err(e) => {
                    tracing::warn!(error = %e, "unparsable quota window, starting a new one");
                    None
                }
            })
            .filter(|at| {
                let plausible = *at <= now + self.policy.window;
                if !plausible {
                    tracing::warn!(reset_at = %at, "quota window too far ahead, starting a new one");
                }
                plausible
            });

        let defer_until = self.read_millis(DEFER_UNTIL_KEY).filter(|until| {
            let plausible = *until <= now + self.policy.short_cooldown;
            if !plausible {
                tracing::warn!(defer_until = %until, "cooldown beyond one period, dropping it");
                dirty = true;
            }
            plausible
        });
        // A prompt can only have been shown in the past.
        let last_modal_shown_at = self.read_millis(LAST_MODAL_SHOWN_KEY).filter(|at| {
            let plausible = *at <= now;
            if !plausible {
                tracing::warn!(last_shown = %at, "last prompt in the future, dropping it");
                dirty = true;
            }
            plausible
        });

        let mut record = match window_reset_at {
            Some(window_reset_at) => QuotaRecord {
                deferral_count,
                window_reset_at,
                defer_until,
                last_modal_shown_at,
            },
            None => {
                dirty = true;
                QuotaRecord {
                    defer_until,
                    last_modal_shown_at,
                    ..QuotaRecord::fresh(now, &self.policy)
                }
            }
        };

        if record.roll_over_if_due(now, &self.policy) {
            tracing::info!(reset_at = %record.window_reset_at, "quota window rolled over");
            dirty = true;
        }

        if dirty {
            if let Err(e) = self.save(&record) {
                tracing::warn!(error = %e, "failed to persist swept quota record");
            }
        }
        record
    }

    /// Write the whole record. Last write wins.
    pub fn save(&self, record: &QuotaRecord) -> Result<(), DatabaseError> {
        self.kv
            .kv_set(DEFERRALS_KEY, &record.deferral_count.to_string())?;
        self.kv.kv_set(
            RESET_DATE_KEY,
            &record
                .window_reset_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        )?;
        match record.defer_until {
            Some(until) => self
                .kv
                .kv_set(DEFER_UNTIL_KEY, &until.timestamp_millis().to_string())?,
            None => self.kv.kv_delete(DEFER_UNTIL_KEY)?,
        }
        match record.last_modal_shown_at {
            Some(at) => self
                .kv
                .kv_set(LAST_MODAL_SHOWN_KEY, &at.timestamp_millis().to_string())?,
            None => self.kv.kv_delete(LAST_MODAL_SHOWN_KEY)?,
        }
        Ok(())
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.kv.kv_get(key) {
            Ok(value) => value.filter(|v| !v.trim().is_empty()),
            Err(e) => {
                tracing::warn!(key, error = %e, "quota storage read failed, using default");
                None
            }
        }
    }

    fn read_millis(&self, key: &str) -> Option<DateTime<Utc>> {
        let raw = self.read(key)?;
        match raw.trim().parse::<i64>() {
            Ok(0) => None,
            Ok(ms) => DateTime::from_timestamp_millis(ms),
            Err(e) => {
                tracing::warn!(key, error = %e, "unparsable timestamp, ignoring");
                None
            }
        }
    }
}
