//! Deferral manager: turns a "blocked" verdict into an action.
//!
//! Decision order:
//! 1. cooldown running (`now < defer_until`): nothing, resume at `defer_until`
//! 2. quota exhausted: Blocking
//! 3. previous prompt too recent: nothing, resume when the gap ends
//! 4. otherwise: prompt with "maybe later" available
//!
//! Every mutation is a whole-record load, change, save, at the millisecond
//! precision the record is stored with.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::quota::{QuotaPolicy, QuotaRecord, QuotaStore};
use crate::storage::KeyValue;

/// What the gate should do for a blocked visitor right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GateDecision {
    /// Stay quiet; detection resumes on its own at `resume_at`.
    Suppressed { resume_at: DateTime<Utc> },
    /// Quota exhausted: non-dismissable block.
    Block,
    /// Ask, offering `remaining` more deferrals.
    Prompt { remaining: u32 },
}

/// Result of an accepted deferral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deferral {
    pub deferral_count: u32,
    pub remaining: u32,
    pub defer_until: DateTime<Utc>,
}

pub struct DeferralManager<K> {
    store: QuotaStore<K>,
}

impl<K: KeyValue> DeferralManager<K> {
    pub fn new(store: QuotaStore<K>) -> Self {
        Self { store }
    }

    pub fn policy(&self) -> &QuotaPolicy {
        self.store.policy()
    }

    pub fn store(&self) -> &QuotaStore<K> {
        &self.store
    }

    /// Current record, swept for window rollover.
    pub fn record(&self, now: DateTime<Utc>) -> QuotaRecord {
        self.store.load(now)
    }

    /// Step 1 alone: whether the short cooldown means detection should not
    /// even run.
    pub fn cooldown_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.store.load(now).suppressed_until(now)
    }

    pub fn can_defer(&self, now: DateTime<Utc>) -> bool {
        !self.store.load(now).is_exhausted(self.policy())
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> u32 {
        self.store.load(now).remaining(self.policy())
    }

    /// Decide the action for a blocked verdict. A `Prompt` decision records
    /// `last_modal_shown_at = now`.
    pub fn decide(&self, now: DateTime<Utc>) -> GateDecision {
        let now = now.trunc_subsecs(3);
        let mut record = self.store.load(now);
        let decision = self.evaluate(&record, now);
        if let GateDecision::Prompt { .. } = decision {
            record.mark_modal_shown(now);
            self.persist(&record);
        }
        decision
    }

    /// What [`decide`](Self::decide) would answer, without recording a prompt.
    pub fn preview(&self, now: DateTime<Utc>) -> GateDecision {
        let now = now.trunc_subsecs(3);
        self.evaluate(&self.store.load(now), now)
    }

    fn evaluate(&self, record: &QuotaRecord, now: DateTime<Utc>) -> GateDecision {
        let policy = self.policy();
        if let Some(resume_at) = record.suppressed_until(now) {
            return GateDecision::Suppressed { resume_at };
        }
        if record.is_exhausted(policy) {
            return GateDecision::Block;
        }
        if let Some(resume_at) = record.prompt_gap_until(now, policy) {
            return GateDecision::Suppressed { resume_at };
        }
        GateDecision::Prompt {
            remaining: record.remaining(policy),
        }
    }

    /// "Maybe later". `None` when no deferrals are left.
    pub fn record_deferral(&self, now: DateTime<Utc>) -> Option<Deferral> {
        let now = now.trunc_subsecs(3);
        let mut record = self.store.load(now);
        let defer_until = record.record_deferral(now, self.policy())?;
        self.persist(&record);
        tracing::info!(
            deferral_count = record.deferral_count,
            %defer_until,
            "deferral recorded"
        );
        Some(Deferral {
            deferral_count: record.deferral_count,
            remaining: record.remaining(self.policy()),
            defer_until,
        })
    }

    /// A recheck found no blocker: clear the count and any cooldown.
    pub fn reset_after_disable(&self, now: DateTime<Utc>) {
        let mut record = self.store.load(now);
        record.reset_after_disable();
        self.persist(&record);
        tracing::info!("blocker disabled, quota reset");
    }

    fn persist(&self, record: &QuotaRecord) {
        if let Err(e) = self.store.save(record) {
            tracing::warn!(error = %e, "failed to persist quota record");
        }
    }
}
