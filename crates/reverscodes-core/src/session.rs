//! Gate session: one page load's worth of detection, quota and modal state.
//!
//! Lifecycle is `new → run → dispose`. The shell calls [`GateSession::run`]
//! once the page is ready, forwards button presses to the `on_*` methods,
//! renders the drained [`GateEvent`]s, and awaits
//! [`GateSession::run_scheduled`] so a deferred visitor sees the prompt
//! again exactly when the cooldown ends.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::detection::{DetectionEngine, DetectionVerdict};
use crate::events::GateEvent;
use crate::manager::{DeferralManager, GateDecision};
use crate::presentation::{ModalController, ModalState, Transition};
use crate::storage::KeyValue;

/// Slack added to a scheduled resume so it lands after the cooldown.
const RESUME_SLACK: Duration = Duration::from_millis(50);

pub struct GateSession<K> {
    engine: DetectionEngine,
    manager: DeferralManager<K>,
    modal: ModalController,
    clock: Arc<dyn Clock>,
    resume_at: Option<DateTime<Utc>>,
    events: Vec<GateEvent>,
    disposed: bool,
}

impl<K: KeyValue> GateSession<K> {
    pub fn new(engine: DetectionEngine, manager: DeferralManager<K>, clock: Arc<dyn Clock>) -> Self {
        Self {
            engine,
            manager,
            modal: ModalController::new(),
            clock,
            resume_at: None,
            events: Vec::new(),
            disposed: false,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn modal_state(&self) -> ModalState {
        self.modal.state()
    }

    pub fn modal(&self) -> &ModalController {
        &self.modal
    }

    pub fn manager(&self) -> &DeferralManager<K> {
        &self.manager
    }

    /// When detection will resume by itself, if scheduled.
    pub fn resume_at(&self) -> Option<DateTime<Utc>> {
        self.resume_at
    }

    pub fn content_interaction_disabled(&self) -> bool {
        self.modal.content_interaction_disabled()
    }

    pub fn drain_events(&mut self) -> Vec<GateEvent> {
        std::mem::take(&mut self.events)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// One detection cycle, as on page load.
    pub async fn run(&mut self) {
        if self.disposed {
            return;
        }
        self.resume_at = None;

        let now = self.clock.now();
        if let Some(until) = self.manager.cooldown_until(now) {
            tracing::debug!(%until, "inside deferral cooldown, skipping detection");
            self.schedule_resume(until);
            return;
        }
        if self.modal.is_presented() {
            tracing::debug!(state = ?self.modal.state(), "modal up, skipping detection");
            return;
        }

        let verdict = self.engine.detect().await;
        self.record_verdict(&verdict);
        if verdict.blocked {
            self.apply_decision();
        }
    }

    /// Wait for the scheduled resume, then run again.
    ///
    /// Returns `false` immediately when nothing is scheduled.
    pub async fn run_scheduled(&mut self) -> bool {
        let Some(at) = self.resume_at else {
            return false;
        };
        let wait = (at - self.clock.now()).to_std().unwrap_or_default() + RESUME_SLACK;
        tokio::time::sleep(wait).await;
        self.run().await;
        true
    }

    /// Stop reacting: scheduled resumes are dropped and actions become no-ops.
    pub fn dispose(&mut self) {
        self.disposed = true;
        self.resume_at = None;
    }

    // ── Presentation actions ─────────────────────────────────────────

    /// "Disable ad blocker": show how.
    pub fn on_disable_chosen(&mut self) {
        if self.disposed || self.modal.state() != ModalState::AwaitingChoice {
            return;
        }
        let can_defer = self.modal.can_defer();
        let t = self.modal.show_instructions(can_defer);
        self.emit_transition(t);
    }

    /// "Maybe later".
    pub fn on_defer_chosen(&mut self) {
        if self.disposed || !self.modal.accepts_input() || !self.modal.can_defer() {
            tracing::debug!(state = ?self.modal.state(), "defer not available");
            return;
        }
        self.defer();
    }

    /// "I disabled it, recheck".
    pub async fn on_recheck_chosen(&mut self) {
        if self.disposed {
            return;
        }
        match self.modal.state() {
            ModalState::Blocking => {
                // Blocking is left only through a full reload.
                let at = self.clock.now();
                self.events.push(GateEvent::ReloadRequested { at });
                return;
            }
            ModalState::AwaitingChoice | ModalState::ShowingDisableInstructions => {}
            ModalState::Hidden | ModalState::Rechecking => return,
        }

        let t = self.modal.begin_recheck();
        self.emit_transition(t);

        let limit = self.engine.settings().recheck_timeout;
        let verdict = match tokio::time::timeout(limit, self.engine.detect()).await {
            Ok(verdict) => verdict,
            Err(_) => {
                tracing::warn!(?limit, "recheck timed out, assuming still blocked");
                DetectionVerdict::assumed_blocked()
            }
        };
        self.record_verdict(&verdict);

        let now = self.clock.now();
        if verdict.blocked {
            let can_defer = self.manager.can_defer(now);
            let t = self.modal.show_instructions(can_defer);
            self.emit_transition(t);
        } else {
            self.manager.reset_after_disable(now);
            self.resume_at = None;
            self.events.push(GateEvent::QuotaReset { at: now });
            let t = self.modal.hide();
            self.emit_transition(t);
            self.events.push(GateEvent::ReloadRequested { at: now });
        }
    }

    /// The instructions were closed without rechecking.
    ///
    /// Counts as a deferral while quota remains; otherwise the gate blocks.
    pub fn on_disable_instructions_dismissed(&mut self) {
        if self.disposed || self.modal.state() != ModalState::ShowingDisableInstructions {
            return;
        }
        if self.manager.can_defer(self.clock.now()) {
            self.defer();
        } else {
            let t = self.modal.show_blocking();
            self.emit_transition(t);
        }
    }

    /// The shell finished hiding the modal.
    pub fn modal_fully_hidden(&mut self) {
        self.modal.fully_hidden();
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn defer(&mut self) {
        let now = self.clock.now();
        match self.manager.record_deferral(now) {
            Some(deferral) => {
                self.events.push(GateEvent::DeferralRecorded {
                    deferral_count: deferral.deferral_count,
                    remaining_deferrals: deferral.remaining,
                    defer_until: deferral.defer_until,
                    at: now,
                });
                let t = self.modal.hide();
                self.emit_transition(t);
                self.schedule_resume(deferral.defer_until);
            }
            None => {
                let t = self.modal.show_blocking();
                self.emit_transition(t);
            }
        }
    }

    fn apply_decision(&mut self) {
        let now = self.clock.now();
        match self.manager.decide(now) {
            GateDecision::Suppressed { resume_at } => self.schedule_resume(resume_at),
            GateDecision::Block => {
                let t = self.modal.show_blocking();
                self.emit_transition(t);
            }
            GateDecision::Prompt { remaining } => {
                let t = self.modal.present_choice(remaining > 0);
                self.emit_transition(t);
            }
        }
    }

    fn schedule_resume(&mut self, at: DateTime<Utc>) {
        self.resume_at = Some(at);
        let now = self.clock.now();
        self.events.push(GateEvent::RecheckScheduled { resume_at: at, at: now });
    }

    fn record_verdict(&mut self, verdict: &DetectionVerdict) {
        self.events.push(GateEvent::DetectionCompleted {
            blocked: verdict.blocked,
            signals: verdict.signals,
            attempts: verdict.attempts,
            at: self.clock.now(),
        });
    }

    fn emit_transition(&mut self, transition: Option<Transition>) {
        let Some(Transition { from, to }) = transition else {
            return;
        };
        let at = self.clock.now();
        let event = match (from, to) {
            (_, ModalState::Hidden) => GateEvent::ModalHidden { at },
            (ModalState::Hidden, state) => GateEvent::ModalShown {
                state,
                remaining_deferrals: self.manager.remaining(at),
                at,
            },
            (from, to) => GateEvent::ModalTransitioned { from, to, at },
        };
        self.events.push(event);
    }
}
