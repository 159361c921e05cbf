use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::presentation::ModalState;

/// Every observable change in a gate session produces an Event.
/// The page shell drains them to render the modal and react to reloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GateEvent {
    /// A detection cycle produced a verdict.
    DetectionCompleted {
        blocked: bool,
        signals: u32,
        attempts: u32,
        at: DateTime<Utc>,
    },
    /// The modal appeared (from Hidden).
    ModalShown {
        state: ModalState,
        remaining_deferrals: u32,
        at: DateTime<Utc>,
    },
    /// The visible modal changed content.
    ModalTransitioned {
        from: ModalState,
        to: ModalState,
        at: DateTime<Utc>,
    },
    /// The modal was asked to hide; `modal_fully_hidden` follows from the shell.
    ModalHidden { at: DateTime<Utc> },
    /// The visitor chose "maybe later".
    DeferralRecorded {
        deferral_count: u32,
        remaining_deferrals: u32,
        defer_until: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    /// A recheck confirmed the blocker is off; quota cleared.
    QuotaReset { at: DateTime<Utc> },
    /// Detection will resume automatically at `resume_at`.
    RecheckScheduled {
        resume_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    /// The shell should reload the page.
    ReloadRequested { at: DateTime<Utc> },
}
