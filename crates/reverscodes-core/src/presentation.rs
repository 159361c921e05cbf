//! Modal presentation state machine.
//!
//! ## State Transitions
//!
//! ```text
//! Hidden -> AwaitingChoice -> (ShowingDisableInstructions | Hidden)
//! ShowingDisableInstructions -> Rechecking -> (ShowingDisableInstructions | Hidden)
//! AwaitingChoice -> Rechecking          (visitor disabled the blocker unprompted)
//! any -> Blocking            (left only by a page reload)
//! ```
//!
//! Presentation is idempotent: once shown, a second `present_choice` is a
//! no-op until the shell reports the modal fully hidden.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModalState {
    Hidden,
    AwaitingChoice,
    ShowingDisableInstructions,
    Rechecking,
    Blocking,
}

/// A state change the shell has to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ModalState,
    pub to: ModalState,
}

#[derive(Debug, Clone)]
pub struct ModalController {
    state: ModalState,
    /// Set on first presentation, cleared only by `fully_hidden`.
    shown: bool,
    /// Whether "maybe later" is offered in the current view.
    can_defer: bool,
}

impl Default for ModalController {
    fn default() -> Self {
        Self {
            state: ModalState::Hidden,
            shown: false,
            can_defer: false,
        }
    }
}

impl ModalController {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> ModalState {
        self.state
    }

    /// True from first presentation until the shell confirms it is gone.
    pub fn is_presented(&self) -> bool {
        self.shown
    }

    pub fn can_defer(&self) -> bool {
        self.can_defer && self.state != ModalState::Blocking
    }

    /// The page shell should suspend scrolling and clicks behind the modal.
    pub fn content_interaction_disabled(&self) -> bool {
        !matches!(self.state, ModalState::Hidden)
    }

    /// The modal's buttons are live. False while a recheck is running.
    pub fn accepts_input(&self) -> bool {
        matches!(
            self.state,
            ModalState::AwaitingChoice
                | ModalState::ShowingDisableInstructions
                | ModalState::Blocking
        )
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Show the prompt offering "disable" and, if allowed, "maybe later".
    pub fn present_choice(&mut self, can_defer: bool) -> Option<Transition> {
        if self.shown || self.state != ModalState::Hidden {
            tracing::debug!(state = ?self.state, "modal already presented, ignoring");
            return None;
        }
        self.shown = true;
        self.can_defer = can_defer;
        self.go(ModalState::AwaitingChoice)
    }

    /// Replace whatever is showing with the non-dismissable block.
    pub fn show_blocking(&mut self) -> Option<Transition> {
        if self.state == ModalState::Blocking {
            return None;
        }
        self.shown = true;
        self.can_defer = false;
        self.go(ModalState::Blocking)
    }

    /// Switch to the "how to disable" instructions.
    pub fn show_instructions(&mut self, can_defer: bool) -> Option<Transition> {
        match self.state {
            ModalState::AwaitingChoice | ModalState::Rechecking => {
                self.can_defer = can_defer;
                self.go(ModalState::ShowingDisableInstructions)
            }
            _ => None,
        }
    }

    /// Lock the modal while detection runs again.
    pub fn begin_recheck(&mut self) -> Option<Transition> {
        match self.state {
            ModalState::AwaitingChoice | ModalState::ShowingDisableInstructions => {
                self.go(ModalState::Rechecking)
            }
            _ => None,
        }
    }

    /// Start hiding. The idempotency guard stays up until `fully_hidden`.
    pub fn hide(&mut self) -> Option<Transition> {
        match self.state {
            ModalState::AwaitingChoice
            | ModalState::ShowingDisableInstructions
            | ModalState::Rechecking => self.go(ModalState::Hidden),
            ModalState::Hidden | ModalState::Blocking => None,
        }
    }

    /// The shell finished its hide animation.
    pub fn fully_hidden(&mut self) {
        if self.state == ModalState::Hidden {
            self.shown = false;
            self.can_defer = false;
        }
    }

    fn go(&mut self, to: ModalState) -> Option<Transition> {
        let from = self.state;
        self.state = to;
        Some(Transition { from, to })
    }
}
