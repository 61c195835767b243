//! Button interaction state machine
//!
//! Turns the raw transitions the daemon reports into what a user did with the button.
//! Per slot:
//!
//! ```text
//!            Down                 Hold
//!   Idle ─────────► Pressed ─────────────► HeldDown
//!    ▲    (StateOn)    │                     │
//!    │                 │ SingleClick         │ SingleClick  -> Hold
//!    │                 │   -> Click          │ DoubleClick  -> ClickHold
//!    │                 │ DoubleClick         │
//!    │                 │   -> ClickClick     │
//!    └─────────────────┴─────────────────────┘
//! ```
//!
//! Up only reports `StateOff` and never resolves a hold; the daemon follows a held
//! press with a SingleClick (or DoubleClick for click-then-hold) which does.

use tracing::{debug, warn};

use crate::config::MAX_SLOTS;
use crate::mqtt::TopicKind;
use crate::protocol::ClickType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    StateOn,
    StateOff,
    Click,
    Hold,
    ClickClick,
    ClickHold,
}

impl Interaction {
    pub fn topic(self) -> TopicKind {
        match self {
            Interaction::StateOn | Interaction::StateOff => TopicKind::State,
            Interaction::Click => TopicKind::Click,
            Interaction::Hold => TopicKind::Hold,
            Interaction::ClickClick => TopicKind::ClickClick,
            Interaction::ClickHold => TopicKind::ClickHold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ButtonPhase {
    #[default]
    Idle,
    Pressed,
    HeldDown,
}

#[derive(Debug, Default)]
pub struct ButtonInteractions {
    phases: [ButtonPhase; MAX_SLOTS],
    holding: [bool; MAX_SLOTS],
    // Slots with the hold flag set
    held_count: usize,
}

impl ButtonInteractions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self, slot: u8) -> ButtonPhase {
        self.phases
            .get(usize::from(slot))
            .copied()
            .unwrap_or_default()
    }

    pub fn is_holding(&self, slot: u8) -> bool {
        self.holding.get(usize::from(slot)).copied().unwrap_or(false)
    }

    /// True while any button is in the middle of a hold
    pub fn holds_pending(&self) -> bool {
        self.held_count > 0
    }

    fn set_holding(&mut self, index: usize, holding: bool) {
        if self.holding[index] != holding {
            self.holding[index] = holding;
            if holding {
                self.held_count += 1;
            } else {
                self.held_count -= 1;
            }
        }
    }

    // Clears the hold flag, reporting whether it was set
    fn take_hold(&mut self, index: usize) -> bool {
        let was_holding = self.holding[index];
        self.set_holding(index, false);
        was_holding
    }

    /// Drops the pending hold of a button that went away before resolving it
    pub fn cancel_hold(&mut self, slot: u8) -> bool {
        let index = usize::from(slot);
        if index >= MAX_SLOTS || !self.holding[index] {
            return false;
        }
        self.set_holding(index, false);
        self.phases[index] = ButtonPhase::Idle;
        true
    }

    pub fn apply(&mut self, slot: u8, click_type: ClickType) -> Option<Interaction> {
        let index = usize::from(slot);
        if index >= MAX_SLOTS {
            warn!("Ignoring {} for slot {} outside the slot table", click_type, slot);
            return None;
        }

        match click_type {
            ClickType::Down => {
                if self.holding[index] {
                    warn!("Slot {} pressed again while a hold was pending, resetting", slot);
                    self.set_holding(index, false);
                }
                self.phases[index] = ButtonPhase::Pressed;
                Some(Interaction::StateOn)
            }
            ClickType::Up => {
                if self.phases[index] == ButtonPhase::Pressed {
                    self.phases[index] = ButtonPhase::Idle;
                }
                Some(Interaction::StateOff)
            }
            ClickType::Hold => {
                self.set_holding(index, true);
                self.phases[index] = ButtonPhase::HeldDown;
                None
            }
            ClickType::SingleClick => {
                self.phases[index] = ButtonPhase::Idle;
                if self.take_hold(index) {
                    Some(Interaction::Hold)
                } else {
                    Some(Interaction::Click)
                }
            }
            ClickType::DoubleClick => {
                self.phases[index] = ButtonPhase::Idle;
                if self.take_hold(index) {
                    Some(Interaction::ClickHold)
                } else {
                    Some(Interaction::ClickClick)
                }
            }
            ClickType::Click => {
                debug!("Ignoring generic click on slot {}", slot);
                None
            }
        }
    }
}
