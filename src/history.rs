//! Action log — the shared drawing state one room's participants converge on.
//!
//! DESIGN
//! ======
//! The log is an append-mostly `Vec<Action>`; replaying it in order from a
//! blank canvas reproduces the drawing exactly. Undo moves the last whole
//! stroke onto the undone stack, redo moves one stroke back. A stroke is
//! derived, never stored: the run from one `Begin` to the action before the
//! next `Begin`.
//!
//! CONVERGENCE POLICY
//! ==================
//! Appending a `Begin` clears the undone stack. The rule applies uniformly
//! whenever a `Begin` enters the log via `append` — locally originated or
//! replicated from a peer — so every replica invalidates redo history on the
//! same event. Redo's internal restoration bypasses `append` and therefore
//! never self-invalidates.

use serde::{Deserialize, Serialize};

// =============================================================================
// ACTION
// =============================================================================

/// One atomic drawing event. `Begin` starts a stroke segment, `Draw` extends
/// it. Wire form matches the persisted layout: lowercase `type` tag and
/// camelCase fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Action {
    Begin { offset_x: f64, offset_y: f64, brush_size: f64, brush_color: String },
    Draw { offset_x: f64, offset_y: f64, brush_size: f64, brush_color: String },
}

impl Action {
    #[must_use]
    pub fn is_begin(&self) -> bool {
        matches!(self, Action::Begin { .. })
    }
}

// =============================================================================
// ACTION LOG
// =============================================================================

/// Ordered action history plus the undone stack for one room.
///
/// The server owns one per live room; clients hold replicas that converge to
/// it through the replication protocol.
#[derive(Debug, Clone, Default)]
pub struct ActionLog {
    actions: Vec<Action>,
    /// Actions removed by undo, in pop order: the stroke's tail goes in
    /// first, its `Begin` ends up on top ready for redo.
    undone: Vec<Action>,
}

impl ActionLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from a persisted sequence. The undone stack starts
    /// empty: redo history is transient and never persisted.
    #[must_use]
    pub fn from_actions(actions: Vec<Action>) -> Self {
        Self { actions, undone: Vec::new() }
    }

    /// Active log in append order.
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Lazy replay of the log in order. Side-effect-free and deterministic:
    /// rendering this sequence onto a cleared canvas reproduces the drawing.
    pub fn replay(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    /// Append one action to the log tail. A `Begin` invalidates redo
    /// history (see module docs for the uniform rule).
    pub fn append(&mut self, action: Action) {
        if action.is_begin() {
            self.undone.clear();
        }
        self.actions.push(action);
    }

    /// Remove the last whole stroke, moving it onto the undone stack.
    /// Returns the stroke in log order, or `None` on an empty log.
    pub fn undo(&mut self) -> Option<Vec<Action>> {
        if self.actions.is_empty() {
            return None;
        }
        let start = self.last_stroke_start();
        let stroke = self.actions.split_off(start);
        self.undone.extend(stroke.iter().rev().cloned());
        Some(stroke)
    }

    /// Move one stroke from the undone stack back onto the log. Returns the
    /// restored stroke in log order, or `None` on an empty stack.
    pub fn redo(&mut self) -> Option<Vec<Action>> {
        let first = self.undone.pop()?;
        let first_is_begin = first.is_begin();
        let mut stroke = vec![first];
        if first_is_begin {
            // Draws of this stroke follow; the next Begin belongs to an
            // earlier undone stroke and stays put.
            while let Some(action) = self.undone.pop() {
                if action.is_begin() {
                    self.undone.push(action);
                    break;
                }
                stroke.push(action);
            }
        }
        self.actions.extend(stroke.iter().cloned());
        Some(stroke)
    }

    /// Apply a redo that originated on another replica. The stroke content
    /// comes off the wire rather than the local undone stack, which may have
    /// diverged across a reconnect; the local stack still drops one stroke
    /// so a later local redo cannot restore the same stroke twice.
    pub fn restore(&mut self, stroke: Vec<Action>) {
        if stroke.is_empty() {
            return;
        }
        self.drop_undone_stroke();
        self.actions.extend(stroke);
    }

    /// Empty the log and the undone stack unconditionally.
    pub fn clear(&mut self) {
        self.actions.clear();
        self.undone.clear();
    }

    /// Start index of the last stroke. With no `Begin` in the log (a client
    /// reconnected mid-stroke), the topmost `Draw` counts as its own
    /// singleton stroke.
    fn last_stroke_start(&self) -> usize {
        self.actions
            .iter()
            .rposition(Action::is_begin)
            .unwrap_or(self.actions.len() - 1)
    }

    /// Discard one stroke's worth of the undone stack, mirroring `redo`'s
    /// pop scan.
    fn drop_undone_stroke(&mut self) {
        let Some(first) = self.undone.pop() else {
            return;
        };
        if !first.is_begin() {
            return;
        }
        while let Some(action) = self.undone.pop() {
            if action.is_begin() {
                self.undone.push(action);
                break;
            }
        }
    }
}

#[cfg(test)]
#[path = "history_test.rs"]
mod tests;
