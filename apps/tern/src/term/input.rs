//! Keystroke/IME/paste disambiguation.
//!
//! The renderer's input layer re-emits text around IME composition and
//! paste operations, so the same physical input can surface more than
//! once. [`InputGate`] sits between the renderer's input events and the
//! backend send path and decides, per event, whether it is forwarded,
//! suppressed, or routed to the multi-input paste callback. All
//! transitions take an explicit `now` so the timing windows are
//! testable without sleeping.

use std::time::Instant;

use tracing::debug;

use crate::config::{IME_DEDUP_WINDOW, PASTE_GUARD_LINGER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Composing,
}

/// What to do with one input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDecision {
    /// Send to the backend on the normal single-input path.
    Forward,
    /// Generated by an active paste; route to the multi-input callback.
    RouteToMultiInput,
    /// Duplicate or mid-composition echo; drop it.
    Suppress,
}

pub struct InputGate {
    phase: Phase,
    /// Current partial text while composing; recorded, never forwarded.
    composing_text: String,
    /// Finalized text of the last composition, armed for dedup.
    last_composed: String,
    composition_end: Option<Instant>,
    first_duplicate_forwarded: bool,
    paste_active: bool,
    paste_linger_until: Option<Instant>,
}

impl InputGate {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            composing_text: String::new(),
            last_composed: String::new(),
            composition_end: None,
            first_duplicate_forwarded: false,
            paste_active: false,
            paste_linger_until: None,
        }
    }

    pub fn is_composing(&self) -> bool {
        self.phase == Phase::Composing
    }

    /// Partial text of the composition in flight, empty when idle.
    pub fn composing_text(&self) -> &str {
        &self.composing_text
    }

    pub fn composition_start(&mut self) {
        self.phase = Phase::Composing;
        self.composing_text.clear();
    }

    pub fn composition_update(&mut self, text: &str) {
        self.composing_text = text.to_string();
    }

    /// Composition finalized: arm the dedup window for `text`.
    pub fn composition_end(&mut self, text: &str, now: Instant) {
        self.phase = Phase::Idle;
        self.last_composed = text.to_string();
        self.composition_end = Some(now);
        self.first_duplicate_forwarded = false;
    }

    /// Focus lost. A composition in flight can never complete, so its
    /// state is cleared to avoid stale forwarding on refocus.
    pub fn focus_lost(&mut self) {
        if self.phase == Phase::Composing {
            debug!("focus lost during composition, resetting state");
            self.phase = Phase::Idle;
            self.composing_text.clear();
        }
    }

    pub fn begin_paste(&mut self) {
        self.paste_active = true;
    }

    /// Paste finished; the guard stays armed briefly for input events
    /// the paste mechanism emits after completion.
    pub fn end_paste(&mut self, now: Instant) {
        self.paste_active = false;
        self.paste_linger_until = Some(now + PASTE_GUARD_LINGER);
    }

    fn paste_guard_active(&self, now: Instant) -> bool {
        self.paste_active || self.paste_linger_until.is_some_and(|until| now < until)
    }

    /// Classify one input event from the renderer.
    pub fn filter(&mut self, data: &str, now: Instant) -> InputDecision {
        // While composing, the renderer echoes partial text that will be
        // re-emitted in full at composition end.
        if self.phase == Phase::Composing {
            debug!("suppressing input during composition");
            return InputDecision::Suppress;
        }

        if self.paste_guard_active(now) {
            return InputDecision::RouteToMultiInput;
        }

        if let Some(end) = self.composition_end {
            let in_window =
                now.checked_duration_since(end).is_some_and(|d| d < IME_DEDUP_WINDOW);
            if in_window && !self.last_composed.is_empty() && data == self.last_composed {
                if !self.first_duplicate_forwarded {
                    // legitimate re-entry after some OS composition paths
                    self.first_duplicate_forwarded = true;
                } else {
                    debug!("suppressing duplicate composed input");
                    self.last_composed.clear();
                    self.first_duplicate_forwarded = false;
                    return InputDecision::Suppress;
                }
            }
        }

        InputDecision::Forward
    }
}

impl Default for InputGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn raw_input_suppressed_while_composing() {
        let mut gate = InputGate::new();
        let t0 = Instant::now();
        gate.composition_start();
        gate.composition_update("ㅎ");
        assert_eq!(gate.filter("ㅎ", t0), InputDecision::Suppress);
        assert!(gate.is_composing());
        assert_eq!(gate.composing_text(), "ㅎ");
    }

    #[test]
    fn first_duplicate_forwarded_second_suppressed() {
        let mut gate = InputGate::new();
        let t0 = Instant::now();
        gate.composition_start();
        gate.composition_end("é", t0);

        assert_eq!(gate.filter("é", t0 + ms(10)), InputDecision::Forward);
        assert_eq!(gate.filter("é", t0 + ms(20)), InputDecision::Suppress);
        // suppression cleared the window state, a third passes
        assert_eq!(gate.filter("é", t0 + ms(25)), InputDecision::Forward);
    }

    #[test]
    fn dedup_only_inside_window() {
        let mut gate = InputGate::new();
        let t0 = Instant::now();
        gate.composition_start();
        gate.composition_end("あ", t0);

        assert_eq!(gate.filter("あ", t0 + ms(10)), InputDecision::Forward);
        // outside the 30ms window the identical text is normal typing
        assert_eq!(gate.filter("あ", t0 + ms(40)), InputDecision::Forward);
    }

    #[test]
    fn non_matching_text_unaffected_by_window() {
        let mut gate = InputGate::new();
        let t0 = Instant::now();
        gate.composition_start();
        gate.composition_end("é", t0);
        assert_eq!(gate.filter("x", t0 + ms(5)), InputDecision::Forward);
    }

    #[test]
    fn empty_composition_never_dedups() {
        let mut gate = InputGate::new();
        let t0 = Instant::now();
        gate.composition_start();
        gate.composition_end("", t0);
        assert_eq!(gate.filter("", t0 + ms(5)), InputDecision::Forward);
        assert_eq!(gate.filter("", t0 + ms(10)), InputDecision::Forward);
    }

    #[test]
    fn focus_loss_resets_composition() {
        let mut gate = InputGate::new();
        let t0 = Instant::now();
        gate.composition_start();
        gate.composition_update("ㅎ");
        gate.focus_lost();
        assert!(!gate.is_composing());
        assert_eq!(gate.filter("h", t0), InputDecision::Forward);
    }

    #[test]
    fn paste_routes_to_multi_input_until_guard_clears() {
        let mut gate = InputGate::new();
        let t0 = Instant::now();
        gate.begin_paste();
        assert_eq!(
            gate.filter("pasted text", t0),
            InputDecision::RouteToMultiInput
        );
        gate.end_paste(t0 + ms(5));
        // still armed shortly after the paste completes
        assert_eq!(
            gate.filter("trailing", t0 + ms(10)),
            InputDecision::RouteToMultiInput
        );
        // guard expired
        assert_eq!(gate.filter("typed", t0 + ms(50)), InputDecision::Forward);
    }
}
