//! Utterance segmentation for the stabilized ASR stream.
//!
//! The [`UtteranceBuilder`] turns a sequence of ASR events into utterance
//! lifecycles: `Open` when speech starts, `Update` while text accumulates,
//! `Final` when an end condition fires. Time-based conditions are evaluated
//! by [`check_timeouts`](UtteranceBuilder::check_timeouts), polled by an
//! external scheduler at a coarse interval.

use std::sync::Mutex;

use hearsay_events::{AsrEvent, Clock, ClockRef, UtteranceEvent, UtteranceKind};
use hearsay_stabilizer::{Stabilizer, StabilizerConfig};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// End-condition tuning for utterance segmentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtteranceConfig {
    /// Close after this much silence since the last hypothesis.
    pub silence_gap_ms: i64,
    /// Close this long after text ends in terminal punctuation.
    pub punctuation_pause_ms: i64,
    /// Hard cap on utterance duration.
    pub max_duration_ms: i64,
    /// Hard cap on stable text length, in characters.
    pub max_length_chars: usize,
    /// Run partials through the stabilizer; when false, the utterance text
    /// is the concatenation of contributing ASR finals.
    pub use_stabilizer: bool,
    pub stabilizer: StabilizerConfig,
}

impl Default for UtteranceConfig {
    fn default() -> Self {
        Self {
            silence_gap_ms: 750,
            punctuation_pause_ms: 300,
            max_duration_ms: 12_000,
            max_length_chars: 500,
            use_stabilizer: true,
            stabilizer: StabilizerConfig::default(),
        }
    }
}

/// Why an utterance was closed. Diagnostic only; not part of the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    SilenceGap,
    Punctuation,
    MaxDuration,
    MaxLength,
    EndSignal,
    ForceClose,
}

/// State of the utterance currently being built.
struct OpenUtterance {
    id: Uuid,
    stabilizer: Stabilizer,
    /// Final texts, used verbatim when the stabilizer is disabled.
    final_texts: Vec<String>,
    stable_text: String,
    unstable_text: String,
    asr_final_offsets: Vec<i64>,
    opened_at_ms: i64,
    /// Last time any non-empty hypothesis arrived.
    last_activity_ms: i64,
    /// Last time the visible text actually changed.
    last_change_ms: i64,
}

impl OpenUtterance {
    fn effective_text(&self) -> String {
        if self.unstable_text.is_empty() {
            self.stable_text.clone()
        } else if self.stable_text.is_empty() {
            self.unstable_text.clone()
        } else {
            format!("{} {}", self.stable_text, self.unstable_text)
        }
    }
}

/// Segments the stable stream into utterances.
///
/// All public operations lock one internal mutex and are short and
/// non-blocking, so `check_timeouts` may be called concurrently with
/// `process_asr_event`.
pub struct UtteranceBuilder {
    config: UtteranceConfig,
    clock: ClockRef,
    state: Mutex<Option<OpenUtterance>>,
}

impl UtteranceBuilder {
    pub fn new(config: UtteranceConfig, clock: ClockRef) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(None),
        }
    }

    /// Feed one ASR event. Returns the utterance events it produced, in
    /// emission order (`Open` first, `Final` last).
    pub fn process_asr_event(&self, event: &AsrEvent) -> Vec<UtteranceEvent> {
        if event.text.trim().is_empty() {
            return Vec::new();
        }

        let now = self.clock.now_ms();
        let mut state = self.state.lock().expect("utterance builder mutex poisoned");
        let mut emitted = Vec::new();

        if state.is_none() {
            *state = Some(OpenUtterance {
                id: Uuid::new_v4(),
                stabilizer: Stabilizer::with_config(self.config.stabilizer.clone()),
                final_texts: Vec::new(),
                stable_text: String::new(),
                unstable_text: String::new(),
                asr_final_offsets: Vec::new(),
                opened_at_ms: now,
                last_activity_ms: now,
                last_change_ms: now,
            });
            let current = state.as_mut().expect("utterance was just opened");
            Self::absorb(current, event, self.config.use_stabilizer, now);
            emitted.push(Self::event_for(current, UtteranceKind::Open, now));
            tracing::debug!(utterance_id = %current.id, "utterance opened");
        } else {
            let current = state.as_mut().expect("utterance is open");
            let changed = Self::absorb(current, event, self.config.use_stabilizer, now);
            if changed {
                emitted.push(Self::event_for(current, UtteranceKind::Update, now));
            }
        }

        // Size and duration caps are checked inline so the boundary fires on
        // the event that crosses it, not on the next poll.
        let reason = {
            let current = state.as_ref().expect("utterance is open");
            if current.stable_text.chars().count() >= self.config.max_length_chars {
                Some(CloseReason::MaxLength)
            } else if now - current.opened_at_ms >= self.config.max_duration_ms {
                Some(CloseReason::MaxDuration)
            } else {
                None
            }
        };
        if let Some(reason) = reason {
            // The Final supersedes an Update emitted for the same ASR event.
            if matches!(emitted.last().map(|e| e.kind), Some(UtteranceKind::Update)) {
                emitted.pop();
            }
            if let Some(final_event) = Self::close(&mut state, reason, now) {
                emitted.push(final_event);
            }
        }

        emitted
    }

    /// Evaluate time-based end conditions. Poll at ≈100 ms.
    pub fn check_timeouts(&self) -> Option<UtteranceEvent> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().expect("utterance builder mutex poisoned");
        let current = state.as_ref()?;

        let reason = if now - current.last_activity_ms >= self.config.silence_gap_ms {
            Some(CloseReason::SilenceGap)
        } else if ends_in_terminal_punctuation(&current.effective_text())
            && now - current.last_change_ms >= self.config.punctuation_pause_ms
        {
            Some(CloseReason::Punctuation)
        } else if now - current.opened_at_ms >= self.config.max_duration_ms {
            Some(CloseReason::MaxDuration)
        } else {
            None
        };

        Self::close(&mut state, reason?, now)
    }

    /// External endpoint hint from the ASR provider.
    pub fn signal_utterance_end(&self) -> Option<UtteranceEvent> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().expect("utterance builder mutex poisoned");
        Self::close(&mut state, CloseReason::EndSignal, now)
    }

    /// Close whatever is open, e.g. on session cancellation.
    pub fn force_close(&self) -> Option<UtteranceEvent> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().expect("utterance builder mutex poisoned");
        Self::close(&mut state, CloseReason::ForceClose, now)
    }

    /// Whether an utterance is currently open.
    pub fn is_open(&self) -> bool {
        self.state
            .lock()
            .expect("utterance builder mutex poisoned")
            .is_some()
    }

    // --- Private helpers ---

    /// Fold one ASR event into the open utterance. Returns whether the
    /// visible text changed.
    fn absorb(current: &mut OpenUtterance, event: &AsrEvent, use_stabilizer: bool, now: i64) -> bool {
        current.last_activity_ms = now;

        if event.is_final {
            if current
                .asr_final_offsets
                .last()
                .map_or(true, |last| event.offset_ms > *last)
            {
                current.asr_final_offsets.push(event.offset_ms);
            }
            current.final_texts.push(event.text.trim().to_string());
            current.stabilizer.commit_final(&event.text);
        } else {
            current
                .stabilizer
                .add_hypothesis(&event.text, event.words.as_deref());
        }

        let (stable, unstable) = if use_stabilizer {
            (
                current.stabilizer.stable_text(),
                if event.is_final {
                    String::new()
                } else {
                    current.stabilizer.unstable_tail()
                },
            )
        } else {
            (
                current.final_texts.join(" "),
                if event.is_final {
                    String::new()
                } else {
                    event.text.trim().to_string()
                },
            )
        };

        let changed = stable != current.stable_text || unstable != current.unstable_text;
        if changed {
            current.stable_text = stable;
            current.unstable_text = unstable;
            current.last_change_ms = now;
        }
        changed
    }

    fn event_for(current: &OpenUtterance, kind: UtteranceKind, now: i64) -> UtteranceEvent {
        UtteranceEvent {
            id: current.id,
            kind,
            stable_text: current.stable_text.clone(),
            unstable_text: current.unstable_text.clone(),
            duration_ms: now - current.opened_at_ms,
            asr_final_offsets: current.asr_final_offsets.clone(),
            offset_ms: now,
        }
    }

    fn close(
        state: &mut Option<OpenUtterance>,
        reason: CloseReason,
        now: i64,
    ) -> Option<UtteranceEvent> {
        let current = state.take()?;

        if current.stable_text.trim().is_empty() {
            // Nothing ever stabilized: no Final, per the zero-length rule.
            tracing::debug!(utterance_id = %current.id, ?reason, "discarding empty utterance");
            return None;
        }

        tracing::debug!(
            utterance_id = %current.id,
            ?reason,
            duration_ms = now - current.opened_at_ms,
            chars = current.stable_text.len(),
            "utterance closed"
        );

        Some(UtteranceEvent {
            id: current.id,
            kind: UtteranceKind::Final,
            stable_text: current.stable_text,
            unstable_text: String::new(),
            duration_ms: now - current.opened_at_ms,
            asr_final_offsets: current.asr_final_offsets,
            offset_ms: now,
        })
    }
}

fn ends_in_terminal_punctuation(text: &str) -> bool {
    matches!(text.trim_end().chars().last(), Some('.' | '?' | '!'))
}
