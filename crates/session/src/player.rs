//! Replay of recorded sessions.
//!
//! The player re-emits recorded events with their original pacing: the
//! `offset_ms` gap between adjacent records controls the sleep between
//! them. Headless replay skips the sleeping and is used for analysis.

use std::path::Path;
use std::time::Duration;

use hearsay_events::SessionEvent;

use crate::report::SessionReport;
use crate::PlayerError;

#[derive(Debug)]
pub struct SessionPlayer {
    events: Vec<SessionEvent>,
    skipped: usize,
}

impl SessionPlayer {
    /// Load a JSONL recording. Records of unknown kind (from a newer
    /// writer) are skipped; corrupt lines are an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PlayerError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut events = Vec::new();
        let mut skipped = 0usize;
        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match SessionEvent::from_json_line(line) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => skipped += 1,
                Err(source) => {
                    return Err(PlayerError::Parse {
                        line: i + 1,
                        source,
                    })
                }
            }
        }
        tracing::debug!(
            events = events.len(),
            skipped,
            "loaded recording"
        );
        Ok(Self { events, skipped })
    }

    pub fn from_events(events: Vec<SessionEvent>) -> Self {
        Self { events, skipped: 0 }
    }

    pub fn events(&self) -> &[SessionEvent] {
        &self.events
    }

    /// Records skipped during load because their kind was unknown.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Re-emit all events, preserving the original time gaps.
    pub async fn replay<F>(&self, mut sink: F)
    where
        F: FnMut(&SessionEvent),
    {
        let mut prev_offset: Option<i64> = None;
        for event in &self.events {
            if let Some(prev) = prev_offset {
                let gap = event.offset_ms - prev;
                if gap > 0 {
                    tokio::time::sleep(Duration::from_millis(gap as u64)).await;
                }
            }
            prev_offset = Some(event.offset_ms);
            sink(event);
        }
    }

    /// Re-emit all events without sleeping.
    pub fn replay_headless<F>(&self, mut sink: F)
    where
        F: FnMut(&SessionEvent),
    {
        for event in &self.events {
            sink(event);
        }
    }

    pub fn report(&self) -> SessionReport {
        SessionReport::from_events(&self.events)
    }
}
