//! ASR event ingress.
//!
//! The pipeline consumes recognizer hypotheses through one seam, so a live
//! provider client, a recording, or a test vector all look the same.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use hearsay_events::{AsrEvent, SessionPayload};
use hearsay_session::SessionPlayer;

use crate::PipelineError;

/// A stream of ASR events. `None` means the stream ended.
#[async_trait]
pub trait AsrEventSource: Send {
    async fn next_event(&mut self) -> Option<AsrEvent>;
}

/// Replays the ASR events of a recorded session.
///
/// Paced mode sleeps the original `offset_ms` gaps between events, so a
/// live pipeline run behaves as it did during capture; unpaced mode is for
/// headless re-processing.
pub struct ReplaySource {
    events: VecDeque<AsrEvent>,
    paced: bool,
    last_offset_ms: Option<i64>,
}

impl ReplaySource {
    pub fn from_recording(path: impl AsRef<Path>, paced: bool) -> Result<Self, PipelineError> {
        let player = SessionPlayer::load(path)?;
        let events = player
            .events()
            .iter()
            .filter_map(|e| match &e.payload {
                SessionPayload::Asr(asr) => Some(asr.clone()),
                _ => None,
            })
            .collect();
        Ok(Self::from_events(events, paced))
    }

    pub fn from_events(events: Vec<AsrEvent>, paced: bool) -> Self {
        Self {
            events: events.into(),
            paced,
            last_offset_ms: None,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[async_trait]
impl AsrEventSource for ReplaySource {
    async fn next_event(&mut self) -> Option<AsrEvent> {
        let event = self.events.pop_front()?;
        if self.paced {
            if let Some(last) = self.last_offset_ms {
                let gap = event.offset_ms - last;
                if gap > 0 {
                    tokio::time::sleep(Duration::from_millis(gap as u64)).await;
                }
            }
        }
        self.last_offset_ms = Some(event.offset_ms);
        Some(event)
    }
}
