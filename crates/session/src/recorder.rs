//! Append-only JSONL event log.
//!
//! Every pipeline event lands here, one JSON object per line, flushed per
//! line so a crash loses at most the line being written. Final intent
//! events get their transcript position computed at write time. A disk
//! error stops the recorder with a single warning; the pipeline keeps
//! emitting to its other subscribers.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use hearsay_events::{SessionEvent, SessionPayload, UtteranceKind};
use uuid::Uuid;

use crate::sidecar::{sidecar_path, AudioSidecar};
use crate::transcript::TranscriptIndex;
use crate::RecorderError;

pub struct SessionRecorder {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    sidecar: Option<AudioSidecar>,
    index: TranscriptIndex,
    /// Time range of each finalized utterance, for position attribution.
    utterance_ranges: HashMap<Uuid, (i64, i64)>,
    /// Set after the first write failure; further records are dropped.
    failed: bool,
}

impl SessionRecorder {
    /// Create or truncate the recording at `path`. With `with_audio`, a WAV
    /// sidecar is created next to it.
    pub fn create(path: impl AsRef<Path>, with_audio: bool) -> Result<Self, RecorderError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let sidecar = if with_audio {
            Some(AudioSidecar::create(sidecar_path(&path))?)
        } else {
            None
        };
        tracing::info!(path = %path.display(), with_audio, "recording session");
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            sidecar,
            index: TranscriptIndex::new(),
            utterance_ranges: HashMap::new(),
            failed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event. Infallible from the caller's point of view: IO
    /// errors degrade the recorder instead of propagating upstream.
    pub fn record(&mut self, event: SessionEvent) {
        let event = self.enrich(event);
        if self.failed {
            return;
        }
        if let Err(err) = self.write_line(&event) {
            tracing::warn!(
                path = %self.path.display(),
                %err,
                "recorder stopped after write failure"
            );
            self.failed = true;
            self.writer = None;
        }
    }

    /// Append raw PCM to the sidecar, if one is open.
    pub fn record_audio(&mut self, samples: &[f32]) {
        if let Some(sidecar) = self.sidecar.as_mut() {
            if let Err(err) = sidecar.write_samples(samples) {
                tracing::warn!(%err, "audio sidecar stopped after write failure");
                self.sidecar = None;
            }
        }
    }

    /// Flush and close the log and sidecar.
    pub fn finalize(mut self) -> Result<(), RecorderError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        if let Some(sidecar) = self.sidecar.take() {
            sidecar.finalize()?;
        }
        Ok(())
    }

    // --- Private helpers ---

    /// Track transcript state and fill in intent positions.
    fn enrich(&mut self, mut event: SessionEvent) -> SessionEvent {
        match &mut event.payload {
            SessionPayload::Asr(asr) if asr.is_final => {
                self.index.add_final(&asr.text, asr.offset_ms);
            }
            SessionPayload::Utterance(utt) if utt.kind == UtteranceKind::Final => {
                let end = utt.offset_ms;
                let start = end - utt.duration_ms;
                self.utterance_ranges.insert(utt.id, (start, end));
            }
            SessionPayload::Intent(intent_event) if !intent_event.is_candidate => {
                if let Some((start, end)) = self.utterance_ranges.get(&intent_event.utterance_id) {
                    if let Some((char_start, char_end)) = self.index.attribute(
                        *start,
                        *end,
                        &intent_event.intent.source_text,
                        &intent_event.intent.original_text,
                    ) {
                        intent_event.transcript_char_start = Some(char_start);
                        intent_event.transcript_char_end = Some(char_end);
                    }
                }
            }
            SessionPayload::IntentCorrection(correction) => {
                if let Some((start, end)) = self.utterance_ranges.get(&correction.utterance_id) {
                    if let Some((char_start, char_end)) = self.index.attribute(
                        *start,
                        *end,
                        &correction.corrected_intent.source_text,
                        &correction.corrected_intent.original_text,
                    ) {
                        correction.transcript_char_start = Some(char_start);
                        correction.transcript_char_end = Some(char_end);
                    }
                }
            }
            _ => {}
        }
        event
    }

    fn write_line(&mut self, event: &SessionEvent) -> Result<(), RecorderError> {
        let writer = match self.writer.as_mut() {
            Some(w) => w,
            None => return Ok(()),
        };
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        // One write + flush per line keeps lines atomic on the filesystem.
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}
