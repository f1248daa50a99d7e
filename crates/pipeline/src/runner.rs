//! Session task wiring.
//!
//! One ingest loop, one poller, one consumer. Every event flows through
//! the single session channel, so the consumer sees emission order and the
//! recorder writes it.

use std::sync::Arc;
use std::time::Duration;

use hearsay_events::{ManualClock, SessionEvent};
use hearsay_session::SessionRecorder;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::source::AsrEventSource;
use crate::{Pipeline, PipelineError};

/// Per-run knobs that are not part of the pipeline configuration.
#[derive(Default)]
pub struct RunnerOptions {
    /// Drive the session clock from event offsets instead of wall time.
    /// Used by headless re-processing so time-based closures behave as
    /// they did live.
    pub drive_clock: Option<Arc<ManualClock>>,
    /// Observer invoked for every consumed event, e.g. interactive display.
    pub on_event: Option<Box<dyn FnMut(&SessionEvent) + Send>>,
}

/// Run one session to completion.
///
/// Ends when the source is exhausted or `cancel` fires; either way the open
/// utterance is force-closed, strategies flush, the recorder is finalized,
/// and every event consumed from the bus is returned in order.
pub async fn run_session(
    pipeline: Arc<Pipeline>,
    mut source: Box<dyn AsrEventSource>,
    mut bus_rx: mpsc::Receiver<SessionEvent>,
    recorder: Option<SessionRecorder>,
    cancel: CancellationToken,
    poll_interval_ms: u64,
    options: RunnerOptions,
) -> Result<Vec<SessionEvent>, PipelineError> {
    let RunnerOptions {
        drive_clock,
        mut on_event,
    } = options;

    // Consumer: routes intents into actions, records, observes. Runs until
    // told to drain, so ingest is never backpressured by file IO.
    let consumer_done = CancellationToken::new();
    let consumer = {
        let pipeline = pipeline.clone();
        let consumer_done = consumer_done.clone();
        let mut recorder = recorder;
        tokio::spawn(async move {
            let mut seen: Vec<SessionEvent> = Vec::new();
            let mut handle = |event: SessionEvent,
                              recorder: &mut Option<SessionRecorder>,
                              seen: &mut Vec<SessionEvent>| {
                pipeline.route_event(&event);
                if let Some(observer) = on_event.as_mut() {
                    observer(&event);
                }
                if let Some(recorder) = recorder.as_mut() {
                    recorder.record(event.clone());
                }
                seen.push(event);
            };
            loop {
                tokio::select! {
                    maybe = bus_rx.recv() => match maybe {
                        Some(event) => handle(event, &mut recorder, &mut seen),
                        None => break,
                    },
                    _ = consumer_done.cancelled() => {
                        // Drain whatever is already buffered, including
                        // actions produced by routing during the drain.
                        while let Ok(event) = bus_rx.try_recv() {
                            handle(event, &mut recorder, &mut seen);
                        }
                        break;
                    }
                }
            }
            if let Some(recorder) = recorder {
                if let Err(err) = recorder.finalize() {
                    tracing::warn!(%err, "recorder finalize failed");
                }
            }
            seen
        })
    };

    // Poller: the coarse timer behind every time-based condition.
    let poller = {
        let pipeline = pipeline.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(poll_interval_ms.max(1)));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => pipeline.poll().await,
                }
            }
        })
    };

    // Ingest loop.
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("session cancelled");
                break;
            }
            maybe = source.next_event() => match maybe {
                Some(event) => {
                    if let Some(clock) = &drive_clock {
                        // Offsets drive time: settle everything due before
                        // this event, exactly as a live poller would have.
                        clock.set(event.offset_ms);
                        pipeline.poll().await;
                    }
                    pipeline.handle_asr_event(event).await;
                }
                None => {
                    tracing::debug!("asr source exhausted");
                    break;
                }
            }
        }
    }

    // Let detached strategy tasks settle before flushing.
    tokio::time::sleep(Duration::from_millis(poll_interval_ms.max(1))).await;
    pipeline.shutdown().await;
    tokio::time::sleep(Duration::from_millis(poll_interval_ms.max(1))).await;

    cancel.cancel();
    let _ = poller.await;

    consumer_done.cancel();
    let events = consumer.await.unwrap_or_default();
    Ok(events)
}
