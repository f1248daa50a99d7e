//! Event bus abstraction for decoupled event emission.
//!
//! Components publish `SessionEvent`s without knowing who consumes them.
//! Publishers are never blocked: the channel-backed bus drops on overflow
//! and counts what it dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::record::SessionEvent;

/// Trait for emitting session events to subscribers.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: SessionEvent);
}

/// Type alias for shared event bus reference.
pub type EventBusRef = Arc<dyn EventBus>;

/// Event bus backed by a bounded tokio channel.
///
/// `publish` uses `try_send`: a slow subscriber costs events, not latency.
pub struct ChannelEventBus {
    tx: mpsc::Sender<SessionEvent>,
    dropped: AtomicU64,
}

impl ChannelEventBus {
    /// Create a bus and its receiving half.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Number of events dropped due to a full or closed channel.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventBus for ChannelEventBus {
    fn publish(&self, event: SessionEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                // Rate-limit logging: only every 10th drop.
                if dropped % 10 == 1 {
                    tracing::warn!(dropped, kind = event.kind(), "event bus full, dropping");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("event bus closed");
            }
        }
    }
}

/// In-memory event bus for testing.
///
/// Captures all published events for later inspection.
#[derive(Default)]
pub struct InMemoryEventBus {
    events: Mutex<Vec<SessionEvent>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all captured events.
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().expect("event bus mutex poisoned").clone()
    }

    /// Get events with a specific `kind` discriminator.
    pub fn events_of_kind(&self, kind: &str) -> Vec<SessionEvent> {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().expect("event bus mutex poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("event bus mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().expect("event bus mutex poisoned").is_empty()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, event: SessionEvent) {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .push(event);
    }
}

/// No-op event bus that discards all events.
pub struct NullEventBus;

impl EventBus for NullEventBus {
    fn publish(&self, _event: SessionEvent) {
        // Intentionally empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AsrEvent;
    use crate::record::SessionPayload;

    fn asr(offset_ms: i64) -> SessionEvent {
        SessionEvent::now(SessionPayload::Asr(AsrEvent::partial("a", "hi", offset_ms)))
    }

    #[test]
    fn test_in_memory_bus_captures_in_order() {
        let bus = InMemoryEventBus::new();
        bus.publish(asr(10));
        bus.publish(asr(20));

        let events = bus.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].offset_ms, 10);
        assert_eq!(events[1].offset_ms, 20);
        assert_eq!(bus.events_of_kind("Asr").len(), 2);
        assert!(bus.events_of_kind("Action").is_empty());
    }

    #[test]
    fn test_in_memory_bus_clear() {
        let bus = InMemoryEventBus::new();
        bus.publish(asr(1));
        assert!(!bus.is_empty());
        bus.clear();
        assert!(bus.is_empty());
    }

    #[tokio::test]
    async fn test_channel_bus_delivers() {
        let (bus, mut rx) = ChannelEventBus::new(4);
        bus.publish(asr(100));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.offset_ms, 100);
        assert_eq!(bus.dropped(), 0);
    }

    #[tokio::test]
    async fn test_channel_bus_drops_on_overflow() {
        let (bus, _rx) = ChannelEventBus::new(2);
        for i in 0..5 {
            bus.publish(asr(i));
        }
        assert_eq!(bus.dropped(), 3);
    }

    #[test]
    fn test_null_bus() {
        NullEventBus.publish(asr(0));
    }
}
