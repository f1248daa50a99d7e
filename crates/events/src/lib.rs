//! Event model and event bus for the hearsay pipeline.

mod bus;
mod clock;
mod event;
mod record;

pub use bus::{ChannelEventBus, EventBus, EventBusRef, InMemoryEventBus, NullEventBus};
pub use clock::{Clock, ClockRef, ManualClock, SessionClock};
pub use event::{
    ActionEvent, AsrEvent, AsrWord, CorrectionKind, DetectedIntent, IntentCorrectionEvent,
    IntentEvent, IntentSubtype, IntentType, UtteranceEvent, UtteranceKind,
};
pub use record::{SessionEvent, SessionPayload};
