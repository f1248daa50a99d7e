//! Imperative intent routing with debounce and last-wins conflict handling.
//!
//! Users correct themselves quickly ("stop — actually, continue"), and
//! recognizers repeat themselves. The router absorbs both: per-subtype
//! cooldowns debounce repeats, and a short conflict window lets a later
//! imperative override a pending one before anything irreversible fires.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use hearsay_events::{
    ActionEvent, Clock, ClockRef, DetectedIntent, EventBus, EventBusRef, IntentSubtype,
    SessionEvent, SessionPayload,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Handler invoked when an imperative fires. Kept behind `Arc` so a
/// snapshot can be called outside the router lock.
pub type ActionHandler = Arc<dyn Fn(&ActionEvent) + Send + Sync>;

/// Cooldowns and conflict-window tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub conflict_window_ms: i64,
    /// Fire the first imperative immediately and only hold subsequent ones.
    /// The asymmetry is deliberate: users correct rapid repeats, while an
    /// initial command should be acted on promptly. Set false to hold every
    /// imperative for the full window.
    pub fire_first_immediately: bool,
    pub stop_cooldown_ms: i64,
    pub repeat_cooldown_ms: i64,
    pub continue_cooldown_ms: i64,
    pub start_over_cooldown_ms: i64,
    pub generate_cooldown_ms: i64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            conflict_window_ms: 1_500,
            fire_first_immediately: true,
            stop_cooldown_ms: 0,
            repeat_cooldown_ms: 1_500,
            continue_cooldown_ms: 1_500,
            start_over_cooldown_ms: 2_000,
            generate_cooldown_ms: 5_000,
        }
    }
}

impl RouterConfig {
    fn cooldown_for(&self, subtype: IntentSubtype) -> i64 {
        match subtype {
            IntentSubtype::Stop => self.stop_cooldown_ms,
            IntentSubtype::Repeat => self.repeat_cooldown_ms,
            IntentSubtype::Continue => self.continue_cooldown_ms,
            IntentSubtype::StartOver => self.start_over_cooldown_ms,
            IntentSubtype::Generate => self.generate_cooldown_ms,
            _ => 0,
        }
    }
}

struct PendingIntent {
    intent: DetectedIntent,
    utterance_id: Uuid,
}

#[derive(Default)]
struct RouterState {
    handlers: HashMap<IntentSubtype, ActionHandler>,
    last_fired_ms: HashMap<IntentSubtype, i64>,
    /// Conflict window currently open, if any.
    window_until_ms: Option<i64>,
    /// Intent held for last-wins resolution inside the open window.
    pending: Option<PendingIntent>,
}

/// What to do once the lock is released.
struct Firing {
    event: ActionEvent,
    handler: Option<ActionHandler>,
}

/// Debounces and last-wins-resolves imperative intents before dispatch.
pub struct ActionRouter {
    config: RouterConfig,
    clock: ClockRef,
    bus: EventBusRef,
    state: Mutex<RouterState>,
}

impl ActionRouter {
    pub fn new(config: RouterConfig, clock: ClockRef, bus: EventBusRef) -> Self {
        Self {
            config,
            clock,
            bus,
            state: Mutex::new(RouterState::default()),
        }
    }

    /// Register the handler for an imperative subtype. Last registration wins.
    pub fn register_handler<F>(&self, subtype: IntentSubtype, handler: F)
    where
        F: Fn(&ActionEvent) + Send + Sync + 'static,
    {
        self.state
            .lock()
            .expect("router mutex poisoned")
            .handlers
            .insert(subtype, Arc::new(handler));
    }

    /// Route one intent. Returns true if it was accepted (fired or held in
    /// the conflict window), false if it was rejected or debounced.
    pub fn route(&self, intent: &DetectedIntent, utterance_id: Uuid) -> bool {
        if !intent.is_actionable() {
            return false;
        }
        let now = self.clock.now_ms();
        let subtype = intent.subtype;

        let mut firings: Vec<Firing> = Vec::new();
        let accepted = {
            let mut state = self.state.lock().expect("router mutex poisoned");

            // An expired window settles before the new intent is judged.
            Self::close_expired_window(&self.config, &mut state, now, &mut firings);

            let cooldown = self.config.cooldown_for(subtype);
            let debounced = state
                .last_fired_ms
                .get(&subtype)
                .map_or(false, |last| now - last < cooldown);
            if debounced {
                tracing::debug!(?subtype, "imperative debounced by cooldown");
                firings.push(Firing {
                    event: ActionEvent {
                        action: subtype,
                        intent: intent.clone(),
                        utterance_id,
                        offset_ms: now,
                        was_debounced: true,
                    },
                    handler: None,
                });
                false
            } else {
                match state.window_until_ms {
                    Some(until) if now < until => {
                        // Last-wins: replace whatever was pending.
                        state.pending = Some(PendingIntent {
                            intent: intent.clone(),
                            utterance_id,
                        });
                        tracing::debug!(?subtype, "imperative held in conflict window");
                        true
                    }
                    _ => {
                        state.window_until_ms = Some(now + self.config.conflict_window_ms);
                        if self.config.fire_first_immediately {
                            firings.push(Self::fire(
                                &mut state,
                                intent.clone(),
                                utterance_id,
                                now,
                            ));
                        } else {
                            state.pending = Some(PendingIntent {
                                intent: intent.clone(),
                                utterance_id,
                            });
                        }
                        true
                    }
                }
            }
        };

        self.dispatch(firings);
        accepted
    }

    /// Close the conflict window if it expired, firing any pending intent.
    /// Poll at ≈100 ms.
    pub fn check_conflict_window(&self) {
        let now = self.clock.now_ms();
        let mut firings = Vec::new();
        {
            let mut state = self.state.lock().expect("router mutex poisoned");
            Self::close_expired_window(&self.config, &mut state, now, &mut firings);
        }
        self.dispatch(firings);
    }

    /// Fire any pending intent now, without waiting for the window.
    ///
    /// Used at session end: no further correction can arrive, so holding
    /// the pending intent any longer only loses it.
    pub fn flush(&self) {
        let now = self.clock.now_ms();
        let mut firings = Vec::new();
        {
            let mut state = self.state.lock().expect("router mutex poisoned");
            if state.window_until_ms.is_some() {
                state.window_until_ms = Some(now);
            }
            Self::close_expired_window(&self.config, &mut state, now, &mut firings);
        }
        self.dispatch(firings);
    }

    /// Clear cooldowns, the conflict window, and any pending intent.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("router mutex poisoned");
        state.last_fired_ms.clear();
        state.window_until_ms = None;
        state.pending = None;
    }

    // --- Private helpers ---

    fn close_expired_window(
        config: &RouterConfig,
        state: &mut RouterState,
        now: i64,
        firings: &mut Vec<Firing>,
    ) {
        let expired = matches!(state.window_until_ms, Some(until) if now >= until);
        if !expired {
            return;
        }
        state.window_until_ms = None;
        if let Some(pending) = state.pending.take() {
            // Cooldown state may have changed while the intent was held.
            let cooldown = config.cooldown_for(pending.intent.subtype);
            let debounced = state
                .last_fired_ms
                .get(&pending.intent.subtype)
                .map_or(false, |last| now - last < cooldown);
            if debounced {
                firings.push(Firing {
                    event: ActionEvent {
                        action: pending.intent.subtype,
                        intent: pending.intent,
                        utterance_id: pending.utterance_id,
                        offset_ms: now,
                        was_debounced: true,
                    },
                    handler: None,
                });
            } else {
                firings.push(Self::fire(state, pending.intent, pending.utterance_id, now));
            }
        }
    }

    fn fire(
        state: &mut RouterState,
        intent: DetectedIntent,
        utterance_id: Uuid,
        now: i64,
    ) -> Firing {
        let subtype = intent.subtype;
        state.last_fired_ms.insert(subtype, now);
        tracing::debug!(?subtype, utterance_id = %utterance_id, "action fired");
        Firing {
            event: ActionEvent {
                action: subtype,
                intent,
                utterance_id,
                offset_ms: now,
                was_debounced: false,
            },
            handler: state.handlers.get(&subtype).cloned(),
        }
    }

    /// Invoke handlers and publish events outside the lock. Handler panics
    /// are caught and discarded; the router keeps operating.
    fn dispatch(&self, firings: Vec<Firing>) {
        for firing in firings {
            if let Some(handler) = firing.handler {
                let event = &firing.event;
                if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                    tracing::warn!(action = ?event.action, "action handler panicked");
                }
            }
            self.bus
                .publish(SessionEvent::now(SessionPayload::Action(firing.event)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearsay_events::{InMemoryEventBus, IntentType, ManualClock};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn imperative(subtype: IntentSubtype) -> DetectedIntent {
        DetectedIntent {
            intent_type: IntentType::Imperative,
            subtype,
            confidence: 0.9,
            source_text: format!("{subtype:?}").to_lowercase(),
            original_text: format!("{subtype:?}").to_lowercase(),
            utterance_id: None,
        }
    }

    struct Fixture {
        router: ActionRouter,
        bus: Arc<InMemoryEventBus>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        fixture_with(RouterConfig::default())
    }

    fn fixture_with(config: RouterConfig) -> Fixture {
        let bus = Arc::new(InMemoryEventBus::new());
        let clock = Arc::new(ManualClock::new());
        let router = ActionRouter::new(config, clock.clone(), bus.clone() as EventBusRef);
        Fixture { router, bus, clock }
    }

    fn actions(bus: &InMemoryEventBus) -> Vec<ActionEvent> {
        bus.events_of_kind("Action")
            .into_iter()
            .map(|e| match e.payload {
                SessionPayload::Action(a) => a,
                _ => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn test_non_imperative_rejected() {
        let f = fixture();
        let question = DetectedIntent {
            intent_type: IntentType::Question,
            subtype: IntentSubtype::Definition,
            confidence: 0.8,
            source_text: "what is this".into(),
            original_text: "what is this".into(),
            utterance_id: None,
        };
        assert!(!f.router.route(&question, Uuid::new_v4()));

        let subtypeless = DetectedIntent {
            subtype: IntentSubtype::None,
            intent_type: IntentType::Imperative,
            ..question
        };
        assert!(!f.router.route(&subtypeless, Uuid::new_v4()));
        assert!(actions(&f.bus).is_empty());
    }

    #[test]
    fn test_first_arrival_fires_immediately() {
        let f = fixture();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        f.router.register_handler(IntentSubtype::Stop, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert!(f.router.route(&imperative(IntentSubtype::Stop), Uuid::new_v4()));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let fired = actions(&f.bus);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].action, IntentSubtype::Stop);
        assert!(!fired[0].was_debounced);
    }

    #[test]
    fn test_last_wins_correction() {
        let f = fixture();
        let stop_count = Arc::new(AtomicUsize::new(0));
        let continue_count = Arc::new(AtomicUsize::new(0));
        {
            let c = stop_count.clone();
            f.router
                .register_handler(IntentSubtype::Stop, move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                });
            let c = continue_count.clone();
            f.router
                .register_handler(IntentSubtype::Continue, move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                });
        }

        // "Stop."
        f.router.route(&imperative(IntentSubtype::Stop), Uuid::new_v4());
        // "Actually, continue." 800 ms later, inside the window.
        f.clock.advance(800);
        assert!(f.router.route(&imperative(IntentSubtype::Continue), Uuid::new_v4()));
        assert_eq!(continue_count.load(Ordering::SeqCst), 0, "held, not fired");

        // Window (opened at 0) closes at 1500.
        f.clock.advance(800);
        f.router.check_conflict_window();

        let fired = actions(&f.bus);
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].action, IntentSubtype::Stop);
        assert_eq!(fired[1].action, IntentSubtype::Continue);
        assert!(fired.iter().all(|a| !a.was_debounced));
        assert_eq!(stop_count.load(Ordering::SeqCst), 1);
        assert_eq!(continue_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replacement_inside_window() {
        let f = fixture();
        f.router.route(&imperative(IntentSubtype::Stop), Uuid::new_v4());
        f.clock.advance(300);
        f.router.route(&imperative(IntentSubtype::Continue), Uuid::new_v4());
        f.clock.advance(300);
        // Replaces Continue; only StartOver fires when the window closes.
        f.router.route(&imperative(IntentSubtype::StartOver), Uuid::new_v4());
        f.clock.advance(1_000);
        f.router.check_conflict_window();

        let fired = actions(&f.bus);
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[1].action, IntentSubtype::StartOver);
    }

    #[test]
    fn test_cooldown_debounce() {
        let f = fixture();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        f.router.register_handler(IntentSubtype::Repeat, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        f.router.route(&imperative(IntentSubtype::Repeat), Uuid::new_v4());
        f.clock.advance(800);
        assert!(!f.router.route(&imperative(IntentSubtype::Repeat), Uuid::new_v4()));

        let fired = actions(&f.bus);
        assert_eq!(fired.len(), 2);
        assert!(!fired[0].was_debounced);
        assert!(fired[1].was_debounced);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "handler invoked once");
    }

    #[test]
    fn test_cooldown_expires() {
        let f = fixture();
        f.router.route(&imperative(IntentSubtype::Repeat), Uuid::new_v4());
        f.clock.advance(1_600);
        f.router.route(&imperative(IntentSubtype::Repeat), Uuid::new_v4());

        let non_debounced: Vec<_> = actions(&f.bus)
            .into_iter()
            .filter(|a| !a.was_debounced)
            .collect();
        assert_eq!(non_debounced.len(), 2);
        assert!(non_debounced[1].offset_ms - non_debounced[0].offset_ms >= 1_500);
    }

    #[test]
    fn test_stop_has_no_cooldown() {
        let f = fixture();
        f.router.route(&imperative(IntentSubtype::Stop), Uuid::new_v4());
        f.clock.advance(2_000);
        f.router.route(&imperative(IntentSubtype::Stop), Uuid::new_v4());
        assert!(actions(&f.bus).iter().all(|a| !a.was_debounced));
    }

    #[test]
    fn test_handler_panic_is_contained() {
        let f = fixture();
        f.router.register_handler(IntentSubtype::Stop, |_| {
            panic!("handler exploded");
        });
        assert!(f.router.route(&imperative(IntentSubtype::Stop), Uuid::new_v4()));

        // Router still works afterwards.
        f.clock.advance(2_000);
        f.router.check_conflict_window();
        f.router.route(&imperative(IntentSubtype::Continue), Uuid::new_v4());
        assert_eq!(actions(&f.bus).len(), 2);
    }

    #[test]
    fn test_hold_first_mode() {
        let f = fixture_with(RouterConfig {
            fire_first_immediately: false,
            ..RouterConfig::default()
        });
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        f.router.register_handler(IntentSubtype::Stop, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let seen = counter.clone();
        f.router.register_handler(IntentSubtype::Continue, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        f.router.route(&imperative(IntentSubtype::Stop), Uuid::new_v4());
        assert!(actions(&f.bus).is_empty(), "first arrival is held");

        // Corrected before the window closes: Stop never fires.
        f.clock.advance(800);
        f.router.route(&imperative(IntentSubtype::Continue), Uuid::new_v4());
        f.clock.advance(800);
        f.router.check_conflict_window();

        let fired = actions(&f.bus);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].action, IntentSubtype::Continue);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_route_after_expired_window_settles_pending_first() {
        let f = fixture();
        f.router.route(&imperative(IntentSubtype::Stop), Uuid::new_v4());
        f.clock.advance(800);
        f.router.route(&imperative(IntentSubtype::Continue), Uuid::new_v4());

        // No poll happened; the next route() settles the expired window.
        f.clock.advance(5_000);
        f.router.route(&imperative(IntentSubtype::Generate), Uuid::new_v4());

        let fired = actions(&f.bus);
        assert_eq!(fired.len(), 3);
        assert_eq!(fired[0].action, IntentSubtype::Stop);
        assert_eq!(fired[1].action, IntentSubtype::Continue);
        assert_eq!(fired[2].action, IntentSubtype::Generate);
    }

    #[test]
    fn test_flush_fires_pending_before_window_closes() {
        let f = fixture();
        f.router.route(&imperative(IntentSubtype::Stop), Uuid::new_v4());
        f.clock.advance(800);
        f.router.route(&imperative(IntentSubtype::Continue), Uuid::new_v4());

        f.router.flush();
        let fired = actions(&f.bus);
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[1].action, IntentSubtype::Continue);
        assert!(!fired[1].was_debounced);
    }

    #[test]
    fn test_reset_clears_cooldowns_and_pending() {
        let f = fixture();
        f.router.route(&imperative(IntentSubtype::Repeat), Uuid::new_v4());
        f.clock.advance(100);
        f.router.reset();

        // Cooldown cleared: fires again immediately.
        f.router.route(&imperative(IntentSubtype::Repeat), Uuid::new_v4());
        let non_debounced: Vec<_> = actions(&f.bus)
            .into_iter()
            .filter(|a| !a.was_debounced)
            .collect();
        assert_eq!(non_debounced.len(), 2);
    }
}
