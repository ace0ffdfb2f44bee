use log::debug;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::membership::PeerId;
use crate::message::CorrelationId;

/// Handle of one scheduled timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutId(pub Uuid);

impl TimeoutId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TimeoutId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TimeoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a timeout means when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutContext {
    // Time to probe another peer
    PeriodicProbe,
    // No response to the direct probe with this correlation id
    DirectProbe {
        target: PeerId,
        correlation: CorrelationId,
    },
    // Suspect did not refute in time
    Escalation {
        suspect: PeerId,
        correlation: CorrelationId,
    },
    // Relayed probe went unanswered
    Relay { correlation: CorrelationId },
    ViewDump,
}

/// A timeout as handed to the timer service and delivered back on firing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeout {
    pub id: TimeoutId,
    pub context: TimeoutContext,
}

/// The timer service the node schedules its timeouts with.
///
/// Firing must deliver the same `Timeout` back into the node's event stream.
/// Implementations may fire a timeout that was cancelled moments before; the
/// node ignores it.
#[cfg_attr(test, mockall::automock)]
pub trait Timer {
    fn schedule_once(&mut self, delay: Duration, timeout: Timeout);

    fn schedule_periodic(&mut self, initial_delay: Duration, period: Duration, timeout: Timeout);

    fn cancel(&mut self, id: TimeoutId);
}

struct Entry {
    context: TimeoutContext,
    periodic: bool,
}

/// Outstanding timeouts of one node.
///
/// A firing is only acted upon while its id is still registered, which makes
/// cancellation and late delivery race-free.
#[derive(Default)]
pub struct TimeoutRegistry {
    live: HashMap<TimeoutId, Entry>,
}

impl TimeoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_once(
        &mut self,
        timer: &mut dyn Timer,
        delay: Duration,
        context: TimeoutContext,
    ) -> TimeoutId {
        let id = TimeoutId::new();
        self.live.insert(
            id,
            Entry {
                context: context.clone(),
                periodic: false,
            },
        );
        timer.schedule_once(delay, Timeout { id, context });
        id
    }

    pub fn schedule_periodic(
        &mut self,
        timer: &mut dyn Timer,
        initial_delay: Duration,
        period: Duration,
        context: TimeoutContext,
    ) -> TimeoutId {
        let id = TimeoutId::new();
        self.live.insert(
            id,
            Entry {
                context: context.clone(),
                periodic: true,
            },
        );
        timer.schedule_periodic(initial_delay, period, Timeout { id, context });
        id
    }

    /// Cancel a timeout. Returns `false` if it was not live (already fired or
    /// already cancelled), in which case the timer service is left alone.
    pub fn cancel(&mut self, timer: &mut dyn Timer, id: TimeoutId) -> bool {
        if self.live.remove(&id).is_none() {
            return false;
        }
        timer.cancel(id);
        true
    }

    /// Accept a firing. One-shot timeouts are consumed; periodic ones stay
    /// live. Returns `None` for firings of timeouts no longer registered.
    pub fn fire(&mut self, id: TimeoutId) -> Option<TimeoutContext> {
        let periodic = match self.live.get(&id) {
            Some(entry) => entry.periodic,
            None => {
                debug!("Ignoring firing of stale timeout {}", id);
                return None;
            }
        };

        if periodic {
            self.live.get(&id).map(|entry| entry.context.clone())
        } else {
            self.live.remove(&id).map(|entry| entry.context)
        }
    }

    pub fn is_live(&self, id: TimeoutId) -> bool {
        self.live.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Cancel everything, e.g. when the node stops.
    pub fn cancel_all(&mut self, timer: &mut dyn Timer) {
        for (id, _) in self.live.drain() {
            timer.cancel(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    #[test]
    fn test_one_shot_fires_once() {
        let mut timer = MockTimer::new();
        timer.expect_schedule_once().times(1).return_const(());
        let mut registry = TimeoutRegistry::new();

        let id = registry.schedule_once(
            &mut timer,
            Duration::from_millis(10),
            TimeoutContext::ViewDump,
        );

        assert_eq!(registry.fire(id), Some(TimeoutContext::ViewDump));
        assert_eq!(registry.fire(id), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_periodic_stays_live_until_cancelled() {
        let mut timer = MockTimer::new();
        timer.expect_schedule_periodic().times(1).return_const(());
        timer.expect_cancel().times(1).return_const(());
        let mut registry = TimeoutRegistry::new();

        let id = registry.schedule_periodic(
            &mut timer,
            Duration::from_millis(10),
            Duration::from_millis(10),
            TimeoutContext::PeriodicProbe,
        );

        assert!(registry.fire(id).is_some());
        assert!(registry.fire(id).is_some());
        assert!(registry.cancel(&mut timer, id));
        assert!(registry.fire(id).is_none());
    }

    #[test]
    fn test_double_cancel_reaches_timer_once() {
        let mut timer = MockTimer::new();
        timer.expect_schedule_once().return_const(());
        let mut registry = TimeoutRegistry::new();
        let id = registry.schedule_once(
            &mut timer,
            Duration::from_millis(10),
            TimeoutContext::ViewDump,
        );
        timer.expect_cancel().with(eq(id)).times(1).return_const(());

        assert!(registry.cancel(&mut timer, id));
        assert!(!registry.cancel(&mut timer, id));
        assert!(registry.fire(id).is_none());
    }
}
