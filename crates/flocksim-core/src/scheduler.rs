//! Simulation-time timers: per-agent periodic checks and a queue of one-shot events.
//!
//! Periodic rest and mortality checks are plain countdown fields owned by each agent,
//! so they disappear with the agent. Delayed contagion is a min-heap of events keyed by
//! simulation time; each event carries the target's generational handle, which stops
//! resolving once the target despawns.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::{AgentId, TIME_SLACK};
use crate::params::AgentParams;

/// Repeating countdown measured in simulation seconds.
///
/// The countdown is kept in `f64` so rounding in summed frame deltas never builds up
/// across firings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PeriodicTimer {
    interval: f32,
    until_next: f64,
}

impl PeriodicTimer {
    /// Timer whose first firing happens one full interval from now.
    #[must_use]
    pub fn new(interval: f32) -> Self {
        Self {
            interval,
            until_next: f64::from(interval),
        }
    }

    /// Seconds until the next firing.
    #[must_use]
    pub fn until_next(&self) -> f32 {
        self.until_next as f32
    }

    /// Advance by `dt`, returning how many times the timer fired.
    pub fn advance(&mut self, dt: f32) -> u32 {
        if !(self.interval > 0.0) || !(dt > 0.0) {
            return 0;
        }
        self.until_next -= f64::from(dt);
        let mut fired = 0;
        while self.until_next <= TIME_SLACK {
            self.until_next += f64::from(self.interval);
            fired += 1;
        }
        fired
    }
}

/// The two periodic checks every agent runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AgentTimers {
    pub rest_check: PeriodicTimer,
    pub mortality_check: PeriodicTimer,
}

impl AgentTimers {
    #[must_use]
    pub fn from_params(params: &AgentParams) -> Self {
        Self {
            rest_check: PeriodicTimer::new(params.sit_check_interval),
            mortality_check: PeriodicTimer::new(params.die_check_interval),
        }
    }
}

/// Effect applied when a scheduled event fires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScheduledAction {
    /// Contagion: move the target from `Alive` to `Dying`.
    BeginDying,
}

/// One-shot event due at a simulation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledEvent {
    pub due: OrderedFloat<f64>,
    /// Insertion order; breaks ties between events due at the same time.
    pub sequence: u64,
    pub target: AgentId,
    pub action: ScheduledAction,
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordering: (due ASC, sequence ASC).
impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

/// Min-heap of pending one-shot events.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<ScheduledEvent>>,
    next_sequence: u64,
}

impl EventQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `action` on `target` at simulation time `due`.
    pub fn schedule(&mut self, due: f64, target: AgentId, action: ScheduledAction) {
        let event = ScheduledEvent {
            due: OrderedFloat(due),
            sequence: self.next_sequence,
            target,
            action,
        };
        self.next_sequence += 1;
        self.heap.push(Reverse(event));
    }

    /// Pop the earliest event due at or before `now`.
    pub fn pop_due(&mut self, now: f64) -> Option<ScheduledEvent> {
        let Reverse(next) = self.heap.peek()?;
        if next.due.into_inner() > now + TIME_SLACK {
            return None;
        }
        self.heap.pop().map(|Reverse(event)| event)
    }

    /// Drop every pending event aimed at `target`, returning how many were removed.
    pub fn cancel_target(&mut self, target: AgentId) -> usize {
        let before = self.heap.len();
        self.heap.retain(|Reverse(event)| event.target != target);
        before - self.heap.len()
    }

    /// Number of pending events aimed at `target`.
    #[must_use]
    pub fn pending_for(&self, target: AgentId) -> usize {
        self.heap
            .iter()
            .filter(|Reverse(event)| event.target == target)
            .count()
    }

    /// Time of the earliest pending event.
    #[must_use]
    pub fn next_due(&self) -> Option<f64> {
        self.heap.peek().map(|Reverse(event)| event.due.into_inner())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn periodic_timer_fires_once_per_interval() {
        let mut timer = PeriodicTimer::new(1.0);
        assert_eq!(timer.advance(0.5), 0);
        assert_eq!(timer.advance(0.5), 1);
        assert_eq!(timer.advance(0.25), 0);
        assert_eq!(timer.advance(2.75), 3);
        assert_eq!(timer.advance(0.0), 0);
    }

    #[test]
    fn periodic_timer_fires_on_schedule_with_inexact_frame_deltas() {
        let cases = [(0.1_f32, 10_u32), (1.0 / 30.0, 30), (1.0 / 60.0, 60), (0.2, 5)];
        for (dt, ticks_per_fire) in cases {
            let mut timer = PeriodicTimer::new(1.0);
            let mut fired_at = Vec::new();
            for tick in 1..=ticks_per_fire * 50 {
                if timer.advance(dt) > 0 {
                    fired_at.push(tick);
                }
            }
            let expected: Vec<u32> = (1..=50).map(|n| n * ticks_per_fire).collect();
            assert_eq!(fired_at, expected, "dt={dt}");
        }
    }

    #[test]
    fn periodic_timer_survives_many_ticks() {
        let mut timer = PeriodicTimer::new(0.3);
        let fired: u32 = (0..1_000).map(|_| timer.advance(0.1)).sum();
        assert!((332..=334).contains(&fired), "fired {fired}");
    }

    #[test]
    fn queue_pops_in_time_then_insertion_order() {
        let mut keys: SlotMap<AgentId, ()> = SlotMap::with_key();
        let a = keys.insert(());
        let b = keys.insert(());
        let c = keys.insert(());

        let mut queue = EventQueue::new();
        queue.schedule(2.0, a, ScheduledAction::BeginDying);
        queue.schedule(1.0, b, ScheduledAction::BeginDying);
        queue.schedule(1.0, c, ScheduledAction::BeginDying);
        assert_eq!(queue.next_due(), Some(1.0));

        assert!(queue.pop_due(0.5).is_none());
        assert_eq!(queue.pop_due(1.0).map(|e| e.target), Some(b));
        assert_eq!(queue.pop_due(1.0).map(|e| e.target), Some(c));
        assert!(queue.pop_due(1.5).is_none());
        assert_eq!(queue.pop_due(5.0).map(|e| e.target), Some(a));
        assert!(queue.is_empty());
    }

    #[test]
    fn cancel_target_invalidates_pending_events() {
        let mut keys: SlotMap<AgentId, ()> = SlotMap::with_key();
        let a = keys.insert(());
        let b = keys.insert(());
        let mut queue = EventQueue::new();
        queue.schedule(1.0, a, ScheduledAction::BeginDying);
        queue.schedule(1.5, a, ScheduledAction::BeginDying);
        queue.schedule(2.0, b, ScheduledAction::BeginDying);
        assert_eq!(queue.pending_for(a), 2);
        assert_eq!(queue.cancel_target(a), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop_due(10.0).map(|e| e.target), Some(b));
    }
}
