//! Scheduler - hashed timing wheel with bounded overflow heap
//!
//! S slots of d nanoseconds each (span = S * d). Insertion and per-tick
//! work are O(1) amortized; timers beyond the span park in a bounded
//! binary heap and migrate into the wheel as their due time approaches.
//! Cancelled timers are marked and skipped when due - they never fire.
//!
//! The wheel drives heartbeats, periodic fill checks, and order-ack
//! timeouts. It runs on the scheduler thread (or folded into the hot loop
//! in single-threaded deployments); tokens are handed back to the caller,
//! which owns the dispatch table.

use crate::config::SchedulerConfig;
use crate::core_types::{CallbackId, Nanos};
use crate::errors::{EngineError, EngineResult};
use rustc_hash::FxHashSet;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// One armed timer
#[derive(Debug, Clone, Copy)]
struct WheelEntry<T> {
    id: CallbackId,
    due_ns: Nanos,
    priority: u8,
    token: T,
}

/// Heap ordering key for overflow entries: earliest due, then priority,
/// then id for total order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct HeapKey(Nanos, u8, CallbackId);

/// The timing wheel. `T` is the caller's dispatch token, kept POD.
#[derive(Debug)]
pub struct TimerWheel<T> {
    slots: Vec<Vec<WheelEntry<T>>>,
    slot_ns: Nanos,
    span_ns: Nanos,
    /// Wall of the last processed tick
    cursor_ns: Nanos,
    overflow: BinaryHeap<Reverse<(HeapKey, WheelEntryBox<T>)>>,
    overflow_capacity: usize,
    /// Ids of timers that are armed and not cancelled; the fire path
    /// delivers only members of this set
    armed: FxHashSet<CallbackId>,
    next_id: CallbackId,
}

// BinaryHeap needs Ord on the payload; wrap the entry and delegate to the key.
#[derive(Debug, Clone, Copy)]
struct WheelEntryBox<T>(WheelEntry<T>);

impl<T> PartialEq for WheelEntryBox<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}
impl<T> Eq for WheelEntryBox<T> {}
impl<T> PartialOrd for WheelEntryBox<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for WheelEntryBox<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.id.cmp(&other.0.id)
    }
}

impl<T: Copy> TimerWheel<T> {
    pub fn new(config: &SchedulerConfig) -> Self {
        let mut slots = Vec::with_capacity(config.slots);
        slots.resize_with(config.slots, || Vec::with_capacity(8));
        Self {
            slot_ns: config.slot_ns,
            span_ns: config.slot_ns * config.slots as Nanos,
            slots,
            cursor_ns: 0,
            overflow: BinaryHeap::with_capacity(config.overflow_capacity),
            overflow_capacity: config.overflow_capacity,
            armed: FxHashSet::default(),
            next_id: 1,
        }
    }

    /// Wheel horizon from the current cursor
    #[inline]
    pub fn span_ns(&self) -> Nanos {
        self.span_ns
    }

    /// Armed, uncancelled timers
    #[inline]
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    /// Arm a timer at an absolute due time
    pub fn schedule_at(&mut self, due_ns: Nanos, priority: u8, token: T) -> EngineResult<CallbackId> {
        let id = self.next_id;
        let entry = WheelEntry {
            id,
            due_ns,
            priority,
            token,
        };
        self.insert(entry)?;
        self.next_id += 1;
        self.armed.insert(id);
        Ok(id)
    }

    /// Arm a timer `delta_ns` after the cursor
    pub fn schedule_after(&mut self, delta_ns: Nanos, priority: u8, token: T) -> EngineResult<CallbackId> {
        self.schedule_at(self.cursor_ns.saturating_add(delta_ns), priority, token)
    }

    fn insert(&mut self, entry: WheelEntry<T>) -> EngineResult<()> {
        if entry.due_ns >= self.cursor_ns.saturating_add(self.span_ns) {
            // Beyond the wheel horizon: bounded overflow heap
            if self.overflow.len() >= self.overflow_capacity {
                return Err(EngineError::QueueFull("scheduler overflow heap"));
            }
            let key = HeapKey(entry.due_ns, entry.priority, entry.id);
            self.overflow.push(Reverse((key, WheelEntryBox(entry))));
        } else {
            let slot = ((entry.due_ns / self.slot_ns) % self.slots.len() as Nanos) as usize;
            self.slots[slot].push(entry);
        }
        Ok(())
    }

    /// Cancel an armed timer. True iff it had not fired or been cancelled.
    pub fn cancel(&mut self, id: CallbackId) -> bool {
        // The entry stays in its slot; disarming makes the fire path skip it.
        self.armed.remove(&id)
    }

    /// Advance to `now_ns`, appending every due (id, token) to `due`.
    ///
    /// Tokens come out in (due_time, priority, id) order. Cancelled timers
    /// are dropped here, never delivered.
    pub fn tick(&mut self, now_ns: Nanos, due: &mut Vec<(CallbackId, T)>) {
        if now_ns < self.cursor_ns {
            return;
        }

        // Pull matured overflow entries into the wheel first
        while let Some(Reverse((key, _))) = self.overflow.peek() {
            if key.0 >= self.cursor_ns.saturating_add(self.span_ns) && key.0 > now_ns {
                break;
            }
            let Reverse((_, boxed)) = self.overflow.pop().unwrap();
            let slot = ((boxed.0.due_ns / self.slot_ns) % self.slots.len() as Nanos) as usize;
            self.slots[slot].push(boxed.0);
        }

        let start = self.fired_cursor_slot();
        let slots_to_walk =
            (((now_ns - self.cursor_ns) / self.slot_ns) as usize + 1).min(self.slots.len());

        let mut fired: Vec<WheelEntry<T>> = Vec::new();
        for i in 0..slots_to_walk {
            let slot = (start + i) % self.slots.len();
            // Keep entries for future wheel rounds; extract the due ones
            let mut j = 0;
            while j < self.slots[slot].len() {
                if self.slots[slot][j].due_ns <= now_ns {
                    fired.push(self.slots[slot].swap_remove(j));
                } else {
                    j += 1;
                }
            }
        }

        fired.sort_by_key(|e| (e.due_ns, e.priority, e.id));
        for entry in fired {
            if self.armed.remove(&entry.id) {
                due.push((entry.id, entry.token));
            }
        }

        self.cursor_ns = now_ns;
    }

    #[inline]
    fn fired_cursor_slot(&self) -> usize {
        ((self.cursor_ns / self.slot_ns) % self.slots.len() as Nanos) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            slots: 16,
            slot_ns: 1_000,
            overflow_capacity: 8,
        }
    }

    #[test]
    fn test_fire_in_due_order() {
        let mut wheel: TimerWheel<u32> = TimerWheel::new(&config());
        wheel.schedule_at(5_000, 0, 50).unwrap();
        wheel.schedule_at(2_000, 0, 20).unwrap();
        wheel.schedule_at(3_000, 0, 30).unwrap();

        let mut due = Vec::new();
        wheel.tick(10_000, &mut due);
        let tokens: Vec<u32> = due.iter().map(|&(_, t)| t).collect();
        assert_eq!(tokens, vec![20, 30, 50]);
        assert!(wheel.is_empty());
    }

    #[test]
    fn test_not_due_yet_stays_armed() {
        let mut wheel: TimerWheel<u32> = TimerWheel::new(&config());
        wheel.schedule_at(9_000, 0, 90).unwrap();

        let mut due = Vec::new();
        wheel.tick(5_000, &mut due);
        assert!(due.is_empty());
        assert_eq!(wheel.len(), 1);

        wheel.tick(9_500, &mut due);
        assert_eq!(due.len(), 1);
    }

    #[test]
    fn test_cancelled_never_fires() {
        let mut wheel: TimerWheel<u32> = TimerWheel::new(&config());
        let keep = wheel.schedule_at(4_000, 0, 1).unwrap();
        let drop_id = wheel.schedule_at(4_000, 0, 2).unwrap();

        assert!(wheel.cancel(drop_id));
        // Double-cancel and unknown ids refused
        assert!(!wheel.cancel(drop_id));
        assert!(!wheel.cancel(9_999));

        let mut due = Vec::new();
        wheel.tick(10_000, &mut due);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, keep);
    }

    #[test]
    fn test_priority_breaks_same_due_ties() {
        let mut wheel: TimerWheel<u32> = TimerWheel::new(&config());
        wheel.schedule_at(1_000, 5, 55).unwrap();
        wheel.schedule_at(1_000, 1, 11).unwrap();

        let mut due = Vec::new();
        wheel.tick(2_000, &mut due);
        assert_eq!(due[0].1, 11);
        assert_eq!(due[1].1, 55);
    }

    #[test]
    fn test_beyond_span_goes_to_overflow_and_fires() {
        let mut wheel: TimerWheel<u32> = TimerWheel::new(&config());
        // span = 16 us; 100 us is far beyond
        wheel.schedule_at(100_000, 0, 7).unwrap();
        assert_eq!(wheel.len(), 1);

        let mut due = Vec::new();
        wheel.tick(50_000, &mut due);
        assert!(due.is_empty());

        wheel.tick(100_000, &mut due);
        assert_eq!(due, vec![(1, 7)]);
    }

    #[test]
    fn test_overflow_heap_bounded() {
        let mut wheel: TimerWheel<u32> = TimerWheel::new(&config());
        for i in 0..8 {
            wheel.schedule_at(1_000_000 + i, 0, i as u32).unwrap();
        }
        assert!(matches!(
            wheel.schedule_at(2_000_000, 0, 99),
            Err(EngineError::QueueFull(_))
        ));
    }

    #[test]
    fn test_schedule_after_uses_cursor() {
        let mut wheel: TimerWheel<u32> = TimerWheel::new(&config());
        let mut due = Vec::new();
        wheel.tick(5_000, &mut due);

        wheel.schedule_after(2_000, 0, 42).unwrap();
        wheel.tick(6_999, &mut due);
        assert!(due.is_empty());
        wheel.tick(7_000, &mut due);
        assert_eq!(due, vec![(1, 42)]);
    }

    #[test]
    fn test_rearm_pattern_for_heartbeats() {
        // A callback that re-arms itself each round, the heartbeat shape
        let mut wheel: TimerWheel<u32> = TimerWheel::new(&config());
        wheel.schedule_at(1_000, 0, 1).unwrap();

        let mut fired_times = Vec::new();
        let mut now = 0;
        for _ in 0..5 {
            now += 1_000;
            let mut due = Vec::new();
            wheel.tick(now, &mut due);
            for (_, token) in due {
                fired_times.push(now);
                wheel.schedule_after(1_000, 0, token).unwrap();
            }
        }
        assert_eq!(fired_times, vec![1_000, 2_000, 3_000, 4_000, 5_000]);
    }
}
