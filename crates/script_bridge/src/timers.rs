//! # Timer Subsystem
//!
//! Script-scheduled timers advanced once per server tick.
//!
//! ## Identifiers
//!
//! Timers live in a slot table. An id packs the slot index with the slot's
//! generation, and freeing a timer bumps the generation before the slot is
//! reused. A stale id therefore reports [`TimerError::Freed`] instead of
//! silently addressing whichever timer took over its slot.
//!
//! ## Ticking
//!
//! A tick is split in three phases so callbacks can run without the subsystem
//! being borrowed:
//!
//! 1. [`TimerSubsystem::begin_tick`] advances every running timer and records
//!    how many times each one is due.
//! 2. [`TimerSubsystem::next_fire`] hands out one due callback at a time.
//!    Callbacks may create, stop, restart or free timers in between.
//! 3. [`TimerSubsystem::end_tick`] removes timers freed during the pass.
//!
//! For a repeating timer of period `P`, a total elapsed time `T` fires the
//! callback exactly `⌊T/P⌋` times, however `T` is split across ticks.

use crate::engine::{ModuleRef, ScriptTarget};
use crate::error::TimerError;
use crate::value::ScriptValue;
use std::fmt;

/// Generations wrap within 31 bits so a packed id is never negative.
const GENERATION_MASK: u32 = 0x7FFF_FFFF;

/// Handle of a timer, exposed to scripts as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    index: u32,
    generation: u32,
}

impl TimerId {
    pub fn to_raw(self) -> i64 {
        (i64::from(self.generation & GENERATION_MASK) << 32) | i64::from(self.index)
    }

    /// Decodes a script-side handle. Negative values never name a timer.
    pub fn from_raw(raw: i64) -> Option<Self> {
        if raw < 0 {
            return None;
        }
        Some(Self {
            index: (raw & 0xFFFF_FFFF) as u32,
            generation: (raw >> 32) as u32,
        })
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_raw())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    Repeating,
    OneShot,
}

/// A due callback handed out by [`TimerSubsystem::next_fire`].
#[derive(Debug, Clone, PartialEq)]
pub struct FireJob {
    pub id: TimerId,
    pub callback: ScriptTarget,
    pub args: Vec<ScriptValue>,
}

#[derive(Debug)]
struct Timer {
    callback: ScriptTarget,
    args: Vec<ScriptValue>,
    period: i64,
    remaining: i64,
    running: bool,
    pending_free: bool,
    mode: TimerMode,
    elapsed: bool,
    due: u64,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    timer: Option<Timer>,
}

/// Owner of all timers.
#[derive(Debug, Default)]
pub struct TimerSubsystem {
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    ticking: bool,
    cursor: usize,
}

impl TimerSubsystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repeating timer, already running with a full period.
    pub fn create(&mut self, callback: ScriptTarget, period: i64) -> Result<TimerId, TimerError> {
        self.create_with(callback, period, Vec::new(), TimerMode::Repeating)
    }

    /// Creates a timer with bound arguments and an explicit mode.
    pub fn create_with(
        &mut self,
        callback: ScriptTarget,
        period: i64,
        args: Vec<ScriptValue>,
        mode: TimerMode,
    ) -> Result<TimerId, TimerError> {
        if period <= 0 {
            return Err(TimerError::InvalidPeriod(period));
        }

        let timer = Timer {
            callback,
            args,
            period,
            remaining: period,
            running: true,
            pending_free: false,
            mode,
            elapsed: false,
            due: 0,
        };

        let index = match self.free_slots.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    timer: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.timer = Some(timer);

        Ok(TimerId {
            index,
            generation: slot.generation,
        })
    }

    /// Resumes a stopped timer. A timer whose countdown already completed is
    /// re-armed with a full period.
    pub fn start(&mut self, id: TimerId) -> Result<(), TimerError> {
        let timer = self.live_mut(id)?;
        if !timer.running {
            timer.running = true;
            if timer.remaining <= 0 {
                timer.remaining = timer.period;
            }
        }
        Ok(())
    }

    /// Pauses a timer, dropping any catch-up fires still due in this tick.
    pub fn stop(&mut self, id: TimerId) -> Result<(), TimerError> {
        let timer = self.live_mut(id)?;
        timer.running = false;
        timer.due = 0;
        Ok(())
    }

    /// Sets a new period and restarts the countdown from it.
    pub fn restart(&mut self, id: TimerId, period: i64) -> Result<(), TimerError> {
        if period <= 0 {
            // still report stale ids first
            self.live_mut(id)?;
            return Err(TimerError::InvalidPeriod(period));
        }
        let timer = self.live_mut(id)?;
        timer.period = period;
        timer.remaining = period;
        timer.running = true;
        timer.due = 0;
        Ok(())
    }

    /// Frees a timer. During a tick the slot is only released by
    /// [`end_tick`](Self::end_tick).
    pub fn free(&mut self, id: TimerId) -> Result<(), TimerError> {
        let ticking = self.ticking;
        let timer = self.live_mut(id)?;
        timer.running = false;
        timer.due = 0;
        timer.pending_free = true;
        if !ticking {
            self.release(id.index);
        }
        Ok(())
    }

    /// True when the timer fired since the previous call. Clears the flag.
    pub fn is_elapsed(&mut self, id: TimerId) -> Result<bool, TimerError> {
        let timer = self.live_mut(id)?;
        Ok(std::mem::take(&mut timer.elapsed))
    }

    pub fn is_running(&self, id: TimerId) -> Result<bool, TimerError> {
        self.live(id).map(|t| t.running)
    }

    pub fn remaining(&self, id: TimerId) -> Result<i64, TimerError> {
        self.live(id).map(|t| t.remaining)
    }

    pub fn period(&self, id: TimerId) -> Result<i64, TimerError> {
        self.live(id).map(|t| t.period)
    }

    /// Frees every timer whose callback lives in `module`.
    pub fn free_module(&mut self, module: ModuleRef) -> usize {
        let owned: Vec<TimerId> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.timer
                    .as_ref()
                    .is_some_and(|t| !t.pending_free && t.callback.module_ref() == module)
            })
            .map(|(index, slot)| TimerId {
                index: index as u32,
                generation: slot.generation,
            })
            .collect();

        let mut freed = 0;
        for id in owned {
            if self.free(id).is_ok() {
                freed += 1;
            }
        }
        freed
    }

    /// Number of timers that have not been freed.
    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.timer.as_ref().is_some_and(|t| !t.pending_free))
            .count()
    }

    /// Advances every running timer by `elapsed` milliseconds and records
    /// how many fires each one owes.
    pub fn begin_tick(&mut self, elapsed: i64) {
        self.ticking = true;
        self.cursor = 0;

        for timer in self.slots.iter_mut().filter_map(|s| s.timer.as_mut()) {
            if !timer.running || timer.pending_free {
                continue;
            }
            timer.remaining -= elapsed;
            if timer.remaining > 0 {
                continue;
            }
            let fires = (-timer.remaining) / timer.period + 1;
            timer.remaining += fires * timer.period;
            timer.due = match timer.mode {
                TimerMode::Repeating => fires as u64,
                TimerMode::OneShot => 1,
            };
        }
    }

    /// Pops the next due callback of the current tick, in slot order.
    pub fn next_fire(&mut self) -> Option<FireJob> {
        while self.cursor < self.slots.len() {
            let slot = &mut self.slots[self.cursor];
            let generation = slot.generation;

            if let Some(timer) = slot.timer.as_mut() {
                if timer.due > 0 && timer.running && !timer.pending_free {
                    timer.due -= 1;
                    timer.elapsed = true;
                    if timer.mode == TimerMode::OneShot {
                        timer.running = false;
                        timer.due = 0;
                        timer.remaining = timer.period;
                    }
                    return Some(FireJob {
                        id: TimerId {
                            index: self.cursor as u32,
                            generation,
                        },
                        callback: timer.callback.clone(),
                        args: timer.args.clone(),
                    });
                }
            }
            self.cursor += 1;
        }
        None
    }

    /// Ends the current tick, releasing timers freed during it.
    pub fn end_tick(&mut self) {
        self.ticking = false;
        let pending: Vec<u32> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.timer.as_ref().is_some_and(|t| t.pending_free))
            .map(|(i, _)| i as u32)
            .collect();
        for index in pending {
            self.release(index);
        }
    }

    /// Runs a whole tick, calling `fire` for every due callback.
    pub fn tick<F>(&mut self, elapsed: i64, mut fire: F) -> usize
    where
        F: FnMut(&FireJob),
    {
        self.begin_tick(elapsed);
        let mut fired = 0;
        while let Some(job) = self.next_fire() {
            fire(&job);
            fired += 1;
        }
        self.end_tick();
        fired
    }

    fn release(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.timer = None;
        slot.generation = slot.generation.wrapping_add(1) & GENERATION_MASK;
        self.free_slots.push(index);
    }

    fn resolve(&self, id: TimerId) -> Result<&Slot, TimerError> {
        let slot = self
            .slots
            .get(id.index as usize)
            .ok_or(TimerError::NotFound(id.to_raw()))?;
        if id.generation > slot.generation {
            return Err(TimerError::NotFound(id.to_raw()));
        }
        Ok(slot)
    }

    fn live(&self, id: TimerId) -> Result<&Timer, TimerError> {
        let slot = self.resolve(id)?;
        match slot.timer.as_ref() {
            Some(timer) if slot.generation == id.generation && !timer.pending_free => Ok(timer),
            _ => Err(TimerError::Freed(id.to_raw())),
        }
    }

    fn live_mut(&mut self, id: TimerId) -> Result<&mut Timer, TimerError> {
        self.resolve(id)?;
        let slot = &mut self.slots[id.index as usize];
        match slot.timer.as_mut() {
            Some(timer) if slot.generation == id.generation && !timer.pending_free => Ok(timer),
            _ => Err(TimerError::Freed(id.to_raw())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback(name: &str) -> ScriptTarget {
        ScriptTarget {
            engine: 0,
            module: 0,
            function: name.to_string(),
        }
    }

    #[test]
    fn test_create_starts_running() {
        let mut timers = TimerSubsystem::new();
        let id = timers.create(callback("cb"), 1000).unwrap();
        assert!(timers.is_running(id).unwrap());
        assert_eq!(timers.remaining(id).unwrap(), 1000);
        assert_eq!(
            timers.create(callback("cb"), 0),
            Err(TimerError::InvalidPeriod(0))
        );
    }

    #[test]
    fn test_single_tick_catches_up() {
        let mut timers = TimerSubsystem::new();
        let id = timers.create(callback("cb"), 1000).unwrap();

        let fired = timers.tick(2500, |job| assert_eq!(job.id, id));
        assert_eq!(fired, 2);
        assert_eq!(timers.remaining(id).unwrap(), 500);
    }

    #[test]
    fn test_fires_floor_of_total_elapsed() {
        for (period, steps) in [(1000, vec![300, 300, 300, 300]), (7, vec![3; 20]), (250, vec![1000, 1, 249])] {
            let mut timers = TimerSubsystem::new();
            timers.create(callback("cb"), period).unwrap();
            let total: i64 = steps.iter().sum();
            let fired: usize = steps.iter().map(|s| timers.tick(*s, |_| {})).sum();
            assert_eq!(fired as i64, total / period, "period {period}, total {total}");
        }
    }

    #[test]
    fn test_stopped_timer_does_not_advance() {
        let mut timers = TimerSubsystem::new();
        let id = timers.create(callback("cb"), 100).unwrap();
        timers.stop(id).unwrap();
        assert_eq!(timers.tick(500, |_| {}), 0);
        assert_eq!(timers.remaining(id).unwrap(), 100);

        timers.start(id).unwrap();
        assert_eq!(timers.tick(100, |_| {}), 1);
    }

    #[test]
    fn test_one_shot_fires_once() {
        let mut timers = TimerSubsystem::new();
        let id = timers
            .create_with(callback("once"), 100, vec![ScriptValue::Int(4)], TimerMode::OneShot)
            .unwrap();

        let mut args = Vec::new();
        let fired = timers.tick(350, |job| args.push(job.args.clone()));
        assert_eq!(fired, 1);
        assert_eq!(args, vec![vec![ScriptValue::Int(4)]]);
        assert!(!timers.is_running(id).unwrap());
        assert_eq!(timers.tick(1000, |_| {}), 0);
    }

    #[test]
    fn test_freed_id_reports_freed() {
        let mut timers = TimerSubsystem::new();
        let id = timers.create(callback("cb"), 100).unwrap();
        timers.free(id).unwrap();

        assert_eq!(timers.start(id), Err(TimerError::Freed(id.to_raw())));
        assert_eq!(timers.stop(id), Err(TimerError::Freed(id.to_raw())));
        assert_eq!(timers.restart(id, 10), Err(TimerError::Freed(id.to_raw())));
        assert_eq!(timers.is_elapsed(id), Err(TimerError::Freed(id.to_raw())));
        assert_eq!(timers.free(id), Err(TimerError::Freed(id.to_raw())));

        // the slot is reused without reviving the stale id
        let replacement = timers.create(callback("other"), 100).unwrap();
        assert_ne!(replacement, id);
        assert_eq!(timers.tick(100, |job| assert_eq!(job.id, replacement)), 1);
        assert_eq!(timers.remaining(id), Err(TimerError::Freed(id.to_raw())));
    }

    #[test]
    fn test_unknown_id() {
        let mut timers = TimerSubsystem::new();
        let bogus = TimerId::from_raw(42).unwrap();
        assert_eq!(timers.start(bogus), Err(TimerError::NotFound(42)));
        assert!(TimerId::from_raw(-1).is_none());
    }

    #[test]
    fn test_free_during_tick_is_deferred() {
        let mut timers = TimerSubsystem::new();
        let a = timers.create(callback("a"), 100).unwrap();
        let b = timers.create(callback("b"), 100).unwrap();

        timers.begin_tick(300);
        let first = timers.next_fire().unwrap();
        assert_eq!(first.id, a);
        timers.free(a).unwrap();
        timers.free(b).unwrap();
        // neither the remaining fires of a nor any fire of b happen
        assert!(timers.next_fire().is_none());
        assert_eq!(timers.active_count(), 0);
        timers.end_tick();

        let c = timers.create(callback("c"), 100).unwrap();
        assert_ne!(c, a);
        assert_ne!(c, b);
    }

    #[test]
    fn test_stop_inside_callback_drops_catch_up() {
        let mut timers = TimerSubsystem::new();
        let id = timers.create(callback("cb"), 100).unwrap();

        timers.begin_tick(500);
        assert!(timers.next_fire().is_some());
        timers.stop(id).unwrap();
        assert!(timers.next_fire().is_none());
        timers.end_tick();

        timers.start(id).unwrap();
        timers.begin_tick(0);
        timers.restart(id, 50).unwrap();
        assert!(timers.next_fire().is_none());
        timers.end_tick();
        assert_eq!(timers.remaining(id).unwrap(), 50);
    }

    #[test]
    fn test_is_elapsed_clears_flag() {
        let mut timers = TimerSubsystem::new();
        let id = timers.create(callback("cb"), 100).unwrap();
        assert!(!timers.is_elapsed(id).unwrap());
        timers.tick(100, |_| {});
        assert!(timers.is_elapsed(id).unwrap());
        assert!(!timers.is_elapsed(id).unwrap());
    }

    #[test]
    fn test_raw_id_round_trip() {
        let id = TimerId {
            index: 3,
            generation: 2,
        };
        assert_eq!(TimerId::from_raw(id.to_raw()), Some(id));
    }

    #[test]
    fn test_generation_wraps_without_going_negative() {
        let mut timers = TimerSubsystem::new();
        let first = timers.create(callback("cb"), 10).unwrap();
        timers.free(first).unwrap();
        timers.slots[0].generation = GENERATION_MASK;

        let last = timers.create(callback("cb"), 10).unwrap();
        assert!(last.to_raw() >= 0);
        assert_eq!(TimerId::from_raw(last.to_raw()), Some(last));

        timers.free(last).unwrap();
        let wrapped = timers.create(callback("cb"), 10).unwrap();
        assert_eq!(wrapped.generation, 0);
        assert!(wrapped.to_raw() >= 0);
        assert!(timers.is_running(last).is_err());
        assert!(timers.is_running(wrapped).unwrap());
    }

    #[test]
    fn test_free_module_releases_only_its_timers() {
        let mut timers = TimerSubsystem::new();
        let other = ScriptTarget {
            engine: 0,
            module: 1,
            function: "cb".to_string(),
        };
        let mine = timers.create(callback("a"), 10).unwrap();
        timers.create(callback("b"), 20).unwrap();
        let kept = timers.create(other, 10).unwrap();

        let module = ModuleRef { engine: 0, module: 0 };
        assert_eq!(timers.free_module(module), 2);
        assert_eq!(timers.active_count(), 1);
        assert_eq!(timers.is_running(mine), Err(TimerError::Freed(mine.to_raw())));
        assert!(timers.is_running(kept).unwrap());
    }
}
