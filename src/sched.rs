use std::cell::UnsafeCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Emulated 32.768 kHz crystal cycles per wall-clock second.
pub const CYCLES_PER_SECOND: usize = 32_768;

#[derive(Serialize, Deserialize, Debug, PartialEq, Copy, Clone)]
pub enum RtcEvent {
    SecondTick,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Copy, Clone)]
pub enum EventType {
    Rtc(RtcEvent),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Event {
    typ: EventType,
    /// Absolute due time, in cycles
    time: usize,
}

/// Single-threaded event queue. The timeline is counted in emulated
/// crystal cycles; the host decides how fast those pass.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Scheduler {
    timestamp: usize,
    events: Vec<Event>,
}

// Opt-out of runtime borrow checking by using an unsafe cell.
// SAFETY: everything runs on the single emulation thread; handlers may
// push new events during dispatch but never hold references into the
// queue across calls.
#[repr(transparent)]
#[derive(Debug)]
pub struct SharedScheduler(Rc<UnsafeCell<Scheduler>>);

impl std::ops::Deref for SharedScheduler {
    type Target = Scheduler;

    fn deref(&self) -> &Self::Target {
        unsafe { &(*self.0.get()) }
    }
}

impl std::ops::DerefMut for SharedScheduler {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut (*self.0.get()) }
    }
}

impl Clone for SharedScheduler {
    fn clone(&self) -> SharedScheduler {
        SharedScheduler(self.0.clone())
    }
}

pub trait EventHandler {
    /// Handle a due event; `extra_cycles` is how far past its due time
    /// the timeline had already moved when it fired.
    fn handle_event(&mut self, e: EventType, extra_cycles: usize);
}

pub trait SchedulerConnect {
    fn connect_scheduler(&mut self, scheduler: SharedScheduler);
}

impl Scheduler {
    pub fn new_shared() -> SharedScheduler {
        let sched = Scheduler {
            timestamp: 0,
            events: Vec::new(),
        };
        SharedScheduler(Rc::new(UnsafeCell::new(sched)))
    }

    pub fn make_shared(self) -> SharedScheduler {
        SharedScheduler(Rc::new(UnsafeCell::new(self)))
    }

    pub fn schedule(&mut self, typ: EventType, cycles: usize) {
        let event = Event {
            typ,
            time: self.timestamp + cycles,
        };
        let idx = self
            .events
            .binary_search_by(|e| e.time.cmp(&event.time))
            .unwrap_or_else(|idx| idx);
        self.events.insert(idx, event);
    }

    /// Advances the timeline by `cycles` and dispatches everything that
    /// came due, oldest first.
    pub fn run<H: EventHandler>(&mut self, cycles: usize, handler: &mut H) {
        self.timestamp += cycles;
        while !self.events.is_empty() && self.events[0].time <= self.timestamp {
            let event = self.events.remove(0);
            handler.handle_event(event.typ, self.timestamp - event.time);
        }
    }

    pub fn cycles_to_next_event(&self) -> Option<usize> {
        self.events.first().map(|e| e.time - self.timestamp)
    }

    pub fn timestamp(&self) -> usize {
        self.timestamp
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
