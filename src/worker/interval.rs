//! Periodic callbacks local to one execution context
//!
//! Intervals are polled, not scheduled: the owning loop calls `tick` once per
//! iteration and every entry whose due time has passed fires once. A late
//! tick never fires an entry twice, and the next due time is computed from
//! the tick time, so drift accumulates instead of being compensated.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::script::{self, CallbackRef, Clock, ScriptContext};

/// Period used when `setInterval` is given no usable delay, in seconds
pub const DEFAULT_PERIOD: f64 = 0.016;

/// Interval identity, unique within its registry and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntervalId(u32);

impl IntervalId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for IntervalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct Interval {
    callback: CallbackRef,
    period: f64,
    next_due: f64,
}

pub struct IntervalRegistry {
    clock: Arc<dyn Clock>,
    entries: RefCell<BTreeMap<IntervalId, Interval>>,
    next_id: Cell<u32>,
}

impl IntervalRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: RefCell::new(BTreeMap::new()),
            next_id: Cell::new(1),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Register `callback` to fire every `period` seconds, first at
    /// `now + period`.
    pub fn add(&self, callback: CallbackRef, period: Option<f64>) -> IntervalId {
        let period = match period {
            Some(p) if p.is_finite() && p > 0.0 => p,
            _ => DEFAULT_PERIOD,
        };

        let id = IntervalId(self.next_id.get());
        self.next_id.set(id.0.wrapping_add(1));

        let next_due = self.clock.now() + period;
        self.entries.borrow_mut().insert(
            id,
            Interval {
                callback,
                period,
                next_due,
            },
        );
        tracing::trace!(%id, period, "interval added");
        id
    }

    /// Remove an interval. Unknown ids are ignored.
    pub fn remove(&self, id: IntervalId) -> Option<CallbackRef> {
        self.entries
            .borrow_mut()
            .remove(&id)
            .map(|interval| interval.callback)
    }

    pub fn contains(&self, id: IntervalId) -> bool {
        self.entries.borrow().contains_key(&id)
    }

    /// Fire every interval due at `now`. Returns how many callbacks ran.
    pub fn tick(&self, now: f64, context: &mut dyn ScriptContext) -> usize {
        // Reschedule before invoking so callbacks are free to add or remove
        // entries.
        let due: Vec<(IntervalId, CallbackRef)> = {
            let mut entries = self.entries.borrow_mut();
            entries
                .iter_mut()
                .filter(|(_, interval)| interval.next_due <= now)
                .map(|(id, interval)| {
                    interval.next_due = now + interval.period;
                    (*id, interval.callback)
                })
                .collect()
        };

        let mut fired = 0;
        for (id, callback) in due {
            if !self.contains(id) {
                continue;
            }
            fired += 1;
            if let Err(error) = context.call(callback, &[]) {
                script::report("setInterval", &error);
            }
        }
        fired
    }

    /// `tick` at the registry's own clock
    pub fn tick_now(&self, context: &mut dyn ScriptContext) -> usize {
        let now = self.clock.now();
        self.tick(now, context)
    }

    /// Drop every interval, returning their callbacks
    pub fn clear(&self) -> Vec<CallbackRef> {
        std::mem::take(&mut *self.entries.borrow_mut())
            .into_values()
            .map(|interval| interval.callback)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl fmt::Debug for IntervalRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntervalRegistry")
            .field("entries", &self.entries.borrow().len())
            .field("next_id", &self.next_id.get())
            .finish()
    }
}
