/// Cooperative task queue driven by the host's animation clock.
///
/// Nothing here runs on its own: the host calls `take_due` once per
/// animation tick with the current time. Work scheduled while a tick is being
/// processed never runs in that same tick.
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

#[derive(Debug)]
struct Pending<T> {
    due: u64,
    seq: u64,
    task: T,
}

impl<T> PartialEq for Pending<T> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<T> Eq for Pending<T> {}

impl<T> PartialOrd for Pending<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Pending<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

#[derive(Debug)]
pub struct Timeline<T> {
    now: u64,
    seq: u64,
    tasks: BinaryHeap<Reverse<Pending<T>>>,
}

impl<T> Default for Timeline<T> {
    fn default() -> Self {
        Self {
            now: 0,
            seq: 0,
            tasks: BinaryHeap::new(),
        }
    }
}

impl<T> Timeline<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time of the most recent tick, in milliseconds.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Run `task` on the next animation tick.
    pub fn next_tick(&mut self, task: T) {
        self.after(0, task);
    }

    /// Run `task` on the first tick at least `delay_ms` from now.
    pub fn after(&mut self, delay_ms: u64, task: T) {
        let pending = Pending {
            due: self.now.saturating_add(delay_ms),
            seq: self.seq,
            task,
        };
        self.seq += 1;
        self.tasks.push(Reverse(pending));
    }

    /// Advance the clock to `now` and hand out every task that is due, in
    /// due-time then scheduling order.
    pub fn take_due(&mut self, now: u64) -> Vec<T> {
        self.now = self.now.max(now);
        let mut due = Vec::new();
        while let Some(Reverse(next)) = self.tasks.peek() {
            if next.due > self.now {
                break;
            }
            if let Some(Reverse(pending)) = self.tasks.pop() {
                due.push(pending.task);
            }
        }
        due
    }

    pub fn next_due(&self) -> Option<u64> {
        self.tasks.peek().map(|Reverse(pending)| pending.due)
    }

    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
