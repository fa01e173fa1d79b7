//! Cancelable one-shot timers for the round state machine.
//!
//! Every entry carries the round generation it was armed in. Entries from an
//! older generation are dropped when they come due, so a timer armed in one
//! round can never act on the next.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RoundTimer {
    /// Entry period elapsed: start the race
    EnterPeriod,
    /// Start jingle finished: open the gates
    StartDelay,
    /// Poll for finished marbles
    FinishCheck,
    /// Time since the first finish ran out
    DnfDeadline,
    /// Race took too long
    MaxLength,
    /// Everyone finished: end after the grace delay
    AllFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Scheduled {
    at: Instant,
    seq: u64,
    generation: u64,
    timer: RoundTimer,
}

#[derive(Debug, Default)]
pub struct Timers {
    queue: BinaryHeap<Reverse<Scheduled>>,
    next_seq: u64,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `timer` to fire at `at`, replacing any armed timer of the same kind.
    pub fn arm(&mut self, timer: RoundTimer, generation: u64, at: Instant) {
        self.cancel(timer);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse(Scheduled {
            at,
            seq,
            generation,
            timer,
        }));
    }

    pub fn cancel(&mut self, timer: RoundTimer) {
        self.queue.retain(|Reverse(s)| s.timer != timer);
    }

    pub fn cancel_all(&mut self) {
        self.queue.clear();
    }

    /// When `timer` fires, if armed.
    pub fn deadline(&self, timer: RoundTimer) -> Option<Instant> {
        self.queue
            .iter()
            .find(|Reverse(s)| s.timer == timer)
            .map(|Reverse(s)| s.at)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.peek().map(|Reverse(s)| s.at)
    }

    /// Pops the earliest timer due at `now`, with the instant it was due.
    /// Entries armed under another generation are discarded.
    pub fn pop_due(&mut self, now: Instant, generation: u64) -> Option<(RoundTimer, Instant)> {
        while let Some(Reverse(next)) = self.queue.peek() {
            if next.at > now {
                return None;
            }
            let Reverse(due) = self.queue.pop()?;
            if due.generation == generation {
                return Some((due.timer, due.at));
            }
            tracing::debug!(
                "Dropping stale {:?} from generation {}",
                due.timer,
                due.generation
            );
        }
        None
    }
}
