//! Single owner of every session timer.
use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Force-releases the input gate when no confirmation arrives
    InputFallback,
    /// Ends the dwell of the visual event on screen
    DisplayDwell,
    /// Reveals the prize once the spin animation is over
    PrizeReveal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    pub generation: u64,
}

#[derive(Debug)]
pub struct TimerSet {
    tx: mpsc::UnboundedSender<TimerFired>,
    armed: HashMap<TimerKind, (u64, JoinHandle<()>)>,
    next_generation: u64,
}

impl TimerSet {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let timers = Self { tx, armed: HashMap::new(), next_generation: 0 };
        (timers, rx)
    }

    /// Arms `kind`, replacing any timer of that kind still running
    pub fn arm(&mut self, kind: TimerKind, after: Duration) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(TimerFired { kind, generation });
        });
        if let Some((_, previous)) = self.armed.insert(kind, (generation, handle)) {
            previous.abort();
        }
        trace!(?kind, generation, ?after, "timer armed");
        generation
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some((_, handle)) = self.armed.remove(&kind) {
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, (_, handle)) in self.armed.drain() {
            handle.abort();
        }
    }

    /// Consumes a firing. Stale generations (re-armed or cancelled) are refused.
    pub fn accept(&mut self, fired: TimerFired) -> bool {
        match self.armed.get(&fired.kind) {
            Some((generation, _)) if *generation == fired.generation => {
                self.armed.remove(&fired.kind);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.armed.contains_key(&kind)
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
