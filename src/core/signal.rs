/// Lifecycle signals of a reveal session and the observer lists that react to them.
use serde::{Deserialize, Serialize};

use crate::schema::node::NodeId;

/// Externally observable lifecycle signal of one terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    /// A play-to-finish run began with content still queued.
    Start,
    /// A chunk was applied (or the queue was found exhausted).
    Frame,
    /// The queue is exhausted. Fires exactly once per run.
    End,
}

/// A signal as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub terminal: NodeId,
    pub signal: Signal,
}

/// Continuation registered on a terminal, interpreted by the stage when the
/// signal fires.
#[derive(Debug, Clone, PartialEq)]
pub enum Reaction {
    ScrollIntoView(NodeId),
    /// Hand control to `form`: optionally open its disclosure, clear its
    /// active marker and focus its input.
    CompleteTransition { form: NodeId, open_details: bool },
    /// The answer's fragment finished; the branch point becomes read-only.
    SettleBranch(NodeId),
    ShowCursor(bool),
    Navigate(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// Dropped after the first delivery.
    Once,
    /// Dropped when the session ends.
    UntilEnd,
    /// Survives resets.
    Persistent,
}

#[derive(Debug, Clone, PartialEq)]
struct Subscription {
    signal: Signal,
    reaction: Reaction,
    lifetime: Lifetime,
}

/// Ordered observer list of one terminal. Delivery order is subscription order.
#[derive(Debug, Clone, Default)]
pub struct Observers {
    subscriptions: Vec<Subscription>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, signal: Signal, reaction: Reaction, lifetime: Lifetime) {
        self.subscriptions.push(Subscription {
            signal,
            reaction,
            lifetime,
        });
    }

    pub fn on_start(&mut self, reaction: Reaction) {
        self.subscribe(Signal::Start, reaction, Lifetime::Once);
    }

    /// Runs on every frame until the session ends.
    pub fn on_reveal(&mut self, reaction: Reaction) {
        self.subscribe(Signal::Frame, reaction, Lifetime::UntilEnd);
    }

    pub fn on_end(&mut self, reaction: Reaction) {
        self.subscribe(Signal::End, reaction, Lifetime::Once);
    }

    /// Deliver `signal`, returning the reactions to run in order.
    pub fn fire(&mut self, signal: Signal) -> Vec<Reaction> {
        let reactions = self
            .subscriptions
            .iter()
            .filter(|sub| sub.signal == signal)
            .map(|sub| sub.reaction.clone())
            .collect();

        self.subscriptions.retain(|sub| match sub.lifetime {
            Lifetime::Persistent => true,
            Lifetime::Once => sub.signal != signal,
            Lifetime::UntilEnd => signal != Signal::End,
        });

        reactions
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
