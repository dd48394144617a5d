//! Global property change bus.
//!
//! Every notification from a property is published here. Two kinds of
//! consumers receive it:
//! - internal listeners (chained properties) registered as weak references
//! - external subscribers holding a `broadcast::Receiver`
//!
//! Delivery goes through a dispatch queue. An event published while another
//! is being delivered is appended to the queue and delivered afterwards by
//! the dispatcher that is already draining it, so a listener is never
//! re-entered from its own reaction.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, RwLock, Weak};
use tokio::sync::broadcast;

/// What happened to a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// The value changed (set, poll update or chained recompute).
    Updated,
    /// A tombstone marked the property removed.
    Removed,
    /// The manager was reset; the property must not be used anymore.
    Disposed,
}

/// Change notification carrying the property identity, not its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyChanged {
    pub name: String,
    pub kind: ChangeKind,
}

impl PropertyChanged {
    pub fn new(name: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Internal consumer of bus events.
pub(crate) trait ChangeListener: Send + Sync {
    fn on_change(&self, event: &PropertyChanged);
}

#[derive(Default)]
struct DispatchQueue {
    pending: VecDeque<PropertyChanged>,
    draining: bool,
}

pub struct ChangeBus {
    sender: broadcast::Sender<PropertyChanged>,
    listeners: RwLock<Vec<Weak<dyn ChangeListener>>>,
    queue: Mutex<DispatchQueue>,
}

impl ChangeBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            listeners: RwLock::new(Vec::new()),
            queue: Mutex::new(DispatchQueue::default()),
        }
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PropertyChanged> {
        self.sender.subscribe()
    }

    pub(crate) fn register(&self, listener: Weak<dyn ChangeListener>) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.retain(|l| l.strong_count() > 0);
        listeners.push(listener);
    }

    /// Drop all internal listeners. Broadcast subscribers are kept.
    pub fn clear_listeners(&self) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|l| l.strong_count() > 0)
            .count()
    }

    /// Queue `event` and deliver it, unless a dispatcher is already draining
    /// the queue, in which case that dispatcher delivers it.
    pub fn publish(&self, event: PropertyChanged) {
        {
            let mut queue = self.lock_queue();
            queue.pending.push_back(event);
            if queue.draining {
                return;
            }
            queue.draining = true;
        }

        let _guard = DrainGuard(self);
        loop {
            let next = {
                let mut queue = self.lock_queue();
                match queue.pending.pop_front() {
                    Some(event) => event,
                    None => {
                        queue.draining = false;
                        break;
                    }
                }
            };
            self.deliver(&next);
        }
    }

    fn deliver(&self, event: &PropertyChanged) {
        let listeners: Vec<_> = {
            let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener.on_change(event);
        }
        // No receivers is not an error
        let _ = self.sender.send(event.clone());
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, DispatchQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Releases the dispatcher role if a listener panics mid-delivery.
struct DrainGuard<'a>(&'a ChangeBus);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut queue = self.0.lock_queue();
            queue.pending.clear();
            queue.draining = false;
        }
    }
}
