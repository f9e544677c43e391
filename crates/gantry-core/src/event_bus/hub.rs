use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{watch, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use super::types::Event;
use crate::config::HubConfig;

/// Number of undelivered events a subscriber may hold before eviction.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

/// Terminal conditions reported by [`Subscriber::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubscriberError {
    /// Mailbox overflowed; the subscriber must re-subscribe
    #[error("subscriber fell behind and was evicted")]
    SlowConsumer,
    /// Subscriber was closed
    #[error("event source closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Liveness {
    Alive,
    Slow,
    Closed,
}

enum Offer {
    Queued,
    Overflowed,
    Gone,
}

struct MailboxState {
    pending: VecDeque<Event>,
    liveness: Liveness,
}

struct Mailbox {
    state: Mutex<MailboxState>,
    ready: Notify,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            state: Mutex::new(MailboxState {
                pending: VecDeque::new(),
                liveness: Liveness::Alive,
            }),
            ready: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn offer(&self, event: &Event, capacity: usize) -> Offer {
        let mut state = self.lock();
        match state.liveness {
            Liveness::Alive if state.pending.len() < capacity => {
                state.pending.push_back(event.clone());
                drop(state);
                self.ready.notify_one();
                Offer::Queued
            }
            Liveness::Alive => {
                state.liveness = Liveness::Slow;
                drop(state);
                self.wake_all();
                Offer::Overflowed
            }
            Liveness::Slow | Liveness::Closed => Offer::Gone,
        }
    }

    fn wake_all(&self) {
        // notify_waiters reaches futures already created; the stored permit
        // covers a consumer that is between its state check and its await.
        self.ready.notify_waiters();
        self.ready.notify_one();
    }
}

struct HubInner {
    subscribers: Mutex<HashMap<Uuid, Arc<Mailbox>>>,
    capacity: usize,
    presence: watch::Sender<bool>,
}

impl HubInner {
    fn registry(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<Mailbox>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn update_presence(&self, count: usize) {
        let present = count > 0;
        let changed = self.presence.send_if_modified(|current| {
            if *current == present {
                false
            } else {
                *current = present;
                true
            }
        });
        if changed {
            debug!(present, "Hub subscriber presence changed");
        }
    }

    fn remove(&self, id: Uuid) {
        let mut subscribers = self.registry();
        if subscribers.remove(&id).is_some() {
            self.update_presence(subscribers.len());
        }
    }
}

/// In-process publish/subscribe bus with bounded per-subscriber mailboxes.
///
/// Cloning a `Hub` yields another handle to the same subscriber registry.
/// A subscriber whose mailbox would overflow is evicted instead of slowing
/// the emitter or the other subscribers.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Create a hub with the default mailbox capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAILBOX_CAPACITY)
    }

    /// Create a hub whose subscribers buffer at most `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (presence, _) = watch::channel(false);
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(HashMap::new()),
                capacity: capacity.max(1),
                presence,
            }),
        }
    }

    /// Create a hub from configuration.
    #[must_use]
    pub fn from_config(config: &HubConfig) -> Self {
        Self::with_capacity(config.mailbox_capacity)
    }

    /// Register a new subscriber with an empty mailbox.
    pub fn subscribe(&self) -> Subscriber {
        let id = Uuid::new_v4();
        let mailbox = Arc::new(Mailbox::new());

        let mut subscribers = self.inner.registry();
        subscribers.insert(id, Arc::clone(&mailbox));
        self.inner.update_presence(subscribers.len());
        drop(subscribers);

        debug!(subscriber = %id, "Subscriber registered");
        Subscriber {
            id,
            mailbox,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every live subscriber.
    ///
    /// Returns the number of mailboxes the event was queued in. Subscribers
    /// whose mailbox is full are evicted and removed from the registry.
    pub fn emit(&self, event: Event) -> usize {
        let mut subscribers = self.inner.registry();
        let mut delivered = 0;
        let mut evicted = Vec::new();

        for (id, mailbox) in subscribers.iter() {
            match mailbox.offer(&event, self.inner.capacity) {
                Offer::Queued => delivered += 1,
                Offer::Overflowed => {
                    warn!(
                        subscriber = %id,
                        capacity = self.inner.capacity,
                        "Evicting slow subscriber"
                    );
                    evicted.push(*id);
                }
                Offer::Gone => evicted.push(*id),
            }
        }

        if !evicted.is_empty() {
            for id in &evicted {
                subscribers.remove(id);
            }
            self.inner.update_presence(subscribers.len());
        }

        delivered
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry().len()
    }

    /// Whether at least one live subscriber exists.
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        *self.inner.presence.borrow()
    }

    /// Feed that flips whenever the hub gains its first or loses its last
    /// subscriber.
    #[must_use]
    pub fn presence(&self) -> watch::Receiver<bool> {
        self.inner.presence.subscribe()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("capacity", &self.inner.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Cursor of one hub consumer.
///
/// Dropping the subscriber closes it.
pub struct Subscriber {
    id: Uuid,
    mailbox: Arc<Mailbox>,
    hub: Weak<HubInner>,
}

impl Subscriber {
    /// Identifier used in logs.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next event.
    ///
    /// Events come out in emission order. An evicted subscriber drains its
    /// backlog before reporting [`SubscriberError::SlowConsumer`]; a closed
    /// one reports [`SubscriberError::Closed`] immediately.
    pub async fn next(&self) -> Result<Event, SubscriberError> {
        loop {
            let notified = self.mailbox.ready.notified();
            {
                let mut state = self.mailbox.lock();
                if state.liveness == Liveness::Closed {
                    return Err(SubscriberError::Closed);
                }
                if let Some(event) = state.pending.pop_front() {
                    return Ok(event);
                }
                if state.liveness == Liveness::Slow {
                    return Err(SubscriberError::SlowConsumer);
                }
            }
            notified.await;
        }
    }

    /// Stop receiving events. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.mailbox.lock();
            if state.liveness == Liveness::Closed {
                return;
            }
            state.liveness = Liveness::Closed;
            state.pending.clear();
        }
        self.mailbox.wake_all();

        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
        }
        debug!(subscriber = %self.id, "Subscriber closed");
    }

    /// Whether the subscriber was evicted for falling behind.
    #[must_use]
    pub fn is_evicted(&self) -> bool {
        self.mailbox.lock().liveness == Liveness::Slow
    }

    /// Number of buffered events not yet returned by [`next`](Self::next).
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.mailbox.lock().pending.len()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}
