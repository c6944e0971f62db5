//! One vehicle of the account and the listeners watching it
use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError, Weak},
};

use chrono::{DateTime, Utc};

use crate::attributes::{
    empty_groups, group_index, Attribute, AttributeGroup, AttributeKey, GroupKind,
};

/// A callback invoked whenever a vehicle has new data.
pub type Listener = dyn Fn(&Vehicle) + Send + Sync;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Weak<Listener>)>,
}

type SharedListeners = Arc<Mutex<Listeners>>;

/// Was a message a full or a partial update of the vehicle?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// All fields were replaced
    Full,

    /// Only the fields present were merged
    Partial,
}

/// Counters of the messages received for a vehicle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageCounters {
    /// Number of full updates
    pub full: u64,

    /// Number of partial updates
    pub partial: u64,
}

/// A vehicle and the latest data known about it.
pub struct Vehicle {
    finorvin: String,
    licenseplate: String,
    last_message_received: Option<DateTime<Utc>>,
    messages_received: MessageCounters,
    groups: [AttributeGroup; GroupKind::COUNT],
    listeners: SharedListeners,
}

impl Vehicle {
    /// Create a vehicle without any data.
    ///
    /// The license plate defaults to the vehicle identification.
    #[must_use]
    pub fn new(finorvin: impl Into<String>, licenseplate: Option<String>) -> Self {
        let finorvin = finorvin.into();
        let licenseplate = licenseplate.unwrap_or_else(|| finorvin.clone());
        Self {
            finorvin,
            licenseplate,
            last_message_received: None,
            messages_received: MessageCounters::default(),
            groups: empty_groups(),
            listeners: SharedListeners::default(),
        }
    }

    /// The vehicle identification.
    #[must_use]
    pub fn finorvin(&self) -> &str {
        &self.finorvin
    }

    /// The license plate, or the vehicle identification if there is none.
    #[must_use]
    pub fn licenseplate(&self) -> &str {
        &self.licenseplate
    }

    /// When did we last get data for this vehicle?
    #[must_use]
    pub const fn last_message_received(&self) -> Option<DateTime<Utc>> {
        self.last_message_received
    }

    /// How many updates have been received?
    #[must_use]
    pub const fn messages_received(&self) -> MessageCounters {
        self.messages_received
    }

    /// Record that a message was received.
    ///
    /// The last message time never moves backwards.
    pub fn mark_message_received(&mut self, at: DateTime<Utc>, kind: UpdateKind) {
        match kind {
            UpdateKind::Full => self.messages_received.full += 1,
            UpdateKind::Partial => self.messages_received.partial += 1,
        }
        self.mark_seen(at);
    }

    /// Move the last message time forward without counting a message.
    pub fn mark_seen(&mut self, at: DateTime<Utc>) {
        if self.last_message_received.map_or(true, |last| at > last) {
            self.last_message_received = Some(at);
        }
    }

    /// Get an attribute group.
    #[must_use]
    pub const fn group(&self, kind: GroupKind) -> &AttributeGroup {
        &self.groups[group_index(kind)]
    }

    /// Get an attribute group for updating.
    pub fn group_mut(&mut self, kind: GroupKind) -> &mut AttributeGroup {
        &mut self.groups[group_index(kind)]
    }

    /// Iterate over all attribute groups.
    pub fn groups(&self) -> impl Iterator<Item = &AttributeGroup> {
        self.groups.iter()
    }

    /// Get an attribute.
    ///
    /// Returns `None` if no data has been received for it yet.
    #[must_use]
    pub fn attribute(&self, key: AttributeKey) -> Option<&Attribute> {
        self.group(key.group()).get(key.field())
    }

    /// Register a listener for update notifications.
    ///
    /// The vehicle only keeps a weak reference, the caller owns the listener. The listener is
    /// removed when the returned `Subscription` is dropped or unsubscribed.
    #[must_use = "dropping the subscription removes the listener"]
    pub fn subscribe(&self, listener: &Arc<Listener>) -> Subscription {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::downgrade(listener)));

        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Number of listeners that are still alive.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners
            .entries
            .iter()
            .filter(|(_, listener)| listener.strong_count() > 0)
            .count()
    }

    /// Call every registered listener.
    pub fn publish_updates(&self) {
        let live: Vec<Arc<Listener>> = {
            let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            listeners
                .entries
                .retain(|(_, listener)| listener.strong_count() > 0);
            listeners
                .entries
                .iter()
                .filter_map(|(_, listener)| listener.upgrade())
                .collect()
        };

        // Lock is released so listeners may subscribe or unsubscribe.
        for listener in live {
            listener(self);
        }
    }
}

impl fmt::Debug for Vehicle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vehicle")
            .field("finorvin", &self.finorvin)
            .field("licenseplate", &self.licenseplate)
            .field("last_message_received", &self.last_message_received)
            .field("messages_received", &self.messages_received)
            .field("groups", &self.groups)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Handle to a registered listener.
///
/// Dropping the handle unsubscribes the listener.
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    /// Stop receiving notifications.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            let mut listeners = listeners.lock().unwrap_or_else(PoisonError::into_inner);
            listeners.entries.retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
