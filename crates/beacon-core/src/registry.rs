//! Channel registry.
//!
//! Maps decorated channel keys (`orders`, `private-orders`,
//! `presence-orders`) to live channels. Get-or-create is atomic per key, so
//! concurrent callers asking for the same channel share one instance and
//! only one of them subscribes it.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::channel::{Channel, ChannelKind};
use crate::presence::PresenceChannel;

/// A registered channel, tagged by kind.
#[derive(Debug, Clone)]
pub enum RegisteredChannel {
    Public(Channel),
    Private(Channel),
    Presence(PresenceChannel),
}

impl RegisteredChannel {
    /// The underlying channel.
    #[must_use]
    pub fn channel(&self) -> &Channel {
        match self {
            RegisteredChannel::Public(channel) | RegisteredChannel::Private(channel) => channel,
            RegisteredChannel::Presence(presence) => presence.channel(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        match self {
            RegisteredChannel::Public(_) => ChannelKind::Public,
            RegisteredChannel::Private(_) => ChannelKind::Private,
            RegisteredChannel::Presence(_) => ChannelKind::Presence,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.channel().name()
    }

    #[must_use]
    pub fn as_presence(&self) -> Option<&PresenceChannel> {
        match self {
            RegisteredChannel::Presence(presence) => Some(presence),
            _ => None,
        }
    }
}

/// Live channels by decorated key.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: DashMap<String, RegisteredChannel>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the channel stored under `key`, creating it with `factory` if absent.
    ///
    /// Returns the channel and whether this call created it.
    pub fn get_or_create<F>(&self, key: &str, factory: F) -> (RegisteredChannel, bool)
    where
        F: FnOnce() -> RegisteredChannel,
    {
        match self.channels.entry(key.to_string()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let channel = factory();
                entry.insert(channel.clone());
                debug!(channel = %key, kind = %channel.kind(), "Channel created");
                (channel, true)
            }
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<RegisteredChannel> {
        self.channels.get(key).map(|entry| entry.value().clone())
    }

    /// Evict `key` without unsubscribing it.
    pub fn remove(&self, key: &str) -> Option<RegisteredChannel> {
        self.channels.remove(key).map(|(_, channel)| channel)
    }

    /// Unsubscribe and evict the channel stored under `key`.
    ///
    /// Returns `false` if there was none.
    pub fn leave_channel(&self, key: &str) -> bool {
        let Entry::Occupied(entry) = self.channels.entry(key.to_string()) else {
            return false;
        };

        if let Err(e) = entry.get().channel().unsubscribe() {
            warn!(channel = %key, error = %e, "Unsubscribe failed, evicting anyway");
        }
        entry.remove();
        debug!(channel = %key, "Channel left");
        true
    }

    /// Leave every variant of the logical channel `base`.
    ///
    /// Returns the number of channels left; unknown names leave nothing.
    pub fn leave(&self, base: &str) -> usize {
        ChannelKind::ALL
            .iter()
            .filter(|kind| self.leave_channel(&kind.decorate(base)))
            .count()
    }

    /// Evict every channel without unsubscribing, returning them.
    pub fn drain(&self) -> Vec<RegisteredChannel> {
        let keys: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        keys.iter().filter_map(|key| self.remove(key)).collect()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.channels.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Registered keys, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
