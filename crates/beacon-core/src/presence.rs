//! Presence channels.
//!
//! A presence channel keeps a client-side cache of who is subscribed, built
//! from the member list the server sends after subscribing and the joins,
//! leaves and updates that follow. The cache reflects what this client was
//! told, in arrival order; it is not authoritative.

use beacon_protocol::frames::{
    PRESENCE_JOINING, PRESENCE_LEAVING, PRESENCE_SUBSCRIBED, PRESENCE_UPDATED,
};
use beacon_protocol::Member;
use beacon_transport::RawEvent;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use crate::channel::{Channel, WeakChannel};

/// Members of a presence channel, keyed by member id.
#[derive(Debug, Default, Clone)]
pub struct Members {
    members: HashMap<String, Member>,
}

impl Members {
    /// Create an empty member set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of present members.
    #[must_use]
    pub fn count(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Check if a member is present.
    #[must_use]
    pub fn is_present(&self, id: &str) -> bool {
        self.members.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Member> {
        self.members.get(id)
    }

    /// Replace the whole set.
    pub fn replace_all(&mut self, members: impl IntoIterator<Item = Member>) {
        self.members = members.into_iter().map(|m| (m.id.clone(), m)).collect();
    }

    /// Add a member, replacing the info of an existing one.
    ///
    /// Returns `true` if this is a new member.
    pub fn join(&mut self, member: Member) -> bool {
        self.members.insert(member.id.clone(), member).is_none()
    }

    /// Remove a member, returning it if it was present.
    pub fn leave(&mut self, id: &str) -> Option<Member> {
        self.members.remove(id)
    }

    /// Replace a present member's info.
    ///
    /// Returns `true` if the member exists and was updated.
    pub fn update(&mut self, id: &str, info: serde_json::Value) -> bool {
        if let Some(member) = self.members.get_mut(id) {
            member.info = info;
            true
        } else {
            false
        }
    }

    /// All member IDs.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    /// Snapshot of all members, ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Member> {
        let mut members: Vec<Member> = self.members.values().cloned().collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }
}

/// Callback receiving the full member list.
pub type MembersCallback = Arc<dyn Fn(&[Member]) + Send + Sync>;
/// Callback receiving one member.
pub type MemberCallback = Arc<dyn Fn(&Member) + Send + Sync>;

#[derive(Default)]
struct PresenceState {
    members: Mutex<Members>,
    here: Mutex<Vec<MembersCallback>>,
    joining: Mutex<Vec<MemberCallback>>,
    leaving: Mutex<Vec<MemberCallback>>,
    updating: Mutex<Vec<MemberCallback>>,
}

impl PresenceState {
    fn on_here(&self, members: Vec<Member>) {
        self.members.lock().replace_all(members.iter().cloned());
        debug!(count = members.len(), "Presence: member list received");

        let callbacks = self.here.lock().clone();
        for callback in callbacks {
            callback(&members);
        }
    }

    fn on_joining(&self, member: Member) {
        if !self.members.lock().join(member.clone()) {
            debug!(member = %member.id, "Presence: member already present");
            return;
        }
        debug!(member = %member.id, "Presence: member joined");
        notify(&self.joining, &member);
    }

    fn on_leaving(&self, member: Member) {
        let Some(removed) = self.members.lock().leave(&member.id) else {
            debug!(member = %member.id, "Presence: leave for absent member");
            return;
        };
        debug!(member = %removed.id, "Presence: member left");
        notify(&self.leaving, &removed);
    }

    fn on_updated(&self, member: Member) {
        if !self.members.lock().update(&member.id, member.info.clone()) {
            debug!(member = %member.id, "Presence: update for absent member");
            return;
        }
        notify(&self.updating, &member);
    }
}

fn notify(callbacks: &Mutex<Vec<MemberCallback>>, member: &Member) {
    let callbacks = callbacks.lock().clone();
    for callback in callbacks {
        callback(member);
    }
}

fn parse<T: DeserializeOwned>(event: &RawEvent) -> Option<T> {
    match serde_json::from_value(event.data.clone()) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(event = %event.event, error = %e, "Malformed presence payload");
            None
        }
    }
}

/// A channel that tracks its members.
///
/// Derefs to [`Channel`] for listening, whispering and unsubscribing.
#[derive(Clone)]
pub struct PresenceChannel {
    channel: Channel,
    presence: Arc<PresenceState>,
}

impl PresenceChannel {
    /// Wrap `channel` and bind the presence events. Must run before the
    /// channel subscribes so the initial member list is not missed.
    pub(crate) fn new(channel: Channel) -> Self {
        let presence = Arc::new(PresenceState::default());

        let state = Arc::clone(&presence);
        channel.bind_raw(PRESENCE_SUBSCRIBED, move |event: &RawEvent| {
            if let Some(members) = parse::<Vec<Member>>(event) {
                state.on_here(members);
            }
        });
        let state = Arc::clone(&presence);
        channel.bind_raw(PRESENCE_JOINING, move |event: &RawEvent| {
            if let Some(member) = parse(event) {
                state.on_joining(member);
            }
        });
        let state = Arc::clone(&presence);
        channel.bind_raw(PRESENCE_LEAVING, move |event: &RawEvent| {
            if let Some(member) = parse(event) {
                state.on_leaving(member);
            }
        });
        let state = Arc::clone(&presence);
        channel.bind_raw(PRESENCE_UPDATED, move |event: &RawEvent| {
            if let Some(member) = parse(event) {
                state.on_updated(member);
            }
        });

        Self { channel, presence }
    }

    /// A handle that does not keep the member cache alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakPresenceChannel {
        WeakPresenceChannel {
            channel: self.channel.downgrade(),
            presence: Arc::downgrade(&self.presence),
        }
    }

    /// The underlying channel.
    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Called with the member list after every successful subscribe.
    pub fn here<F>(&self, callback: F) -> &Self
    where
        F: Fn(&[Member]) + Send + Sync + 'static,
    {
        self.presence.here.lock().push(Arc::new(callback));
        self
    }

    /// Called when a new member joins.
    pub fn joining<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Member) + Send + Sync + 'static,
    {
        self.presence.joining.lock().push(Arc::new(callback));
        self
    }

    /// Called when a present member leaves.
    pub fn leaving<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Member) + Send + Sync + 'static,
    {
        self.presence.leaving.lock().push(Arc::new(callback));
        self
    }

    /// Called when a present member changes its info.
    pub fn updating<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Member) + Send + Sync + 'static,
    {
        self.presence.updating.lock().push(Arc::new(callback));
        self
    }

    /// Current members, ordered by id.
    #[must_use]
    pub fn members(&self) -> Vec<Member> {
        self.presence.members.lock().snapshot()
    }

    #[must_use]
    pub fn member(&self, id: &str) -> Option<Member> {
        self.presence.members.lock().get(id).cloned()
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.presence.members.lock().count()
    }

    #[must_use]
    pub fn is_present(&self, id: &str) -> bool {
        self.presence.members.lock().is_present(id)
    }
}

/// Weak handle to a [`PresenceChannel`].
///
/// Member callbacks that read the cache capture this instead of the channel,
/// which would otherwise own itself through its own callbacks.
#[derive(Clone)]
pub struct WeakPresenceChannel {
    channel: WeakChannel,
    presence: Weak<PresenceState>,
}

impl WeakPresenceChannel {
    /// The channel, while its member cache is still in use.
    #[must_use]
    pub fn upgrade(&self) -> Option<PresenceChannel> {
        Some(PresenceChannel {
            channel: self.channel.upgrade()?,
            presence: self.presence.upgrade()?,
        })
    }
}

impl Deref for PresenceChannel {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.channel
    }
}

impl fmt::Debug for PresenceChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceChannel")
            .field("channel", &self.channel)
            .field("members", &self.member_count())
            .finish()
    }
}
