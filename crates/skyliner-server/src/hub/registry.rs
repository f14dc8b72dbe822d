//! Connection registry and channel index owned by the hub coordinator.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use skyliner_proto::Event;

use crate::connection::{ConnectionId, Frame, StateCell};
use crate::error::Error;

/// Snapshot of hub occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Active connections.
    pub connections: usize,
    /// Channels with at least one subscriber.
    pub channels: usize,
    /// Total (connection, channel) subscriptions.
    pub subscriptions: usize,
}

/// The hub's record of one active connection.
#[derive(Debug)]
struct Registration {
    outbound: mpsc::Sender<Frame>,
    state: Arc<StateCell>,
    channels: HashSet<String>,
}

/// Active connections and the reverse channel index.
///
/// Only the coordinator task touches this, so no locking is involved.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    /// Active connections keyed by connection ID.
    connections: HashMap<ConnectionId, Registration>,
    /// Subscribed connections by channel. Entries are never empty.
    channels: HashMap<String, HashSet<ConnectionId>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a connection with no subscriptions.
    ///
    /// Returns false if the connection is already registered or already
    /// closed; in the latter case the buffer is dropped, keeping it closed.
    pub(crate) fn register(
        &mut self,
        id: ConnectionId,
        state: Arc<StateCell>,
        outbound: mpsc::Sender<Frame>,
    ) -> bool {
        if self.connections.contains_key(&id) {
            tracing::debug!(connection_id = %id, "connection already registered");
            return false;
        }

        if !state.activate() {
            tracing::debug!(connection_id = %id, "refusing to register closed connection");
            return false;
        }

        self.connections.insert(
            id,
            Registration {
                outbound,
                state,
                channels: HashSet::new(),
            },
        );

        tracing::info!(
            connection_id = %id,
            connections = self.connections.len(),
            "client connected"
        );
        true
    }

    /// Remove a connection from the registry and every channel, closing its
    /// outbound buffer. Returns false if it was not registered.
    pub(crate) fn unregister(&mut self, id: ConnectionId) -> bool {
        let Some(registration) = self.connections.remove(&id) else {
            return false;
        };

        for channel in &registration.channels {
            if let Some(members) = self.channels.get_mut(channel) {
                members.remove(&id);
                if members.is_empty() {
                    self.channels.remove(channel);
                }
            }
        }

        // Wakes the session, which stops without draining the buffer.
        registration.state.close();
        drop(registration);

        tracing::info!(
            connection_id = %id,
            connections = self.connections.len(),
            "client disconnected"
        );
        true
    }

    /// Returns false if already subscribed or not registered.
    pub(crate) fn subscribe(&mut self, id: ConnectionId, channel: String) -> bool {
        let Some(registration) = self.connections.get_mut(&id) else {
            tracing::debug!(connection_id = %id, channel = %channel, "subscribe from unregistered connection");
            return false;
        };

        if !registration.channels.insert(channel.clone()) {
            return false;
        }

        tracing::debug!(connection_id = %id, channel = %channel, "subscribed");
        self.channels.entry(channel).or_default().insert(id);
        true
    }

    /// Returns false if the connection was not subscribed.
    pub(crate) fn unsubscribe(&mut self, id: ConnectionId, channel: &str) -> bool {
        let Some(registration) = self.connections.get_mut(&id) else {
            return false;
        };

        if !registration.channels.remove(channel) {
            return false;
        }

        if let Some(members) = self.channels.get_mut(channel) {
            members.remove(&id);
            if members.is_empty() {
                self.channels.remove(channel);
            }
        }

        tracing::debug!(connection_id = %id, channel, "unsubscribed");
        true
    }

    /// Enqueue `event` for every subscriber of `channel` without waiting.
    ///
    /// Subscribers whose buffer is full or closed are unregistered. Returns
    /// the number of connections the event was enqueued for.
    pub(crate) fn publish(&mut self, channel: &str, event: &Event) -> usize {
        let Some(members) = self.channels.get(channel) else {
            tracing::trace!(channel, "no subscribers");
            return 0;
        };

        let frame: Frame = match event.encode() {
            Ok(text) => Arc::from(text),
            Err(e) => {
                tracing::error!(channel, error = %e, "failed to encode event");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();

        for id in members {
            let Some(registration) = self.connections.get(id) else {
                continue;
            };

            match enqueue(*id, registration, &frame) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(channel, error = %e, "dropping subscriber");
                    dead.push(*id);
                }
            }
        }

        for id in dead {
            self.unregister(id);
        }

        tracing::trace!(
            channel,
            event_type = %event.event_type(),
            delivered,
            "published event"
        );
        delivered
    }

    pub(crate) fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.len(),
            channels: self.channels.len(),
            subscriptions: self.channels.values().map(HashSet::len).sum(),
        }
    }

    /// Sorted channel names for a registered connection.
    pub(crate) fn subscriptions(&self, id: ConnectionId) -> Option<Vec<String>> {
        self.connections.get(&id).map(|registration| {
            let mut channels: Vec<String> = registration.channels.iter().cloned().collect();
            channels.sort();
            channels
        })
    }

    /// Unregister every connection. Returns how many were closed.
    pub(crate) fn close_all(&mut self) -> usize {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        ids.into_iter().filter(|id| self.unregister(*id)).count()
    }
}

fn enqueue(id: ConnectionId, registration: &Registration, frame: &Frame) -> Result<(), Error> {
    registration
        .outbound
        .try_send(frame.clone())
        .map_err(|e| match e {
            TrySendError::Full(_) => Error::QueueOverflow(id),
            TrySendError::Closed(_) => Error::BufferClosed(id),
        })
}
