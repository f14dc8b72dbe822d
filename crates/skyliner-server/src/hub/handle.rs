//! Cloneable handle used by sessions and producers to talk to the hub.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};

use skyliner_proto::Event;

use super::registry::HubStats;
use crate::connection::{Connection, ConnectionId, Frame, StateCell};
use crate::error::Error;

/// Commands processed by the hub coordinator, strictly in arrival order.
#[derive(Debug)]
pub(crate) enum Command {
    Register {
        id: ConnectionId,
        state: Arc<StateCell>,
        outbound: mpsc::Sender<Frame>,
    },
    Unregister {
        id: ConnectionId,
    },
    Subscribe {
        id: ConnectionId,
        channel: String,
    },
    Unsubscribe {
        id: ConnectionId,
        channel: String,
    },
    Publish {
        channel: String,
        event: Event,
        /// Returned to the publish budget once the hub has dispatched it.
        _permit: OwnedSemaphorePermit,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
    Subscriptions {
        id: ConnectionId,
        reply: oneshot::Sender<Option<Vec<String>>>,
    },
    Shutdown,
}

/// The surface business-logic producers use to inject events.
///
/// Publishing never blocks and never reports failure: delivery is
/// best-effort.
pub trait Publisher: Send + Sync {
    /// Fan `event` out to every connection subscribed to `channel`.
    fn publish(&self, channel: &str, event: Event);

    /// Publish `event` on its own channel.
    fn publish_event(&self, event: Event) {
        let channel = event.channel().to_string();
        self.publish(&channel, event);
    }
}

/// Handle to a running hub.
///
/// Control commands and queries are queued without waiting for capacity.
/// Only publishes are bounded: each one holds a permit until the hub has
/// dispatched it, and a publish that finds no permit left is dropped.
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<Command>,
    publish_permits: Arc<Semaphore>,
    outbound_capacity: usize,
}

impl HubHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        publish_permits: Arc<Semaphore>,
        outbound_capacity: usize,
    ) -> Self {
        Self {
            commands,
            publish_permits,
            outbound_capacity,
        }
    }

    /// Create a new connection with the configured outbound capacity.
    ///
    /// The connection starts in the `Connecting` state; it joins the hub
    /// through [`HubHandle::register`] or [`Connection::run`].
    pub fn connect(&self) -> Connection {
        Connection::new(self.clone(), self.outbound_capacity)
    }

    /// Create a new connection with a specific outbound capacity.
    pub fn connect_with_capacity(&self, capacity: usize) -> Connection {
        Connection::new(self.clone(), capacity)
    }

    /// Add a connection to the active registry.
    ///
    /// Registering an already registered (or closed) connection is a no-op.
    pub async fn register(&self, connection: &mut Connection) -> Result<(), Error> {
        let Some(outbound) = connection.take_registration() else {
            return Ok(());
        };

        let state = connection.state_cell();
        let result = self
            .send(Command::Register {
                id: connection.id(),
                state: state.clone(),
                outbound,
            })
            .await;

        if result.is_err() {
            state.close();
        }
        result
    }

    /// Remove a connection from the registry and close its outbound buffer.
    /// Safe to call for connections that are not registered.
    pub async fn unregister(&self, id: ConnectionId) -> Result<(), Error> {
        self.send(Command::Unregister { id }).await
    }

    pub async fn subscribe(&self, id: ConnectionId, channel: impl Into<String>) -> Result<(), Error> {
        self.send(Command::Subscribe {
            id,
            channel: channel.into(),
        })
        .await
    }

    pub async fn unsubscribe(&self, id: ConnectionId, channel: impl Into<String>) -> Result<(), Error> {
        self.send(Command::Unsubscribe {
            id,
            channel: channel.into(),
        })
        .await
    }

    /// Current registry occupancy.
    pub async fn stats(&self) -> Result<HubStats, Error> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply }).await?;
        rx.await.map_err(|_| Error::HubClosed)
    }

    /// Sorted channel subscriptions of a connection, or `None` if it is not
    /// registered.
    pub async fn subscriptions(&self, id: ConnectionId) -> Result<Option<Vec<String>>, Error> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscriptions { id, reply }).await?;
        rx.await.map_err(|_| Error::HubClosed)
    }

    /// Close every connection and stop the coordinator.
    pub async fn shutdown(&self) {
        if self.send(Command::Shutdown).await.is_err() {
            tracing::debug!("hub already stopped");
        }
    }

    /// Whether the coordinator has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn send(&self, command: Command) -> Result<(), Error> {
        self.commands.send(command).map_err(|_| Error::HubClosed)
    }
}

impl Publisher for HubHandle {
    fn publish(&self, channel: &str, event: Event) {
        let Ok(permit) = self.publish_permits.clone().try_acquire_owned() else {
            tracing::warn!(channel, "hub publish queue full, dropping event");
            return;
        };

        let command = Command::Publish {
            channel: channel.to_string(),
            event,
            _permit: permit,
        };

        if self.commands.send(command).is_err() {
            tracing::debug!(channel, "hub closed, dropping event");
        }
    }
}
