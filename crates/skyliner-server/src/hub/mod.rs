//! Real-time event hub.
//!
//! A single coordinator task owns the connection registry and the channel
//! index. Sessions and producers reach it only through a [`HubHandle`], which
//! queues commands; the coordinator applies them one at a time in arrival
//! order, so registration, subscription changes and publishes never race.
//!
//! The queue itself is unbounded so sessions never wait on the hub. A
//! semaphore caps how many publishes may be waiting at once.

mod handle;
mod registry;

pub use handle::{HubHandle, Publisher};
pub use registry::HubStats;

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use handle::Command;
use registry::Registry;

use crate::config::ServerConfig;

/// The hub coordinator.
#[derive(Debug)]
pub struct Hub {
    commands: mpsc::UnboundedReceiver<Command>,
    registry: Registry,
}

impl Hub {
    /// Create a hub and the handle used to reach it.
    ///
    /// `command_capacity` bounds the publishes waiting for dispatch;
    /// `outbound_capacity` is the per-connection buffer size used by
    /// [`HubHandle::connect`].
    pub fn new(command_capacity: usize, outbound_capacity: usize) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let permits = Arc::new(Semaphore::new(command_capacity.max(1)));
        let hub = Self {
            commands: rx,
            registry: Registry::new(),
        };
        (hub, HubHandle::new(tx, permits, outbound_capacity.max(1)))
    }

    /// Create a hub sized from the server configuration.
    pub fn from_config(config: &ServerConfig) -> (Self, HubHandle) {
        Self::new(config.command_capacity, config.outbound_capacity)
    }

    /// Process commands until shutdown or until every handle is dropped,
    /// then close all remaining connections.
    pub async fn run(mut self) {
        tracing::info!("hub started");

        while let Some(command) = self.commands.recv().await {
            if let Command::Shutdown = command {
                tracing::info!("shutdown requested");
                break;
            }
            self.apply(command);
        }

        let closed = self.registry.close_all();
        tracing::info!(closed, "hub stopped");
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Register { id, state, outbound } => {
                self.registry.register(id, state, outbound);
            }
            Command::Unregister { id } => {
                self.registry.unregister(id);
            }
            Command::Subscribe { id, channel } => {
                self.registry.subscribe(id, channel);
            }
            Command::Unsubscribe { id, channel } => {
                self.registry.unsubscribe(id, &channel);
            }
            Command::Publish { channel, event, .. } => {
                self.registry.publish(&channel, &event);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.registry.stats());
            }
            Command::Subscriptions { id, reply } => {
                let _ = reply.send(self.registry.subscriptions(id));
            }
            Command::Shutdown => {}
        }
    }
}

/// Spawn the hub coordinator on the current runtime.
pub fn spawn_hub(config: &ServerConfig) -> (HubHandle, JoinHandle<()>) {
    let (hub, handle) = Hub::from_config(config);
    let task = tokio::spawn(hub.run());
    (handle, task)
}
