//! Registry of connected framed-protocol clients.
//!
//! The single source of truth for "who is online". Sessions register once
//! their handshake completes and deregister during cleanup. Cross-session
//! messages are routed through here: the registry hands a frame to the
//! target's outbound queue and never touches a socket itself.
//!
//! Connection ids come from a slab, so an id is reused only after the
//! session holding it has released its [`IdLease`].

use slab::Slab;
use std::collections::BTreeMap;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::protocols::frame::codec::Frame;

/// Handle used to queue frames for a client's writer task.
pub type Outbound = mpsc::UnboundedSender<Frame>;

/// Identifies a live connection; also the routing address in `SEND` bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u32);

#[cfg(test)]
impl ConnectionId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ConnectionId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(ConnectionId)
    }
}

/// Outcome of [`Registry::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the target's outbound path.
    Delivered,
    /// Target is not registered (or already tearing down). The frame is dropped.
    NotFound,
}

#[derive(Debug)]
struct Client {
    address: String,
    outbound: Outbound,
}

#[derive(Default)]
struct Inner {
    /// Allocated ids, registered or not.
    ids: Slab<()>,
    /// Registered clients, ordered by id for listing.
    clients: BTreeMap<ConnectionId, Client>,
}

/// Thread-safe client registry.
///
/// Every operation takes the lock for a single map operation only; nothing
/// here blocks on network I/O.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a fresh connection id, released when the lease drops.
    pub fn lease(self: &Arc<Self>) -> IdLease {
        let key = self.lock().ids.insert(());
        IdLease {
            id: ConnectionId(key as u32 + 1),
            registry: Arc::clone(self),
        }
    }

    fn release(&self, id: ConnectionId) {
        let key = id.0 as usize - 1;
        let mut inner = self.lock();
        if inner.ids.contains(key) {
            inner.ids.remove(key);
        }
    }

    /// Make `id` visible to listings and message delivery.
    pub fn register(&self, id: ConnectionId, address: impl Into<String>, outbound: Outbound) {
        let address = address.into();
        debug!(%id, %address, "Registering client");
        let previous = self.lock().clients.insert(id, Client { address, outbound });
        if previous.is_some() {
            warn!(%id, "Replaced an existing registration");
        }
    }

    /// Remove `id`. No-op if it is not registered.
    pub fn deregister(&self, id: ConnectionId) {
        if self.lock().clients.remove(&id).is_some() {
            debug!(%id, "Deregistered client");
        }
    }

    /// Outbound handle for `id`, if registered.
    #[cfg(test)]
    pub fn lookup(&self, id: ConnectionId) -> Option<Outbound> {
        self.lock().clients.get(&id).map(|c| c.outbound.clone())
    }

    /// Registered clients as `(id, address)`, ascending by id.
    pub fn list_all(&self) -> Vec<(ConnectionId, String)> {
        self.lock()
            .clients
            .iter()
            .map(|(id, c)| (*id, c.address.clone()))
            .collect()
    }

    /// Render the roster sent in `LIST` responses.
    pub fn roster(&self) -> String {
        let mut roster = String::from("ID\tAddress\n");
        for (id, address) in self.list_all() {
            roster.push_str(&format!("{id}\t{address}\n"));
        }
        roster
    }

    /// Queue `frame` for `id`'s writer. Never waits on the target's socket.
    pub fn deliver(&self, id: ConnectionId, frame: Frame) -> Delivery {
        let inner = self.lock();
        match inner.clients.get(&id) {
            Some(client) => match client.outbound.send(frame) {
                Ok(()) => Delivery::Delivered,
                // Writer already gone; the session is on its way out.
                Err(_) => Delivery::NotFound,
            },
            None => Delivery::NotFound,
        }
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.lock().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().clients.is_empty()
    }
}

/// Ownership of one connection id.
///
/// Dropping the lease deregisters the id (if still registered) and returns
/// it to the pool, so a session cannot leak its id even if it panics.
pub struct IdLease {
    id: ConnectionId,
    registry: Arc<Registry>,
}

impl IdLease {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for IdLease {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
        self.registry.release(self.id);
    }
}
