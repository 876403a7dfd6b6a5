//! Maps host-visible integer ids to live connections.
//!
//! # Design
//! The host only ever holds a `ConnectionId`. Each registry entry is an
//! `Arc<Connection>`; the worker thread owns another clone, so destroying a
//! connection while its worker is mid-request only cancels it and drops the
//! registry's reference. The connection is freed once the worker exits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionId};
use crate::transport::{Transport, UreqTransport};

#[derive(Debug, Default)]
struct Slots {
    last_id: ConnectionId,
    connections: HashMap<ConnectionId, Arc<Connection>>,
}

impl Slots {
    /// Next id after `last_id`, wrapping, skipping `0` and ids in use.
    fn allocate(&mut self) -> Option<ConnectionId> {
        // len + 2 candidates: at most one is 0 and at most len are taken.
        for _ in 0..self.connections.len() + 2 {
            let id = self.last_id.wrapping_add(1);
            self.last_id = id;
            if id != 0 && !self.connections.contains_key(&id) {
                return Some(id);
            }
        }
        None
    }
}

pub struct Registry {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    slots: Mutex<Slots>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("connections", &self.len())
            .finish_non_exhaustive()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Registry {
    /// Registry whose connections use the blocking `ureq` transport.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(Arc::new(UreqTransport::new()), config)
    }

    pub fn with_transport(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            slots: Mutex::new(Slots::default()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create and register a connection. See [`Connection::new`] for how the
    /// arguments are validated. Returns `0` only when no id is available.
    pub fn create(&self, method: &str, url: &str, cache_policy: i32, timeout_secs: f32) -> ConnectionId {
        let connection = Connection::new(
            method,
            url,
            cache_policy,
            timeout_secs,
            Arc::clone(&self.transport),
            self.config.clone(),
        );
        let id = self.allocate(connection);
        if id != 0 {
            debug!(connection = id, method, url, "connection created");
        }
        id
    }

    /// Register `connection` under a fresh non-zero id and return it.
    pub fn allocate(&self, mut connection: Connection) -> ConnectionId {
        let mut slots = self.slots();
        let Some(id) = slots.allocate() else {
            warn!("connection registry is full");
            return 0;
        };
        connection.id = id;
        slots.connections.insert(id, Arc::new(connection));
        id
    }

    pub fn lookup(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.slots().connections.get(&id).cloned()
    }

    /// Forget `id` without cancelling the connection.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.slots().connections.remove(&id)
    }

    /// Cancel the connection and forget its id. Unknown ids are ignored.
    pub fn destroy(&self, id: ConnectionId) {
        match self.remove(id) {
            Some(connection) => {
                connection.cancel();
                debug!(connection = id, "connection destroyed");
            }
            None => debug!(connection = id, "destroy of unknown connection ignored"),
        }
    }

    pub fn len(&self) -> usize {
        self.slots().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let slots = std::mem::take(&mut *self.slots());
        for connection in slots.connections.into_values() {
            connection.cancel();
        }
    }
}
