//! Registry of attached capture agents.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// Metadata kept for each attached capture agent.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub remote: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

/// Concurrent set of capture agent connections.
///
/// `total` moves by exactly one with each successful insert or remove, so
/// the totals handed back to concurrent callers are all distinct.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: DashMap<Uuid, ClientInfo>,
    total: AtomicUsize,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client and return its id with the new total.
    pub fn register(&self, remote: SocketAddr) -> (Uuid, usize) {
        let id = Uuid::new_v4();
        self.clients.insert(
            id,
            ClientInfo {
                remote,
                connected_at: Utc::now(),
            },
        );
        let total = self.total.fetch_add(1, Ordering::SeqCst) + 1;
        (id, total)
    }

    /// Remove a client and return the remaining total.
    pub fn remove(&self, id: &Uuid) -> usize {
        match self.clients.remove(id) {
            Some(_) => self.total.fetch_sub(1, Ordering::SeqCst) - 1,
            None => self.total.load(Ordering::SeqCst),
        }
    }

    pub fn count(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn get(&self, id: &Uuid) -> Option<ClientInfo> {
        self.clients.get(id).map(|entry| entry.value().clone())
    }
}
