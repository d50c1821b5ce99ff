//! Peer and provider directories.
//!
//! These are capabilities consumed by the core and by routing handlers. The
//! traits require internal synchronization: many connection tasks call them
//! at once. [`MemoryPeerStore`] and [`MemoryProviderStore`] are the
//! in-process implementations, cheap to clone and shared by reference count.

use p2pnet_types::peer::{ConnectionType, PeerInfo};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Directory of known peers, keyed by peer id.
pub trait PeerStore: Send + Sync {
    fn lookup(&self, id: &str) -> Option<PeerInfo>;

    /// Insert the peer, replacing any entry with the same id.
    fn upsert(&self, peer: PeerInfo);

    /// Forget the peer entirely, returning its last entry.
    fn remove(&self, id: &str) -> Option<PeerInfo>;
}

/// Directory of which peers provide which content.
pub trait ProviderStore: Send + Sync {
    /// Providers of `content_id`, at most one entry per peer id.
    fn providers_for(&self, content_id: &[u8]) -> Vec<PeerInfo>;

    /// Record `peer` as a provider of `content_id`. Re-adding a peer
    /// replaces its previous entry.
    fn add_provider(&self, content_id: &[u8], peer: PeerInfo);
}

/// Thread-safe in-memory peer directory.
#[derive(Debug, Clone, Default)]
pub struct MemoryPeerStore {
    peers: Arc<RwLock<HashMap<String, PeerInfo>>>,
}

impl MemoryPeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the connectivity of a known peer. Unknown ids are ignored.
    pub fn set_connection(&self, id: &str, connection: ConnectionType) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = peers.get_mut(id) {
            entry.connection = connection;
        }
    }

    /// Peers currently marked as connected.
    pub fn connected_peers(&self) -> Vec<PeerInfo> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers
            .values()
            .filter(|p| p.connection == ConnectionType::Connected)
            .cloned()
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers
            .values()
            .filter(|p| p.connection == ConnectionType::Connected)
            .count()
    }

    pub fn total_count(&self) -> usize {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.len()
    }
}

impl PeerStore for MemoryPeerStore {
    fn lookup(&self, id: &str) -> Option<PeerInfo> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.get(id).cloned()
    }

    fn upsert(&self, peer: PeerInfo) {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.insert(peer.id.clone(), peer);
    }

    fn remove(&self, id: &str) -> Option<PeerInfo> {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.remove(id)
    }
}

/// Thread-safe in-memory provider directory.
#[derive(Debug, Clone, Default)]
pub struct MemoryProviderStore {
    providers: Arc<RwLock<HashMap<Vec<u8>, Vec<PeerInfo>>>>,
}

impl MemoryProviderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct content ids with at least one provider.
    pub fn content_count(&self) -> usize {
        let providers = self.providers.read().unwrap_or_else(|e| e.into_inner());
        providers.len()
    }
}

impl ProviderStore for MemoryProviderStore {
    fn providers_for(&self, content_id: &[u8]) -> Vec<PeerInfo> {
        let providers = self.providers.read().unwrap_or_else(|e| e.into_inner());
        providers.get(content_id).cloned().unwrap_or_default()
    }

    fn add_provider(&self, content_id: &[u8], peer: PeerInfo) {
        let mut providers = self.providers.write().unwrap_or_else(|e| e.into_inner());
        let entry = providers.entry(content_id.to_vec()).or_default();
        if let Some(existing) = entry.iter_mut().find(|p| p.id == peer.id) {
            *existing = peer;
        } else {
            entry.push(peer);
        }
    }
}
