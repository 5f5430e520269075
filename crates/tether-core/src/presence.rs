use dashmap::DashMap;
use tether_models::ServerEvent;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Push endpoint for one live gateway connection.
///
/// The connection id distinguishes a live handle from a stale one that was
/// replaced during a reconnect race; deregistration compares it before
/// deleting anything.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub connection_id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            tx,
        }
    }

    /// Queue an event for this connection. Returns false when the receiving
    /// task has already gone away (the frame is simply dropped).
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// In-memory map of identity -> active connection handle; the single source
/// of truth for "who is online" within this process. Not durable, rebuilt
/// empty on restart. Injected via AppState so a distributed implementation
/// can replace it without touching the gateway.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    connections: DashMap<String, ConnectionHandle>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for an identity. Last connection wins: an
    /// existing handle is replaced (not closed) and returned so the caller
    /// can decide what to do with it.
    pub fn register(&self, identity: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.connections.insert(identity.to_string(), handle)
    }

    /// Remove the identity's entry only if it still belongs to the given
    /// connection. A disconnect of a stale, already-replaced handle must not
    /// evict the newer entry. Returns whether an entry was removed.
    pub fn unregister(&self, identity: &str, connection_id: Uuid) -> bool {
        self.connections
            .remove_if(identity, |_, handle| handle.connection_id == connection_id)
            .is_some()
    }

    pub fn lookup(&self, identity: &str) -> Option<ConnectionHandle> {
        self.connections.get(identity).map(|entry| entry.clone())
    }

    pub fn is_online(&self, identity: &str) -> bool {
        self.connections.contains_key(identity)
    }

    /// Snapshot of all online identities.
    pub fn all_online(&self) -> Vec<String> {
        self.connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Fan an event out to every registered connection except the named one.
    pub fn broadcast_except(&self, connection_id: Uuid, event: &ServerEvent) {
        for entry in self.connections.iter() {
            if entry.connection_id != connection_id {
                let _ = entry.send(event.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(tx), rx)
    }

    #[test]
    fn register_lookup_unregister() {
        let registry = PresenceRegistry::new();
        let (h, _rx) = handle();
        let id = h.connection_id;

        assert!(registry.register("alice", h).is_none());
        assert!(registry.is_online("alice"));
        assert!(registry.lookup("alice").is_some());

        assert!(registry.unregister("alice", id));
        assert!(registry.lookup("alice").is_none());
        // Second close for the same connection is a no-op.
        assert!(!registry.unregister("alice", id));
    }

    #[test]
    fn stale_handle_disconnect_does_not_evict_newer_entry() {
        let registry = PresenceRegistry::new();
        let (old, _rx1) = handle();
        let (new, _rx2) = handle();
        let old_id = old.connection_id;
        let new_id = new.connection_id;

        registry.register("alice", old);
        // Reconnect replaces the prior handle without an explicit close.
        let replaced = registry.register("alice", new).expect("old handle back");
        assert_eq!(replaced.connection_id, old_id);

        // The stale handle's disconnect must leave the new entry alone.
        assert!(!registry.unregister("alice", old_id));
        assert_eq!(
            registry.lookup("alice").map(|h| h.connection_id),
            Some(new_id)
        );

        assert!(registry.unregister("alice", new_id));
        assert!(!registry.is_online("alice"));
    }

    #[test]
    fn broadcast_skips_the_originating_connection() {
        let registry = PresenceRegistry::new();
        let (a, mut rx_a) = handle();
        let (b, mut rx_b) = handle();
        let a_id = a.connection_id;
        registry.register("alice", a);
        registry.register("bob", b);

        registry.broadcast_except(
            a_id,
            &ServerEvent::UserOnline {
                user_id: "alice".into(),
            },
        );

        assert!(rx_b.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());

        let mut online = registry.all_online();
        online.sort();
        assert_eq!(online, vec!["alice".to_string(), "bob".to_string()]);
    }
}
