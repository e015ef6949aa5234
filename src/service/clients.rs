//! Client process tracking
//!
//! Every stream belongs to the process that opened it, and was opened over
//! one of that process's connections. When a connection dies the service
//! must close the streams opened through it, since nobody else will.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::error::Result;

use super::handles::StreamHandle;

/// Process id of a client
pub type ClientPid = i32;

/// Service-assigned id of one client connection
pub type ConnectionId = u64;

/// One connection of a client process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId {
    pub pid: ClientPid,
    pub connection: ConnectionId,
}

impl ClientId {
    pub fn new(pid: ClientPid, connection: ConnectionId) -> Self {
        Self { pid, connection }
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.pid, self.connection)
    }
}

/// Callback run once when a client process goes away
pub type DeathCallback = Box<dyn FnOnce() + Send>;

/// A channel that can tell the service its peer died
pub trait DeathNotifier: Send + Sync {
    /// Arrange for `callback` to run once when the peer dies. If the peer is
    /// already gone the callback runs immediately.
    fn link_to_death(&self, callback: DeathCallback) -> Result<()>;
}

#[derive(Default)]
struct ClientRecord {
    /// Live streams and the connection each was opened through
    streams: HashMap<StreamHandle, ConnectionId>,
    connections: HashMap<ConnectionId, Arc<dyn DeathNotifier>>,
}

/// Streams owned by each live client process
#[derive(Default)]
pub struct ClientProcessTracker {
    clients: Mutex<HashMap<ClientPid, ClientRecord>>,
}

impl ClientProcessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a client connection and keep its death notifier. Returns
    /// `true` when the connection is new and the caller should link to the
    /// notifier; re-registering a connection is a no-op.
    pub fn register_client(&self, client: ClientId, notifier: Arc<dyn DeathNotifier>) -> bool {
        let mut clients = self.clients.lock();
        let record = clients.entry(client.pid).or_default();
        if record.connections.contains_key(&client.connection) {
            return false;
        }
        record.connections.insert(client.connection, notifier);
        log::debug!("Registered client {}", client);
        true
    }

    /// Add a stream to a client's set, creating the record if needed
    pub fn register_client_stream(&self, client: ClientId, handle: StreamHandle) {
        self.clients
            .lock()
            .entry(client.pid)
            .or_default()
            .streams
            .insert(handle, client.connection);
    }

    /// Remove a stream from a client's set. Returns `false` if it was not
    /// there.
    pub fn unregister_client_stream(&self, pid: ClientPid, handle: StreamHandle) -> bool {
        self.clients
            .lock()
            .get_mut(&pid)
            .map_or(false, |record| record.streams.remove(&handle).is_some())
    }

    /// Snapshot of a client's streams
    pub fn streams_of(&self, pid: ClientPid) -> Vec<StreamHandle> {
        self.clients
            .lock()
            .get(&pid)
            .map(|record| record.streams.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the streams opened through one connection
    pub fn streams_of_connection(&self, client: ClientId) -> Vec<StreamHandle> {
        self.clients
            .lock()
            .get(&client.pid)
            .map(|record| {
                record
                    .streams
                    .iter()
                    .filter(|(_, connection)| **connection == client.connection)
                    .map(|(handle, _)| *handle)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Forget a connection and the streams opened through it, which are
    /// returned. The client goes once its last connection does.
    pub fn remove_connection(&self, client: ClientId) -> Vec<StreamHandle> {
        let mut clients = self.clients.lock();
        let Some(record) = clients.get_mut(&client.pid) else {
            return Vec::new();
        };
        record.connections.remove(&client.connection);
        let mut orphaned = Vec::new();
        record.streams.retain(|handle, connection| {
            if *connection == client.connection {
                orphaned.push(*handle);
                false
            } else {
                true
            }
        });
        if record.connections.is_empty() && record.streams.is_empty() {
            clients.remove(&client.pid);
        }
        orphaned
    }

    /// Forget a client. Returns the streams it still owned.
    pub fn remove_client(&self, pid: ClientPid) -> Vec<StreamHandle> {
        self.clients
            .lock()
            .remove(&pid)
            .map(|record| record.streams.into_keys().collect())
            .unwrap_or_default()
    }

    pub fn connection_count(&self, pid: ClientPid) -> usize {
        self.clients.lock().get(&pid).map_or(0, |record| record.connections.len())
    }

    pub fn is_registered(&self, pid: ClientPid) -> bool {
        self.clients.lock().contains_key(&pid)
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn stream_count(&self, pid: ClientPid) -> usize {
        self.clients.lock().get(&pid).map_or(0, |record| record.streams.len())
    }
}

impl std::fmt::Debug for ClientProcessTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientProcessTracker")
            .field("clients", &self.client_count())
            .finish()
    }
}

#[derive(Default)]
struct LifelineState {
    dead: bool,
    callbacks: Vec<DeathCallback>,
}

/// Death notification source for one client process or connection. Fires
/// its callbacks when declared dead or dropped.
#[derive(Default)]
pub struct ProcessLifeline {
    state: Arc<Mutex<LifelineState>>,
}

struct LifelineWatch {
    state: Arc<Mutex<LifelineState>>,
}

impl DeathNotifier for LifelineWatch {
    fn link_to_death(&self, callback: DeathCallback) -> Result<()> {
        let mut state = self.state.lock();
        if state.dead {
            drop(state);
            callback();
        } else {
            state.callbacks.push(callback);
        }
        Ok(())
    }
}

impl ProcessLifeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifier to hand to the service
    pub fn watch(&self) -> Arc<dyn DeathNotifier> {
        Arc::new(LifelineWatch {
            state: self.state.clone(),
        })
    }

    /// Fire every death notification. Later calls do nothing.
    pub fn declare_dead(&self) {
        let callbacks = {
            let mut state = self.state.lock();
            if state.dead {
                return;
            }
            state.dead = true;
            std::mem::take(&mut state.callbacks)
        };
        for callback in callbacks {
            callback();
        }
    }

    pub fn is_dead(&self) -> bool {
        self.state.lock().dead
    }
}

impl Drop for ProcessLifeline {
    fn drop(&mut self) {
        self.declare_dead();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NeverDies;

    impl DeathNotifier for NeverDies {
        fn link_to_death(&self, _callback: DeathCallback) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_register_is_idempotent() {
        let tracker = ClientProcessTracker::new();
        assert!(tracker.register_client(ClientId::new(10, 1), Arc::new(NeverDies)));
        assert!(!tracker.register_client(ClientId::new(10, 1), Arc::new(NeverDies)));
        // A second connection of the same process gets its own link
        assert!(tracker.register_client(ClientId::new(10, 2), Arc::new(NeverDies)));
        assert_eq!(tracker.client_count(), 1);
        assert_eq!(tracker.connection_count(10), 2);
    }

    #[test]
    fn test_stream_sets() {
        let tracker = ClientProcessTracker::new();
        tracker.register_client_stream(ClientId::new(10, 1), 1);
        tracker.register_client_stream(ClientId::new(10, 1), 2);
        tracker.register_client_stream(ClientId::new(11, 2), 3);
        assert_eq!(tracker.stream_count(10), 2);

        assert!(tracker.unregister_client_stream(10, 1));
        assert!(!tracker.unregister_client_stream(10, 1));
        assert_eq!(tracker.streams_of(10), vec![2]);

        assert_eq!(tracker.remove_client(11), vec![3]);
        assert!(!tracker.is_registered(11));
        assert!(!tracker.unregister_client_stream(11, 3));
    }

    #[test]
    fn test_connection_removal_keeps_sibling_streams() {
        let tracker = ClientProcessTracker::new();
        let first = ClientId::new(10, 1);
        let second = ClientId::new(10, 2);
        tracker.register_client(first, Arc::new(NeverDies));
        tracker.register_client(second, Arc::new(NeverDies));
        tracker.register_client_stream(first, 1);
        tracker.register_client_stream(second, 2);
        assert_eq!(tracker.streams_of_connection(second), vec![2]);

        assert_eq!(tracker.remove_connection(first), vec![1]);
        assert!(tracker.is_registered(10));
        assert_eq!(tracker.streams_of(10), vec![2]);

        assert_eq!(tracker.remove_connection(second), vec![2]);
        assert!(!tracker.is_registered(10));
    }

    #[test]
    fn test_lifeline_fires_once() {
        let lifeline = ProcessLifeline::new();
        let count = Arc::new(AtomicUsize::new(0));
        let watch = lifeline.watch();
        let c = count.clone();
        watch
            .link_to_death(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        lifeline.declare_dead();
        lifeline.declare_dead();
        drop(lifeline);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Linking after death runs right away
        let c = count.clone();
        watch
            .link_to_death(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
