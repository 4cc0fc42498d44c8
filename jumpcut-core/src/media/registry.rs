//! Exclusive ownership of a source's analysis entry point.
//!
//! At most one consumer may tap a given source at a time. Attaching a new
//! consumer disconnects the previous one: its lease turns invalid and it is
//! expected to stop reading. Leases give their slot back when dropped.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::SourceId;

struct Slot {
    lease_id: u64,
    connected: Arc<AtomicBool>,
}

#[derive(Default)]
struct RegistryInner {
    next_lease_id: u64,
    slots: HashMap<SourceId, Slot>,
}

/// Cheap to clone; all clones share one table.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the entry point of `source`, disconnecting any previous holder.
    pub fn attach(&self, source: SourceId) -> SourceLease {
        let connected = Arc::new(AtomicBool::new(true));
        let mut inner = self.inner.lock();
        inner.next_lease_id += 1;
        let lease_id = inner.next_lease_id;
        let previous = inner.slots.insert(
            source.clone(),
            Slot {
                lease_id,
                connected: Arc::clone(&connected),
            },
        );
        if let Some(previous) = previous {
            previous.connected.store(false, Ordering::SeqCst);
            info!(%source, "disconnected previous consumer of source");
        }
        debug!(%source, lease_id, "source attached");
        SourceLease {
            registry: Arc::clone(&self.inner),
            source,
            lease_id,
            connected,
        }
    }

    pub fn is_attached(&self, source: &SourceId) -> bool {
        self.inner.lock().slots.contains_key(source)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Proof of exclusive access to one source's entry point.
pub struct SourceLease {
    registry: Arc<Mutex<RegistryInner>>,
    source: SourceId,
    lease_id: u64,
    connected: Arc<AtomicBool>,
}

impl SourceLease {
    pub fn source(&self) -> &SourceId {
        &self.source
    }

    /// `false` once a newer consumer attached to the same source.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for SourceLease {
    fn drop(&mut self) {
        let mut inner = self.registry.lock();
        let ours = inner
            .slots
            .get(&self.source)
            .is_some_and(|slot| slot.lease_id == self.lease_id);
        if ours {
            inner.slots.remove(&self.source);
            debug!(source = %self.source, lease_id = self.lease_id, "source released");
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}
