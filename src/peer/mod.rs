//! Ring peer runtime: shared state, request dispatch, membership.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::proto::SlotChange;
use crate::store::BlobStore;

pub mod membership;
pub mod routing;
pub mod rpc;
pub mod server;
mod state;

pub use membership::{MembershipError, join_ring, leave_ring};
pub use rpc::RpcError;
pub use server::{PeerConfig, ServerError, ServerHandle, start};
pub use state::{Neighbors, Node};

/// Handle to one peer's shared state. Cheap to clone; every connection
/// thread and the operator menu hold one.
///
/// Lock order is state → files: the neighbor lock and the blob map lock are
/// never held across a network call (callers snapshot, then operate).
#[derive(Clone)]
pub struct Peer {
    shared: Arc<Shared>,
}

struct Shared {
    self_node: Node,
    neighbors: Mutex<Neighbors>,
    store: BlobStore,
    io_timeout: Duration,
}

impl Peer {
    pub(crate) fn new(self_node: Node, store: BlobStore, io_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                self_node,
                neighbors: Mutex::new(Neighbors::default()),
                store,
                io_timeout,
            }),
        }
    }

    pub fn self_node(&self) -> &Node {
        &self.shared.self_node
    }

    /// Snapshot of the neighbor slots.
    pub fn neighbors(&self) -> Neighbors {
        self.lock_neighbors().clone()
    }

    pub fn store(&self) -> &BlobStore {
        &self.shared.store
    }

    pub fn io_timeout(&self) -> Duration {
        self.shared.io_timeout
    }

    /// Applies one `UPDATE` instruction pair. A slot naming this peer's own
    /// address means the sender left a two-node ring: this peer is alone
    /// again and both slots clear.
    pub fn apply_update(&self, succ: &SlotChange, pred: &SlotChange) {
        let mut neighbors = self.lock_neighbors();
        match succ {
            SlotChange::Keep => {}
            SlotChange::Set(addr) if *addr == self.shared.self_node.addr => neighbors.clear(),
            SlotChange::Set(addr) => neighbors.successor = Some(Node::from_addr(addr.clone())),
        }
        match pred {
            SlotChange::Keep => {}
            SlotChange::Set(addr) if *addr == self.shared.self_node.addr => neighbors.clear(),
            SlotChange::Set(addr) => neighbors.predecessor = Some(Node::from_addr(addr.clone())),
        }
    }

    pub(crate) fn set_ring(&self, successor: Node, predecessor: Node) {
        let mut neighbors = self.lock_neighbors();
        neighbors.successor = Some(successor);
        neighbors.predecessor = Some(predecessor);
    }

    pub(crate) fn set_predecessor(&self, predecessor: Node) {
        self.lock_neighbors().predecessor = Some(predecessor);
    }

    pub(crate) fn clear_neighbors(&self) {
        self.lock_neighbors().clear();
    }

    fn lock_neighbors(&self) -> std::sync::MutexGuard<'_, Neighbors> {
        self.shared
            .neighbors
            .lock()
            .expect("neighbor lock poisoned")
    }
}
