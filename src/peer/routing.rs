//! Successor lookup.

use super::Peer;
use super::rpc::{self, RpcError};
use crate::ring;

/// Returns the address of the peer that owns `id`.
///
/// Single-hop local decision where the neighbor snapshot suffices, otherwise
/// the query is forwarded clockwise to the successor. Each hop strictly
/// progresses toward `id`, so the walk terminates within one lap of the
/// ring. Under a concurrent membership change the answer is best-effort.
pub fn find_successor(peer: &Peer, id: u32) -> Result<String, RpcError> {
    let me = peer.self_node();
    let neighbors = peer.neighbors();

    // Alone: every id maps here.
    let (Some(pred), Some(succ)) = (&neighbors.predecessor, &neighbors.successor) else {
        return Ok(me.addr.clone());
    };

    if ring::between(pred.id, id, me.id) || id == me.id {
        return Ok(me.addr.clone());
    }
    if ring::between(me.id, id, succ.id) || id == succ.id {
        return Ok(succ.addr.clone());
    }

    rpc::succ(&succ.addr, id, peer.io_timeout())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::peer::state::Node;
    use crate::proto::SlotChange;
    use crate::store::BlobStore;

    fn test_peer(addr: &str) -> (Peer, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let node = Node::from_addr(addr);
        let store = BlobStore::open(dir.path(), node.id).expect("open store");
        (Peer::new(node, store, Duration::from_secs(1)), dir)
    }

    #[test]
    fn alone_peer_owns_everything() {
        let (peer, _dir) = test_peer("127.0.0.1:4000");
        for id in 0..ring::RING_CAPACITY {
            assert_eq!(find_successor(&peer, id).unwrap(), "127.0.0.1:4000");
        }
    }

    #[test]
    fn resolves_own_arc_and_successor_arc_locally() {
        // Ring positions: pred(7) -> me(44) -> succ(74).
        let (peer, _dir) = test_peer("127.0.0.1:4000");
        let me = peer.self_node().clone();
        let succ = Node::from_addr("127.0.0.1:4001");
        let pred = Node::from_addr("127.0.0.1:4003");
        peer.apply_update(
            &SlotChange::Set(succ.addr.clone()),
            &SlotChange::Set(pred.addr.clone()),
        );

        // Boundary ids are inclusive on the high end of each arc.
        assert_eq!(find_successor(&peer, me.id).unwrap(), me.addr);
        assert_eq!(find_successor(&peer, succ.id).unwrap(), succ.addr);

        // First position past the predecessor falls in our arc; first past
        // us falls in the successor's.
        let in_my_arc = (pred.id + 1) % ring::RING_CAPACITY;
        assert_eq!(find_successor(&peer, in_my_arc).unwrap(), me.addr);
        let in_succ_arc = (me.id + 1) % ring::RING_CAPACITY;
        assert_eq!(find_successor(&peer, in_succ_arc).unwrap(), succ.addr);
    }
}
