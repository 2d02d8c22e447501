//! Join/leave protocols and key-range handoff.
//!
//! Membership changes are the only writers of the neighbor slots. The
//! operator is expected to serialize them: one `JOIN` or leave outstanding
//! cluster-wide at a time. A transport failure aborts the operation in
//! progress and leaves local state as the protocol had it at that point; it
//! never takes the process down.

use std::io::Write;

use thiserror::Error;

use super::Peer;
use super::routing;
use super::rpc::{self, RpcError};
use super::state::Node;
use crate::proto::{self, SlotChange};
use crate::ring;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Newcomer side: ask `initiator` to place us, then adopt the returned
/// neighbors. Files destined for our arc arrive afterwards through the
/// initiator's handoff `STORE` calls.
pub fn join_ring(peer: &Peer, initiator: &str) -> Result<(), MembershipError> {
    let me = peer.self_node();
    let (succ, pred) = rpc::join(&me.addr, initiator, peer.io_timeout())?;
    let successor = Node::from_addr(succ);
    let predecessor = Node::from_addr(pred);
    tracing::info!(%successor, %predecessor, "joined ring");
    peer.set_ring(successor, predecessor);
    Ok(())
}

/// Initiator side of `JOIN <new_addr>`. Writes the `<succ> <pred>` reply on
/// `conn` at the protocol-prescribed point.
pub fn handle_join(
    peer: &Peer,
    conn: &mut impl Write,
    new_addr: &str,
) -> Result<(), MembershipError> {
    let me = peer.self_node();
    let new_id = ring::hash(new_addr);

    // A newcomer landing exactly on our id cannot be placed: refuse
    // explicitly so its join errors out instead of hanging on a reply that
    // never comes.
    if new_id == me.id {
        tracing::warn!(new_addr, new_id, "refusing join: id collides with ours");
        proto::write_err(conn, "Self-initiation is not allowed.")?;
        return Ok(());
    }

    let neighbors = peer.neighbors();

    if neighbors.is_alone() {
        // Two-node ring: the newcomer becomes both neighbors. Its share of
        // the keys moves before the reply, so by the time it learns its
        // place it already holds them.
        let newcomer = Node::from_addr(new_addr);
        hand_off(peer, &newcomer);
        proto::write_line(conn, format!("{} {}", me.addr, me.addr))?;
        peer.set_ring(newcomer.clone(), newcomer);
        tracing::info!(new_addr, new_id, "admitted first neighbor");
        return Ok(());
    }

    let owner = routing::find_successor(peer, new_id)?;
    if owner != me.addr {
        // Not our arc: re-issue the join at the owner and relay its answer.
        let (succ, pred) = rpc::join(new_addr, &owner, peer.io_timeout())?;
        proto::write_line(conn, format!("{succ} {pred}"))?;
        return Ok(());
    }

    let Some(old_pred) = neighbors.predecessor else {
        // Not alone but missing a predecessor: the ring is mid-transition;
        // drop the request rather than guess.
        tracing::warn!(new_addr, "join received while predecessor unset");
        return Ok(());
    };

    // The newcomer slots in between our old predecessor and us.
    proto::write_line(conn, format!("{} {}", me.addr, old_pred.addr))?;
    rpc::update(
        &old_pred.addr,
        SlotChange::Set(new_addr.to_string()),
        SlotChange::Keep,
        peer.io_timeout(),
    )?;
    let newcomer = Node::from_addr(new_addr);
    hand_off(peer, &newcomer);
    peer.set_predecessor(newcomer);
    tracing::info!(new_addr, new_id, "admitted new predecessor");
    Ok(())
}

/// Leaves the ring: rewire both neighbors, shed every blob to the successor,
/// drop the local partition. No-op when alone.
pub fn leave_ring(peer: &Peer) -> Result<(), MembershipError> {
    let neighbors = peer.neighbors();
    let (Some(pred), Some(succ)) = (neighbors.predecessor, neighbors.successor) else {
        return Ok(());
    };
    let timeout = peer.io_timeout();

    // Successor inherits our predecessor; predecessor inherits our
    // successor. In a two-node ring both messages reach the same peer and
    // each names its own address, clearing its slots.
    rpc::update(
        &succ.addr,
        SlotChange::Keep,
        SlotChange::Set(pred.addr.clone()),
        timeout,
    )?;
    rpc::update(
        &pred.addr,
        SlotChange::Set(succ.addr.clone()),
        SlotChange::Keep,
        timeout,
    )?;

    // Everything we hold lies in the successor's arc once we are gone. Both
    // neighbors were already told the new ring shape, so local fs failures
    // from here on are logged and skipped; the slots must clear regardless.
    let mut kept = 0usize;
    for (name, key) in peer.store().entries() {
        match send_blob(peer, &succ.addr, &name) {
            Ok(()) => {
                if let Err(err) = peer.store().remove(&name) {
                    tracing::warn!(%name, %err, "transferred blob not removed");
                }
            }
            Err(err) => {
                tracing::warn!(%name, key, %err, "blob transfer failed during leave");
                kept += 1;
            }
        }
    }
    if kept == 0 {
        if let Err(err) = peer.store().purge() {
            tracing::warn!(%err, "blob partition not removed");
        }
    } else {
        tracing::warn!(kept, "left ring with untransferred blobs on disk");
    }

    peer.clear_neighbors();
    tracing::info!("left ring");
    Ok(())
}

/// Moves every blob whose key now belongs to `newcomer`: everything outside
/// our remaining arc `(newcomer, self]`. Failed transfers keep the local
/// copy and are logged; the rest of the handoff proceeds.
fn hand_off(peer: &Peer, newcomer: &Node) {
    let me = peer.self_node();
    let moving: Vec<(String, u32)> = peer
        .store()
        .entries()
        .into_iter()
        .filter(|(_, key)| !(ring::between(newcomer.id, *key, me.id) || *key == me.id))
        .collect();

    for (name, key) in moving {
        match send_blob(peer, &newcomer.addr, &name) {
            Ok(()) => match peer.store().remove(&name) {
                Ok(()) => tracing::debug!(%name, key, to = %newcomer, "blob handed off"),
                Err(err) => tracing::warn!(%name, %err, "handed-off blob not removed"),
            },
            Err(err) => tracing::warn!(%name, key, %err, "blob handoff failed; keeping local copy"),
        }
    }
}

fn send_blob(peer: &Peer, dest: &str, name: &str) -> Result<(), MembershipError> {
    let (mut blob, size) = peer.store().open_blob(name)?;
    rpc::store_blob(dest, name, size, &mut blob, peer.io_timeout())?;
    Ok(())
}
