//! Peer listener: accept loop and request dispatcher.

use std::io::{self, BufReader, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use super::Peer;
use super::membership::{self, MembershipError};
use super::routing;
use super::rpc::RpcError;
use super::state::Node;
use crate::proto::{self, Request};
use crate::store::BlobStore;

#[derive(Clone, Debug)]
pub struct PeerConfig {
    pub bind_host: String,
    pub port: u16,
    pub data_root: PathBuf,
    pub io_timeout: Duration,
}

impl PeerConfig {
    pub fn from_config(config: &crate::config::Config, port: u16) -> Self {
        Self {
            bind_host: config.bind_host.clone(),
            port,
            data_root: config.data_root(),
            io_timeout: config.io_timeout(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
}

/// Running listener. Dropping the handle leaks the accept thread; call
/// [`ServerHandle::shutdown`] for an orderly stop.
pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
    join: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.join.join();
    }
}

/// Binds the listener, derives `self` from the bound address, opens the blob
/// partition, and starts accepting in the background.
pub fn start(config: PeerConfig) -> Result<(Peer, ServerHandle), ServerError> {
    let bind_addr = format!("{}:{}", config.bind_host, config.port);
    let listener = TcpListener::bind(&bind_addr).map_err(|source| ServerError::Bind {
        addr: bind_addr,
        source,
    })?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;

    let self_node = Node::from_addr(local_addr.to_string());
    let store = BlobStore::open(&config.data_root, self_node.id)?;
    if !store.is_empty() {
        tracing::info!(blobs = store.len(), "rebuilt blob map from disk");
    }
    let peer = Peer::new(self_node, store, config.io_timeout);

    let shutdown = Arc::new(AtomicBool::new(false));
    let accept_peer = peer.clone();
    let accept_shutdown = Arc::clone(&shutdown);
    let join = thread::spawn(move || run_accept_loop(listener, accept_peer, accept_shutdown));

    tracing::info!(me = %peer.self_node(), "peer listening");
    Ok((
        peer,
        ServerHandle {
            shutdown,
            join,
            local_addr,
        },
    ))
}

fn run_accept_loop(listener: TcpListener, peer: Peer, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match listener.accept() {
            Ok((stream, remote)) => {
                let peer = peer.clone();
                thread::spawn(move || {
                    if let Err(err) = serve(&peer, stream) {
                        tracing::warn!(%remote, %err, "request failed");
                    }
                });
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(25));
            }
            Err(err) => {
                tracing::warn!(%err, "accept error");
                thread::sleep(Duration::from_millis(25));
            }
        }
    }
}

#[derive(Debug, Error)]
enum ServeError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Membership(#[from] MembershipError),
}

/// Handles one connection: one request line, one handler.
fn serve(peer: &Peer, mut stream: TcpStream) -> Result<(), ServeError> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(peer.io_timeout()))?;
    stream.set_write_timeout(Some(peer.io_timeout()))?;
    let mut reader = BufReader::new(stream.try_clone()?);

    let Some(line) = proto::read_line(&mut reader)? else {
        return Ok(());
    };
    tracing::debug!(%line, "received request");

    let request = match Request::parse(&line) {
        Ok(request) => request,
        Err(err) => {
            // Unknown verb or malformed tokens: close without reply.
            tracing::debug!(%line, %err, "dropping malformed request");
            return Ok(());
        }
    };

    match request {
        Request::Succ { id } => {
            let owner = routing::find_successor(peer, id % crate::ring::RING_CAPACITY)?;
            proto::write_line(&mut stream, owner)?;
        }
        Request::Join { addr } => membership::handle_join(peer, &mut stream, &addr)?,
        Request::Update { succ, pred } => peer.apply_update(&succ, &pred),
        Request::Store { name, size } => handle_store(peer, &mut stream, &mut reader, &name, size)?,
        Request::Retrieve { name } => handle_retrieve(peer, &mut stream, &name)?,
    }
    Ok(())
}

/// `STORE <name> <size>`: handshake `OK`, drain exactly `size` bytes into a
/// pending blob, commit, final `OK`. Any failure discards the pending blob
/// and answers `ERR`; the map never sees a half-written file.
fn handle_store(
    peer: &Peer,
    stream: &mut TcpStream,
    reader: &mut BufReader<TcpStream>,
    name: &str,
    size: u64,
) -> Result<(), ServeError> {
    let mut pending = match peer.store().begin(name) {
        Ok(pending) => pending,
        Err(err) => {
            tracing::warn!(name, %err, "store rejected");
            proto::write_err(stream, "Could not store file.")?;
            return Ok(());
        }
    };
    proto::write_ok(stream, None)?;

    match io::copy(&mut reader.by_ref().take(size), pending.file()) {
        Ok(copied) if copied == size => {}
        Ok(copied) => {
            tracing::warn!(name, size, copied, "store body truncated");
            proto::write_err(stream, "Could not copy file.")?;
            return Ok(());
        }
        Err(err) => {
            tracing::warn!(name, %err, "store body copy failed");
            proto::write_err(stream, "Could not copy file.")?;
            return Ok(());
        }
    }

    match peer.store().commit(pending) {
        Ok(()) => proto::write_ok(stream, None)?,
        Err(err) => {
            tracing::warn!(name, %err, "store commit failed");
            proto::write_err(stream, "Could not store file.")?;
        }
    }
    Ok(())
}

/// `RETRIEVE <name>`: `OK <size>`, the raw bytes, trailing `OK`.
fn handle_retrieve(peer: &Peer, stream: &mut TcpStream, name: &str) -> Result<(), ServeError> {
    let (mut blob, size) = match peer.store().open_blob(name) {
        Ok(found) => found,
        Err(_) => {
            proto::write_err(stream, "File does not exist.")?;
            return Ok(());
        }
    };

    proto::write_ok(stream, Some(&size.to_string()))?;
    match io::copy(&mut blob, stream) {
        Ok(copied) if copied == size => proto::write_ok(stream, None)?,
        Ok(_) | Err(_) => proto::write_err(stream, "Could not copy the file.")?,
    }
    Ok(())
}
