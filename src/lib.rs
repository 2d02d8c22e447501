#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
mod paths;
pub mod peer;
pub mod proto;
pub mod ring;
pub mod store;
pub mod telemetry;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the overlay vocabulary at crate root for convenience.
pub use crate::peer::{Neighbors, Node, Peer, PeerConfig, ServerHandle};
pub use crate::ring::{RING_CAPACITY, between, hash};
