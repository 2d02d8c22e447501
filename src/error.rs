use thiserror::Error;

use crate::config::ConfigError;
use crate::peer::{MembershipError, RpcError, ServerError};
use crate::proto::ProtoError;
use crate::store::StoreError;

/// Crate-level convenience error: a thin wrapper over the per-module errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Membership(#[from] MembershipError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
