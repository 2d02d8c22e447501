//! Outbound peer-to-peer requests.
//!
//! Every call opens one connection, performs one exchange, and closes. All
//! sockets get bounded read/write timeouts so a vanished remote surfaces as
//! an error instead of a hang.

use std::io::{self, BufReader, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use thiserror::Error;

use crate::proto::{self, ProtoError, Reply, Request, SlotChange};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("could not connect to {addr}: {source}")]
    Connect { addr: String, source: io::Error },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Proto(#[from] ProtoError),
    #[error("{what} refused by peer: {message}")]
    Refused { what: &'static str, message: String },
    #[error("blob transfer truncated: {got} of {expected} bytes")]
    ShortTransfer { expected: u64, got: u64 },
}

fn connect(addr: &str, timeout: Duration) -> Result<(TcpStream, BufReader<TcpStream>), RpcError> {
    let addr = addr.trim();
    let stream = TcpStream::connect(addr).map_err(|source| RpcError::Connect {
        addr: addr.to_string(),
        source,
    })?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    let reader = BufReader::new(stream.try_clone()?);
    Ok((stream, reader))
}

fn send_request(stream: &mut TcpStream, request: &Request) -> Result<(), RpcError> {
    stream.write_all(request.encode().as_bytes())?;
    stream.flush()?;
    Ok(())
}

fn expect_line(reader: &mut BufReader<TcpStream>) -> Result<String, RpcError> {
    proto::read_line(reader)?.ok_or(RpcError::Proto(ProtoError::ConnectionClosed))
}

/// `SUCC <id>`: asks `addr` for the owner of `id` and returns the owner address.
pub fn succ(addr: &str, id: u32, timeout: Duration) -> Result<String, RpcError> {
    let (mut stream, mut reader) = connect(addr, timeout)?;
    send_request(&mut stream, &Request::Succ { id })?;
    let answer = expect_line(&mut reader)?;
    if answer.is_empty() {
        return Err(RpcError::Proto(ProtoError::ConnectionClosed));
    }
    Ok(answer)
}

/// `JOIN <new_addr>` sent to `initiator`; returns the newcomer's
/// `(successor, predecessor)` addresses.
pub fn join(
    new_addr: &str,
    initiator: &str,
    timeout: Duration,
) -> Result<(String, String), RpcError> {
    let (mut stream, mut reader) = connect(initiator, timeout)?;
    send_request(
        &mut stream,
        &Request::Join {
            addr: new_addr.to_string(),
        },
    )?;
    let answer = expect_line(&mut reader)?;
    if let Ok(Reply::Err(message)) = Reply::parse(&answer) {
        return Err(RpcError::Refused {
            what: "join",
            message,
        });
    }
    let mut tokens = answer.split_whitespace();
    let succ = tokens
        .next()
        .ok_or(ProtoError::MissingToken("successor"))?
        .to_string();
    let pred = tokens
        .next()
        .ok_or(ProtoError::MissingToken("predecessor"))?
        .to_string();
    Ok((succ, pred))
}

/// `UPDATE`: rewrites a remote peer's neighbor slots. No reply on the wire.
pub fn update(
    addr: &str,
    succ: SlotChange,
    pred: SlotChange,
    timeout: Duration,
) -> Result<(), RpcError> {
    let (mut stream, _reader) = connect(addr, timeout)?;
    send_request(&mut stream, &Request::Update { succ, pred })?;
    Ok(())
}

/// Runs the store-client side of the `STORE` exchange: handshake, stream
/// exactly `size` bytes from `blob`, await the final `OK`.
pub fn store_blob(
    addr: &str,
    name: &str,
    size: u64,
    blob: &mut impl Read,
    timeout: Duration,
) -> Result<(), RpcError> {
    let (mut stream, mut reader) = connect(addr, timeout)?;
    send_request(
        &mut stream,
        &Request::Store {
            name: name.to_string(),
            size,
        },
    )?;

    match Reply::parse(&expect_line(&mut reader)?)? {
        Reply::Ok(_) => {}
        Reply::Err(message) => {
            return Err(RpcError::Refused {
                what: "store",
                message,
            });
        }
    }

    let copied = io::copy(&mut blob.take(size), &mut stream)?;
    if copied != size {
        return Err(RpcError::ShortTransfer {
            expected: size,
            got: copied,
        });
    }
    stream.flush()?;

    match Reply::parse(&expect_line(&mut reader)?)? {
        Reply::Ok(_) => Ok(()),
        Reply::Err(message) => Err(RpcError::Refused {
            what: "store",
            message,
        }),
    }
}

/// Runs the client side of the `RETRIEVE` exchange, writing the blob into
/// `sink`. Returns the byte count.
pub fn retrieve_blob(
    addr: &str,
    name: &str,
    sink: &mut impl Write,
    timeout: Duration,
) -> Result<u64, RpcError> {
    let (mut stream, mut reader) = connect(addr, timeout)?;
    send_request(
        &mut stream,
        &Request::Retrieve {
            name: name.to_string(),
        },
    )?;

    let size: u64 = match Reply::parse(&expect_line(&mut reader)?)? {
        Reply::Ok(Some(raw)) => raw.parse().map_err(|_| ProtoError::InvalidToken {
            field: "file size",
            raw,
        })?,
        Reply::Ok(None) => {
            return Err(RpcError::Proto(ProtoError::UnexpectedReply(
                "OK without a size".to_string(),
            )));
        }
        Reply::Err(message) => {
            return Err(RpcError::Refused {
                what: "retrieve",
                message,
            });
        }
    };

    let copied = io::copy(&mut (&mut reader).take(size), sink)?;
    if copied != size {
        return Err(RpcError::ShortTransfer {
            expected: size,
            got: copied,
        });
    }

    match Reply::parse(&expect_line(&mut reader)?)? {
        Reply::Ok(_) => Ok(size),
        Reply::Err(message) => Err(RpcError::Refused {
            what: "retrieve",
            message,
        }),
    }
}
