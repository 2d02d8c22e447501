//! Line-oriented wire protocol shared by peers and clients.
//!
//! Requests and responses are newline-terminated ASCII lines with
//! space-separated tokens. A connection carries exactly one request and,
//! where applicable, one response followed by a raw byte copy of the blob.

use std::io::{BufRead, Write};

use thiserror::Error;

/// Reserved `UPDATE` token meaning "leave this neighbor slot unchanged".
pub const KEEP: &str = "KEEP";

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("empty request line")]
    EmptyLine,
    #[error("unknown verb: {0}")]
    UnknownVerb(String),
    #[error("missing token: {0}")]
    MissingToken(&'static str),
    #[error("invalid {field}: {raw}")]
    InvalidToken { field: &'static str, raw: String },
    #[error("peer closed the connection before replying")]
    ConnectionClosed,
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

/// One `UPDATE` slot instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotChange {
    /// Leave the slot as it is.
    Keep,
    /// Bind the slot to this address.
    Set(String),
}

impl SlotChange {
    fn parse(token: &str) -> Self {
        if token == KEEP {
            SlotChange::Keep
        } else {
            SlotChange::Set(token.to_string())
        }
    }

    fn as_token(&self) -> &str {
        match self {
            SlotChange::Keep => KEEP,
            SlotChange::Set(addr) => addr,
        }
    }
}

/// A parsed request line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// `SUCC <id>`: who owns this id?
    Succ { id: u32 },
    /// `JOIN <addr>`: admit this newcomer to the ring.
    Join { addr: String },
    /// `UPDATE <succ|KEEP> <pred|KEEP>`: rewrite neighbor slots.
    Update { succ: SlotChange, pred: SlotChange },
    /// `STORE <name> <size>`: a blob of `size` bytes follows the handshake.
    Store { name: String, size: u64 },
    /// `RETRIEVE <name>`: stream the named blob back.
    Retrieve { name: String },
}

impl Request {
    /// Parses a trimmed request line.
    pub fn parse(line: &str) -> Result<Self, ProtoError> {
        let mut tokens = line.split_whitespace();
        let verb = tokens.next().ok_or(ProtoError::EmptyLine)?;
        match verb {
            "SUCC" => {
                let raw = tokens.next().ok_or(ProtoError::MissingToken("id"))?;
                let id = raw.parse().map_err(|_| ProtoError::InvalidToken {
                    field: "id",
                    raw: raw.to_string(),
                })?;
                Ok(Request::Succ { id })
            }
            "JOIN" => {
                let addr = tokens.next().ok_or(ProtoError::MissingToken("address"))?;
                Ok(Request::Join {
                    addr: addr.to_string(),
                })
            }
            "UPDATE" => {
                let succ = tokens.next().ok_or(ProtoError::MissingToken("successor"))?;
                let pred = tokens
                    .next()
                    .ok_or(ProtoError::MissingToken("predecessor"))?;
                Ok(Request::Update {
                    succ: SlotChange::parse(succ),
                    pred: SlotChange::parse(pred),
                })
            }
            "STORE" => {
                let name = tokens.next().ok_or(ProtoError::MissingToken("file name"))?;
                let raw = tokens.next().ok_or(ProtoError::MissingToken("file size"))?;
                let size = raw.parse().map_err(|_| ProtoError::InvalidToken {
                    field: "file size",
                    raw: raw.to_string(),
                })?;
                Ok(Request::Store {
                    name: name.to_string(),
                    size,
                })
            }
            "RETRIEVE" => {
                let name = tokens.next().ok_or(ProtoError::MissingToken("file name"))?;
                Ok(Request::Retrieve {
                    name: name.to_string(),
                })
            }
            other => Err(ProtoError::UnknownVerb(other.to_string())),
        }
    }

    /// Renders the request as a wire line, newline included.
    pub fn encode(&self) -> String {
        match self {
            Request::Succ { id } => format!("SUCC {id}\n"),
            Request::Join { addr } => format!("JOIN {addr}\n"),
            Request::Update { succ, pred } => {
                format!("UPDATE {} {}\n", succ.as_token(), pred.as_token())
            }
            Request::Store { name, size } => format!("STORE {name} {size}\n"),
            Request::Retrieve { name } => format!("RETRIEVE {name}\n"),
        }
    }
}

/// An `OK`/`ERR` status line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// `OK` with an optional payload (e.g. a blob size).
    Ok(Option<String>),
    /// `ERR <message>`.
    Err(String),
}

impl Reply {
    /// Parses a trimmed status line.
    pub fn parse(line: &str) -> Result<Self, ProtoError> {
        if let Some(rest) = line.strip_prefix("OK") {
            let rest = rest.trim();
            if rest.is_empty() {
                Ok(Reply::Ok(None))
            } else {
                Ok(Reply::Ok(Some(rest.to_string())))
            }
        } else if let Some(rest) = line.strip_prefix("ERR") {
            Ok(Reply::Err(rest.trim().to_string()))
        } else {
            Err(ProtoError::UnexpectedReply(line.to_string()))
        }
    }
}

/// Reads one line, without the terminator. `None` means clean end-of-stream.
pub fn read_line(reader: &mut impl BufRead) -> std::io::Result<Option<String>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Writes one newline-terminated line and flushes it.
pub fn write_line(writer: &mut impl Write, line: impl AsRef<str>) -> std::io::Result<()> {
    writer.write_all(line.as_ref().as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// Writes `OK` with an optional payload token.
pub fn write_ok(writer: &mut impl Write, payload: Option<&str>) -> std::io::Result<()> {
    match payload {
        Some(payload) => write_line(writer, format!("OK {payload}")),
        None => write_line(writer, "OK"),
    }
}

/// Writes `ERR <message>`.
pub fn write_err(writer: &mut impl Write, message: &str) -> std::io::Result<()> {
    write_line(writer, format!("ERR {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_verb() {
        assert_eq!(Request::parse("SUCC 42").unwrap(), Request::Succ { id: 42 });
        assert_eq!(
            Request::parse("JOIN 127.0.0.1:4000").unwrap(),
            Request::Join {
                addr: "127.0.0.1:4000".to_string()
            }
        );
        assert_eq!(
            Request::parse("UPDATE 127.0.0.1:4000 KEEP").unwrap(),
            Request::Update {
                succ: SlotChange::Set("127.0.0.1:4000".to_string()),
                pred: SlotChange::Keep,
            }
        );
        assert_eq!(
            Request::parse("STORE notes.txt 512").unwrap(),
            Request::Store {
                name: "notes.txt".to_string(),
                size: 512,
            }
        );
        assert_eq!(
            Request::parse("RETRIEVE notes.txt").unwrap(),
            Request::Retrieve {
                name: "notes.txt".to_string()
            }
        );
    }

    #[test]
    fn encode_parse_round_trip() {
        let requests = [
            Request::Succ { id: 7 },
            Request::Join {
                addr: "127.0.0.1:9000".to_string(),
            },
            Request::Update {
                succ: SlotChange::Keep,
                pred: SlotChange::Set("127.0.0.1:9001".to_string()),
            },
            Request::Store {
                name: "a.bin".to_string(),
                size: 9,
            },
        ];
        for request in requests {
            assert_eq!(Request::parse(request.encode().trim()).unwrap(), request);
        }
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(matches!(
            Request::parse("PING"),
            Err(ProtoError::UnknownVerb(_))
        ));
        assert!(matches!(Request::parse(""), Err(ProtoError::EmptyLine)));
        assert!(matches!(
            Request::parse("SUCC abc"),
            Err(ProtoError::InvalidToken { field: "id", .. })
        ));
        assert!(matches!(
            Request::parse("STORE name"),
            Err(ProtoError::MissingToken("file size"))
        ));
        assert!(matches!(
            Request::parse("UPDATE KEEP"),
            Err(ProtoError::MissingToken("predecessor"))
        ));
    }

    #[test]
    fn reply_lines() {
        assert_eq!(Reply::parse("OK").unwrap(), Reply::Ok(None));
        assert_eq!(
            Reply::parse("OK 512").unwrap(),
            Reply::Ok(Some("512".to_string()))
        );
        assert_eq!(
            Reply::parse("ERR File does not exist.").unwrap(),
            Reply::Err("File does not exist.".to_string())
        );
        assert!(Reply::parse("127.0.0.1:4000").is_err());
    }
}
