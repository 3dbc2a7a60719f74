//! Collector line protocol: message types, frame decoding and encoding.
//!
//! A frame is a message-type token line, optionally followed by an id line
//! and a payload line, each terminated by `\n`:
//!
//! ```text
//! server → agent   AUTHORIZE\n
//! agent  → server  AUTHORIZE\nn1\n
//! server → agent   AUTHORIZE_OK\n
//! agent  → server  METRICS\nn1\n{"load_1":0.3}\n
//! agent  → server  HEARTBEAT\nn1\n
//! server → agent   HEARTBEAT\npong\n
//! agent  → server  CLOSE\n
//! ```
//!
//! The protocol is server-first: the collector writes the `AUTHORIZE` prompt
//! as soon as it accepts a connection. There is no version field; changing a
//! token is a breaking change for every deployed agent.

pub mod codec;

use bytes::{BufMut, Bytes, BytesMut};

pub use codec::{Direction, FrameCodec};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tokens
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const AUTHORIZE: &str = "AUTHORIZE";
pub const AUTHORIZE_OK: &str = "AUTHORIZE_OK";
pub const AUTHORIZE_NOT_FOUND: &str = "AUTHORIZE_NOT_FOUND";
pub const AUTHORIZE_DISABLED: &str = "AUTHORIZE_DISABLED";
pub const AUTHORIZE_ALREADY_BOUND: &str = "AUTHORIZE_ALREADY_BOUND";
pub const METRICS: &str = "METRICS";
pub const HEARTBEAT: &str = "HEARTBEAT";
pub const CLOSE: &str = "CLOSE";

/// Body of the server's heartbeat reply.
pub const PONG: &str = "pong";

/// Message type, as carried by the first line of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Authorize,
    AuthorizeOk,
    AuthorizeNotFound,
    AuthorizeDisabled,
    AuthorizeAlreadyBound,
    Metrics,
    Heartbeat,
    Close,
}

impl MessageKind {
    pub fn token(self) -> &'static str {
        match self {
            Self::Authorize => AUTHORIZE,
            Self::AuthorizeOk => AUTHORIZE_OK,
            Self::AuthorizeNotFound => AUTHORIZE_NOT_FOUND,
            Self::AuthorizeDisabled => AUTHORIZE_DISABLED,
            Self::AuthorizeAlreadyBound => AUTHORIZE_ALREADY_BOUND,
            Self::Metrics => METRICS,
            Self::Heartbeat => HEARTBEAT,
            Self::Close => CLOSE,
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            AUTHORIZE => Self::Authorize,
            AUTHORIZE_OK => Self::AuthorizeOk,
            AUTHORIZE_NOT_FOUND => Self::AuthorizeNotFound,
            AUTHORIZE_DISABLED => Self::AuthorizeDisabled,
            AUTHORIZE_ALREADY_BOUND => Self::AuthorizeAlreadyBound,
            METRICS => Self::Metrics,
            HEARTBEAT => Self::Heartbeat,
            CLOSE => Self::Close,
            _ => return None,
        })
    }

    /// Number of lines following the token for a frame travelling in
    /// `direction`, or `None` if this kind never travels that way.
    pub fn field_lines(self, direction: Direction) -> Option<usize> {
        match (direction, self) {
            (Direction::ToServer, Self::Authorize) => Some(1),
            (Direction::ToServer, Self::Metrics) => Some(2),
            (Direction::ToServer, Self::Heartbeat) => Some(1),
            (Direction::ToServer, Self::Close) => Some(0),
            (Direction::ToServer, _) => None,

            (Direction::ToAgent, Self::Authorize) => Some(0),
            (Direction::ToAgent, Self::AuthorizeOk) => Some(0),
            (Direction::ToAgent, Self::AuthorizeNotFound) => Some(0),
            (Direction::ToAgent, Self::AuthorizeDisabled) => Some(0),
            (Direction::ToAgent, Self::AuthorizeAlreadyBound) => Some(0),
            (Direction::ToAgent, Self::Heartbeat) => Some(1),
            (Direction::ToAgent, _) => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Why an authorize attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The id is not in the node definitions.
    NotFound,
    /// The id is defined but `enabled = false`.
    Disabled,
    /// Another live connection already holds the id.
    AlreadyBound,
}

impl DenyReason {
    fn kind(self) -> MessageKind {
        match self {
            Self::NotFound => MessageKind::AuthorizeNotFound,
            Self::Disabled => MessageKind::AuthorizeDisabled,
            Self::AlreadyBound => MessageKind::AuthorizeAlreadyBound,
        }
    }
}

/// Agent → server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Authorize { id: String },
    Metrics { id: String, payload: String },
    Heartbeat { id: String },
    Close,
}

/// Server → agent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Sent on accept to ask the agent to identify itself.
    AuthorizePrompt,
    AuthorizeOk,
    AuthorizeDenied(DenyReason),
    Heartbeat(String),
}

impl Inbound {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Authorize { .. } => MessageKind::Authorize,
            Self::Metrics { .. } => MessageKind::Metrics,
            Self::Heartbeat { .. } => MessageKind::Heartbeat,
            Self::Close => MessageKind::Close,
        }
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Self::Authorize { id } => encode_frame(self.kind(), &[id]),
            Self::Metrics { id, payload } => encode_frame(self.kind(), &[id, payload]),
            Self::Heartbeat { id } => encode_frame(self.kind(), &[id]),
            Self::Close => encode_frame(self.kind(), &[]),
        }
    }
}

impl Outbound {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::AuthorizePrompt => MessageKind::Authorize,
            Self::AuthorizeOk => MessageKind::AuthorizeOk,
            Self::AuthorizeDenied(reason) => reason.kind(),
            Self::Heartbeat(_) => MessageKind::Heartbeat,
        }
    }

    pub fn pong() -> Self {
        Self::Heartbeat(PONG.to_string())
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Self::Heartbeat(body) => encode_frame(self.kind(), &[body]),
            _ => encode_frame(self.kind(), &[]),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A frame that cannot be turned into a message. The connection that
/// produced it is closed; nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,

    #[error("unknown message type {0:?}")]
    UnknownType(String),

    #[error("{0} is not valid in this direction")]
    Unexpected(&'static str),

    #[error("{kind} frame truncated: missing {missing} line(s)")]
    Truncated { kind: &'static str, missing: usize },

    #[error("{kind} frame has an empty id")]
    EmptyField { kind: &'static str },

    #[error("frame exceeds {max} bytes")]
    TooLong { max: usize },

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse one complete agent → server frame.
pub fn decode_frame(frame: &[u8]) -> Result<Inbound, FrameError> {
    let (kind, fields) = split_frame(frame, Direction::ToServer)?;
    let mut fields = fields.into_iter();
    let mut next = || fields.next().unwrap_or_default();

    match kind {
        MessageKind::Authorize => Ok(Inbound::Authorize {
            id: non_empty(kind, next())?,
        }),
        MessageKind::Metrics => {
            let id = non_empty(kind, next())?;
            Ok(Inbound::Metrics {
                id,
                payload: next().to_string(),
            })
        }
        MessageKind::Heartbeat => Ok(Inbound::Heartbeat {
            id: non_empty(kind, next())?,
        }),
        MessageKind::Close => Ok(Inbound::Close),
        other => Err(FrameError::Unexpected(other.token())),
    }
}

/// Parse one complete server → agent frame.
pub fn decode_reply(frame: &[u8]) -> Result<Outbound, FrameError> {
    let (kind, fields) = split_frame(frame, Direction::ToAgent)?;
    match kind {
        MessageKind::Authorize => Ok(Outbound::AuthorizePrompt),
        MessageKind::AuthorizeOk => Ok(Outbound::AuthorizeOk),
        MessageKind::AuthorizeNotFound => Ok(Outbound::AuthorizeDenied(DenyReason::NotFound)),
        MessageKind::AuthorizeDisabled => Ok(Outbound::AuthorizeDenied(DenyReason::Disabled)),
        MessageKind::AuthorizeAlreadyBound => {
            Ok(Outbound::AuthorizeDenied(DenyReason::AlreadyBound))
        }
        MessageKind::Heartbeat => Ok(Outbound::Heartbeat(
            fields.first().copied().unwrap_or_default().to_string(),
        )),
        other => Err(FrameError::Unexpected(other.token())),
    }
}

/// Split a frame into its kind and exactly the number of field lines that
/// kind requires in `direction`. Extra trailing lines are ignored.
fn split_frame(frame: &[u8], direction: Direction) -> Result<(MessageKind, Vec<&str>), FrameError> {
    let text = std::str::from_utf8(frame).map_err(|_| FrameError::InvalidUtf8)?;
    let mut lines = text.split_inclusive('\n').map(trim_eol);

    let token = lines.next().unwrap_or_default();
    if token.is_empty() {
        return Err(FrameError::Empty);
    }
    let kind =
        MessageKind::from_token(token).ok_or_else(|| FrameError::UnknownType(token.to_string()))?;
    let needed = kind
        .field_lines(direction)
        .ok_or(FrameError::Unexpected(kind.token()))?;

    let fields: Vec<&str> = lines.take(needed).collect();
    if fields.len() < needed {
        return Err(FrameError::Truncated {
            kind: kind.token(),
            missing: needed - fields.len(),
        });
    }
    Ok((kind, fields))
}

fn non_empty(kind: MessageKind, field: &str) -> Result<String, FrameError> {
    let field = field.trim();
    if field.is_empty() {
        return Err(FrameError::EmptyField { kind: kind.token() });
    }
    Ok(field.to_string())
}

fn trim_eol(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Encoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const LINE_BREAKS: &[char] = &['\n', '\r'];

/// Line breaks inside a field would split the frame, so they are flattened
/// to spaces.
fn encode_frame(kind: MessageKind, fields: &[&String]) -> Bytes {
    let len = kind.token().len() + 1 + fields.iter().map(|f| f.len() + 1).sum::<usize>();
    let mut buf = BytesMut::with_capacity(len);
    buf.put_slice(kind.token().as_bytes());
    buf.put_u8(b'\n');
    for field in fields {
        if field.contains(LINE_BREAKS) {
            buf.put_slice(field.replace(LINE_BREAKS, " ").as_bytes());
        } else {
            buf.put_slice(field.as_bytes());
        }
        buf.put_u8(b'\n');
    }
    buf.freeze()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_agent_frames() {
        assert_eq!(
            decode_frame(b"AUTHORIZE\nn1\n").unwrap(),
            Inbound::Authorize { id: "n1".into() }
        );
        assert_eq!(
            decode_frame(b"METRICS\nn1\ncpu=10\n").unwrap(),
            Inbound::Metrics {
                id: "n1".into(),
                payload: "cpu=10".into()
            }
        );
        assert_eq!(
            decode_frame(b"HEARTBEAT\r\nn1\r\n").unwrap(),
            Inbound::Heartbeat { id: "n1".into() }
        );
        assert_eq!(decode_frame(b"CLOSE\n").unwrap(), Inbound::Close);
    }

    #[test]
    fn missing_payload_line_is_truncated() {
        let err = decode_frame(b"METRICS\nn1\n").unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                kind: METRICS,
                missing: 1
            }
        ));
    }

    #[test]
    fn missing_id_line_is_truncated() {
        assert!(matches!(
            decode_frame(b"AUTHORIZE\n").unwrap_err(),
            FrameError::Truncated { missing: 1, .. }
        ));
    }

    #[test]
    fn empty_payload_is_allowed_but_empty_id_is_not() {
        assert_eq!(
            decode_frame(b"METRICS\nn1\n\n").unwrap(),
            Inbound::Metrics {
                id: "n1".into(),
                payload: String::new()
            }
        );
        assert!(matches!(
            decode_frame(b"HEARTBEAT\n \n").unwrap_err(),
            FrameError::EmptyField { kind: HEARTBEAT }
        ));
    }

    #[test]
    fn unknown_and_misdirected_tokens_fail() {
        assert!(matches!(
            decode_frame(b"HELLO\n").unwrap_err(),
            FrameError::UnknownType(t) if t == "HELLO"
        ));
        assert!(matches!(
            decode_frame(b"AUTHORIZE_OK\n").unwrap_err(),
            FrameError::Unexpected(AUTHORIZE_OK)
        ));
        assert!(matches!(decode_frame(b"\n").unwrap_err(), FrameError::Empty));
        assert!(matches!(decode_frame(b"").unwrap_err(), FrameError::Empty));
        assert!(matches!(
            decode_frame(&[0xff, b'\n']).unwrap_err(),
            FrameError::InvalidUtf8
        ));
    }

    #[test]
    fn server_replies_encode_to_fixed_tokens() {
        assert_eq!(&Outbound::AuthorizePrompt.encode()[..], b"AUTHORIZE\n");
        assert_eq!(&Outbound::AuthorizeOk.encode()[..], b"AUTHORIZE_OK\n");
        assert_eq!(
            &Outbound::AuthorizeDenied(DenyReason::Disabled).encode()[..],
            b"AUTHORIZE_DISABLED\n"
        );
        assert_eq!(&Outbound::pong().encode()[..], b"HEARTBEAT\npong\n");
    }

    #[test]
    fn replies_decode_on_the_agent_side() {
        assert_eq!(decode_reply(b"AUTHORIZE\n").unwrap(), Outbound::AuthorizePrompt);
        assert_eq!(
            decode_reply(b"AUTHORIZE_ALREADY_BOUND\n").unwrap(),
            Outbound::AuthorizeDenied(DenyReason::AlreadyBound)
        );
        assert_eq!(decode_reply(b"HEARTBEAT\npong\n").unwrap(), Outbound::pong());
        assert!(matches!(
            decode_reply(b"METRICS\n").unwrap_err(),
            FrameError::Unexpected(METRICS)
        ));
    }

    #[test]
    fn payload_line_breaks_are_flattened() {
        let frame = Inbound::Metrics {
            id: "n1".into(),
            payload: "a\nb\r\nc".into(),
        }
        .encode();
        assert_eq!(&frame[..], b"METRICS\nn1\na b  c\n");
        assert!(decode_frame(&frame).is_ok());
    }
}
