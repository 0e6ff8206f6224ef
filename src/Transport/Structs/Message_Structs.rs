// This is the fixed-size record exchanged through every mailbox

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut};

use crate::error::{RelayError, Result};
use crate::Transport::MailboxId;

/// Width of the username field, NUL terminator included.
pub const MAX_USERNAME: usize = 32;

/// Width of the body field, NUL terminator included.
pub const MSG_SIZE: usize = 256;

/// Encoded size of one record:
/// `kind: u32 | username: [u8; 32] | body: [u8; 256] | sent_at: i64`, little-endian.
pub const WIRE_SIZE: usize = 4 + MAX_USERNAME + MSG_SIZE + 8;

/// Sender name used for everything the relay itself emits.
pub const SERVER_NAME: &str = "SERVER";

/// Prefix of an Ack body that refuses a Connect.
pub const REJECT_PREFIX: &str = "ERROR ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Connect,
    Disconnect,
    Chat,
    Ack,
    /// Sentinel used only to unblock a parked receiver.
    Wake,
    /// Anything else seen on the wire.
    Other(u32),
}

impl MessageKind {
    pub const fn as_raw(self) -> u32 {
        match self {
            MessageKind::Connect => 1,
            MessageKind::Disconnect => 2,
            MessageKind::Chat => 3,
            MessageKind::Ack => 4,
            MessageKind::Wake => 5,
            MessageKind::Other(raw) => raw,
        }
    }

    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => MessageKind::Connect,
            2 => MessageKind::Disconnect,
            3 => MessageKind::Chat,
            4 => MessageKind::Ack,
            5 => MessageKind::Wake,
            other => MessageKind::Other(other),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Connect => f.write_str("connect"),
            MessageKind::Disconnect => f.write_str("disconnect"),
            MessageKind::Chat => f.write_str("chat"),
            MessageKind::Ack => f.write_str("ack"),
            MessageKind::Wake => f.write_str("wake"),
            MessageKind::Other(raw) => write!(f, "unknown({})", raw),
        }
    }
}

/// A decoded record. Strings are already clamped to their wire widths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub sender: String,
    pub body: String,
    /// Unix seconds, 0 when the sender did not stamp it.
    pub sent_at: i64,
}

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a
/// character or crossing an embedded NUL.
fn clamp(s: &str, max: usize) -> &str {
    let s = s.split('\0').next().unwrap_or_default();
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn put_fixed(dst: &mut impl BufMut, s: &str, width: usize) {
    let bytes = clamp(s, width - 1).as_bytes();
    dst.put_slice(bytes);
    dst.put_bytes(0, width - bytes.len());
}

fn get_fixed(src: &mut impl Buf, width: usize) -> String {
    let mut raw = vec![0u8; width];
    src.copy_to_slice(&mut raw);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(width);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

impl Message {
    pub fn new(kind: MessageKind, sender: &str, body: &str) -> Self {
        Self {
            kind,
            sender: clamp(sender, MAX_USERNAME - 1).to_owned(),
            body: clamp(body, MSG_SIZE - 1).to_owned(),
            sent_at: unix_now(),
        }
    }

    pub fn with_timestamp(mut self, sent_at: i64) -> Self {
        self.sent_at = sent_at;
        self
    }

    pub fn chat(sender: &str, body: &str) -> Self {
        Self::new(MessageKind::Chat, sender, body)
    }

    pub fn connect(username: &str, payload: ConnectPayload) -> Self {
        Self::new(MessageKind::Connect, username, &payload.to_string())
    }

    pub fn disconnect(username: &str) -> Self {
        Self::new(MessageKind::Disconnect, username, "")
    }

    /// Chat-kind line authored by the relay ("X has joined the chat.").
    pub fn announcement(body: &str) -> Self {
        Self::new(MessageKind::Chat, SERVER_NAME, body)
    }

    pub fn welcome(username: &str) -> Self {
        Self::new(
            MessageKind::Ack,
            SERVER_NAME,
            &format!("Welcome {}! You've joined the chat.", username),
        )
    }

    /// Ack refusing a Connect.
    pub fn rejection(reason: RejectReason, detail: &str) -> Self {
        Self::new(
            MessageKind::Ack,
            SERVER_NAME,
            &format!("{}{}: {}", REJECT_PREFIX, reason.code(), detail),
        )
    }

    /// Disconnect-kind notice sent to every client when the relay stops.
    pub fn farewell() -> Self {
        Self::new(MessageKind::Disconnect, SERVER_NAME, "Server is shutting down")
    }

    pub fn wake() -> Self {
        Self::new(MessageKind::Wake, "", "")
    }

    pub fn is_from_server(&self) -> bool {
        self.sender == SERVER_NAME
    }

    /// Fixed-size little-endian encoding.
    pub fn encode(&self) -> [u8; WIRE_SIZE] {
        let mut out = [0u8; WIRE_SIZE];
        let mut dst = &mut out[..];
        self.encode_into(&mut dst);
        out
    }

    pub fn encode_into(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.kind.as_raw());
        put_fixed(dst, &self.sender, MAX_USERNAME);
        put_fixed(dst, &self.body, MSG_SIZE);
        dst.put_i64_le(self.sent_at);
    }

    /// Decode one record; trailing bytes beyond [`WIRE_SIZE`] are ignored.
    pub fn decode(mut src: &[u8]) -> Result<Self> {
        if src.len() < WIRE_SIZE {
            return Err(RelayError::MalformedRequest(format!(
                "record is {} bytes, expected {}",
                src.len(),
                WIRE_SIZE
            )));
        }
        let kind = MessageKind::from_raw(src.get_u32_le());
        let sender = get_fixed(&mut src, MAX_USERNAME);
        let body = get_fixed(&mut src, MSG_SIZE);
        let sent_at = src.get_i64_le();
        Ok(Self {
            kind,
            sender,
            body,
            sent_at,
        })
    }

    /// Interpret the body of a Connect.
    pub fn connect_payload(&self) -> Result<ConnectPayload> {
        self.body.parse()
    }

    /// If this is an Ack refusing a Connect, the error it stands for.
    pub fn rejection_error(&self, username: &str) -> Option<RelayError> {
        if self.kind != MessageKind::Ack {
            return None;
        }
        let rest = self.body.strip_prefix(REJECT_PREFIX)?;
        let (code, detail) = rest.split_once(':').unwrap_or((rest, ""));
        let detail = detail.trim();
        Some(match RejectReason::from_code(code.trim()) {
            Some(RejectReason::DuplicateUsername) => RelayError::DuplicateUsername(username.to_owned()),
            Some(RejectReason::RegistryFull) => RelayError::RegistryFull {
                capacity: detail
                    .split(|c: char| !c.is_ascii_digit())
                    .find(|s| !s.is_empty())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
            },
            Some(RejectReason::MalformedRequest) => RelayError::MalformedRequest(detail.to_owned()),
            None => RelayError::Rejected(rest.to_owned()),
        })
    }
}

/// Body of a Connect: the requester's mailbox id and process id,
/// rendered as two decimal integers separated by a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPayload {
    pub mailbox: MailboxId,
    pub pid: u32,
}

impl fmt::Display for ConnectPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.mailbox.as_raw(), self.pid)
    }
}

impl std::str::FromStr for ConnectPayload {
    type Err = RelayError;

    // scanf("%d %d") semantics: leading whitespace skipped, trailing input ignored.
    fn from_str(s: &str) -> Result<Self> {
        let malformed = || RelayError::MalformedRequest(format!("bad connect payload {:?}", s));
        let mut fields = s.split_whitespace();
        let mailbox: i32 = fields.next().and_then(|f| f.parse().ok()).ok_or_else(malformed)?;
        let pid: i32 = fields.next().and_then(|f| f.parse().ok()).ok_or_else(malformed)?;
        if mailbox < 0 || pid <= 0 {
            return Err(malformed());
        }
        Ok(Self {
            mailbox: MailboxId::from_raw(mailbox),
            pid: pid as u32,
        })
    }
}

/// Why a Connect was refused, as carried in the rejection Ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    DuplicateUsername,
    RegistryFull,
    MalformedRequest,
}

impl RejectReason {
    pub fn code(self) -> &'static str {
        match self {
            RejectReason::DuplicateUsername => "duplicate-username",
            RejectReason::RegistryFull => "registry-full",
            RejectReason::MalformedRequest => "malformed-request",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "duplicate-username" => Some(RejectReason::DuplicateUsername),
            "registry-full" => Some(RejectReason::RegistryFull),
            "malformed-request" => Some(RejectReason::MalformedRequest),
            _ => None,
        }
    }

    pub fn of(err: &RelayError) -> Option<Self> {
        match err {
            RelayError::DuplicateUsername(_) => Some(RejectReason::DuplicateUsername),
            RelayError::RegistryFull { .. } => Some(RejectReason::RegistryFull),
            RelayError::MalformedRequest(_) => Some(RejectReason::MalformedRequest),
            _ => None,
        }
    }
}
