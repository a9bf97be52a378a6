//! Core protocol types: identities, messages, and the RPC frames.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::StatusCode;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A user's identity: a phone-number-shaped string such as `"111-111"`.
///
/// Opaque to every layer except registration, which checks its shape once.
/// Serialized as a plain JSON string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Wraps a raw identifier. No validation happens here.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the empty identifier.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PhoneNumber {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for PhoneNumber {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A persisted direct message.
///
/// `id` is assigned by the store when the message is appended and
/// increases with commit order. `timestamp` is taken when the send is
/// accepted, so concurrent sends may commit out of timestamp order. A
/// `Message` is never edited or deleted after that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub sender: PhoneNumber,
    pub receiver: PhoneNumber,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Requests (client → server)
// ---------------------------------------------------------------------------

/// An operation requested by a client.
///
/// Internally tagged, so a login looks like
/// `{"type":"Login","phone":"111-111","password":"..."}`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Create an account and receive a token.
    Register {
        username: String,
        phone: PhoneNumber,
        password: String,
    },

    /// Exchange credentials for a token.
    Login { phone: PhoneNumber, password: String },

    /// Persist a message and deliver it to a live subscriber if one exists.
    SendDirectMessage {
        token: String,
        sender: PhoneNumber,
        receiver: PhoneNumber,
        content: String,
    },

    /// Fetch the conversation between two users since a point in time.
    GetDms {
        token: String,
        user_a: PhoneNumber,
        user_b: PhoneNumber,
        #[serde(default)]
        since: Option<DateTime<Utc>>,
    },

    /// Backfill the conversation since `since`, then stream new messages
    /// until the client unsubscribes or disconnects.
    Subscribe {
        token: String,
        user_a: PhoneNumber,
        user_b: PhoneNumber,
        #[serde(default)]
        since: Option<DateTime<Utc>>,
    },

    /// End the connection's live stream.
    Unsubscribe,

    /// Look up another user's display name.
    GetUserInfo { token: String, phone: PhoneNumber },
}

impl Request {
    /// Short name of the operation, for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Login { .. } => "login",
            Self::SendDirectMessage { .. } => "send_direct_message",
            Self::GetDms { .. } => "get_dms",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::GetUserInfo { .. } => "get_user_info",
        }
    }
}

// Passwords and tokens must never end up in a log line.
impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const REDACTED: &str = "<redacted>";
        match self {
            Self::Register { username, phone, .. } => f
                .debug_struct("Register")
                .field("username", username)
                .field("phone", phone)
                .field("password", &REDACTED)
                .finish(),
            Self::Login { phone, .. } => f
                .debug_struct("Login")
                .field("phone", phone)
                .field("password", &REDACTED)
                .finish(),
            Self::SendDirectMessage {
                sender,
                receiver,
                content,
                ..
            } => f
                .debug_struct("SendDirectMessage")
                .field("token", &REDACTED)
                .field("sender", sender)
                .field("receiver", receiver)
                .field("content", content)
                .finish(),
            Self::GetDms {
                user_a,
                user_b,
                since,
                ..
            } => f
                .debug_struct("GetDms")
                .field("token", &REDACTED)
                .field("user_a", user_a)
                .field("user_b", user_b)
                .field("since", since)
                .finish(),
            Self::Subscribe {
                user_a,
                user_b,
                since,
                ..
            } => f
                .debug_struct("Subscribe")
                .field("token", &REDACTED)
                .field("user_a", user_a)
                .field("user_b", user_b)
                .field("since", since)
                .finish(),
            Self::Unsubscribe => f.write_str("Unsubscribe"),
            Self::GetUserInfo { phone, .. } => f
                .debug_struct("GetUserInfo")
                .field("token", &REDACTED)
                .field("phone", phone)
                .finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// Responses and stream events (server → client)
// ---------------------------------------------------------------------------

/// The reply to exactly one [`Request`], carrying the request's `seq`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Registered { token: String },
    LoggedIn { token: String },
    /// The message was committed. Says nothing about live delivery.
    Sent { id: i64, timestamp: DateTime<Utc> },
    Dms { messages: Vec<Message> },
    /// The stream is open; backfill and live messages follow as
    /// [`StreamEvent`]s.
    Subscribed,
    Unsubscribed,
    UserInfo { username: String, phone: PhoneNumber },
    Error { code: StatusCode, message: String },
}

/// Why a live stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// The client sent `Unsubscribe`.
    Unsubscribed,
    /// The registry closed the channel, e.g. a newer subscriber for the
    /// same conversation replaced this one.
    ChannelClosed,
    /// The server is shutting down.
    Shutdown,
}

/// Unsolicited frames pushed on a subscribed connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    Message { message: Message },
    StreamEnd { reason: EndReason },
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// What an envelope carries.
///
/// Adjacently tagged:
/// `{"type":"Request","data":{"type":"Login",...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    Request(Request),
    Response(Response),
    Event(StreamEvent),
}

/// The top-level frame. Every message on the wire is an `Envelope`.
///
/// Clients number their requests; the server echoes that number in the
/// matching response. Stream events use the `seq` of the `Subscribe`
/// request that opened the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub seq: u64,
    pub payload: Payload,
}
