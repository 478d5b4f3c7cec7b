//! Wire envelope and JSON codec for the completions channel.
//!
//! Every message on the socket is a small JSON object:
//! `{"message_type": <int>, "content": <string>?}`. The integer codes are
//! assigned per direction and overlap between them (`1` is both `Ping` and
//! `Pong`), so decoding always takes the [`Direction`] the text travelled in.
//! Outbound and inbound codes live in separate enumerations and are never
//! cross-validated.

use serde::{Deserialize, Serialize};

/// Error returned by [`decode`] and [`Envelope::new`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text is not a JSON envelope.
    #[error("failed to decode envelope: {0}")]
    Json(#[from] serde_json::Error),
    /// The `message_type` integer is not defined for this direction.
    #[error("unknown {direction} message type: {code}")]
    UnknownType { direction: Direction, code: i32 },
    /// A content-bearing kind arrived without `content`.
    #[error("{0:?} requires content")]
    MissingContent(MessageKind),
    /// A control kind arrived with `content`.
    #[error("{0:?} must not carry content")]
    UnexpectedContent(MessageKind),
}

/// Which way an envelope travels. Codes are only unique within a direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to server.
    Outbound,
    /// Server to client.
    Inbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Outbound => f.write_str("outbound"),
            Self::Inbound => f.write_str("inbound"),
        }
    }
}

/// Every message kind of the protocol, across both directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Keepalive probe sent by the client.
    Ping,
    /// Keepalive answer sent by the server.
    Pong,
    /// Prompt submission; `content` is the user text.
    CompletionRequest,
    /// Ask the server to abandon the running completion.
    Cancel,
    /// The request is waiting for a free model.
    StreamQueued,
    /// The model started producing tokens.
    StreamStarted,
    /// One incremental fragment of the response.
    StreamToken,
    /// The response is complete.
    StreamEnded,
    /// The server rejected a request; `content` is the reason.
    StreamError,
}

impl MessageKind {
    /// All kinds, outbound first.
    pub const ALL: [Self; 9] = [
        Self::Ping,
        Self::CompletionRequest,
        Self::Cancel,
        Self::Pong,
        Self::StreamStarted,
        Self::StreamToken,
        Self::StreamEnded,
        Self::StreamQueued,
        Self::StreamError,
    ];

    /// Direction this kind travels in.
    #[must_use]
    pub fn direction(self) -> Direction {
        match self {
            Self::Ping | Self::CompletionRequest | Self::Cancel => Direction::Outbound,
            Self::Pong
            | Self::StreamQueued
            | Self::StreamStarted
            | Self::StreamToken
            | Self::StreamEnded
            | Self::StreamError => Direction::Inbound,
        }
    }

    /// Whether envelopes of this kind must carry `content`.
    #[must_use]
    pub fn carries_content(self) -> bool {
        matches!(self, Self::CompletionRequest | Self::StreamToken | Self::StreamError)
    }

    /// Keepalive kinds are consumed by the transport layer and never dispatched.
    #[must_use]
    pub fn is_keepalive(self) -> bool {
        matches!(self, Self::Ping | Self::Pong)
    }

    /// Wire integer for this kind within its direction.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Ping => OutboundCode::Ping as i32,
            Self::CompletionRequest => OutboundCode::CompletionRequest as i32,
            Self::Cancel => OutboundCode::Cancel as i32,
            Self::Pong => InboundCode::Pong as i32,
            Self::StreamStarted => InboundCode::StreamStarted as i32,
            Self::StreamToken => InboundCode::StreamToken as i32,
            Self::StreamEnded => InboundCode::StreamEnded as i32,
            Self::StreamQueued => InboundCode::StreamQueued as i32,
            Self::StreamError => InboundCode::StreamError as i32,
        }
    }

    /// Resolve a wire integer within `direction`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownType`] when `code` is not defined for `direction`.
    pub fn from_code(direction: Direction, code: i32) -> Result<Self, CodecError> {
        let kind = match direction {
            Direction::Outbound => OutboundCode::from_i32(code).map(OutboundCode::kind),
            Direction::Inbound => InboundCode::from_i32(code).map(InboundCode::kind),
        };
        kind.ok_or(CodecError::UnknownType { direction, code })
    }
}

/// One protocol message. Content is present exactly when the kind carries it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    kind: MessageKind,
    content: Option<String>,
}

impl Envelope {
    /// Build an envelope, enforcing the content-presence invariant.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MissingContent`] or [`CodecError::UnexpectedContent`]
    /// when `content` does not match `kind`.
    pub fn new(kind: MessageKind, content: Option<String>) -> Result<Self, CodecError> {
        match (kind.carries_content(), content.is_some()) {
            (true, false) => Err(CodecError::MissingContent(kind)),
            (false, true) => Err(CodecError::UnexpectedContent(kind)),
            _ => Ok(Self { kind, content }),
        }
    }

    fn control(kind: MessageKind) -> Self {
        Self { kind, content: None }
    }

    fn with_content(kind: MessageKind, content: impl Into<String>) -> Self {
        Self { kind, content: Some(content.into()) }
    }

    #[must_use]
    pub fn ping() -> Self {
        Self::control(MessageKind::Ping)
    }

    #[must_use]
    pub fn pong() -> Self {
        Self::control(MessageKind::Pong)
    }

    #[must_use]
    pub fn completion_request(prompt: impl Into<String>) -> Self {
        Self::with_content(MessageKind::CompletionRequest, prompt)
    }

    #[must_use]
    pub fn cancel() -> Self {
        Self::control(MessageKind::Cancel)
    }

    #[must_use]
    pub fn stream_queued() -> Self {
        Self::control(MessageKind::StreamQueued)
    }

    #[must_use]
    pub fn stream_started() -> Self {
        Self::control(MessageKind::StreamStarted)
    }

    #[must_use]
    pub fn stream_token(fragment: impl Into<String>) -> Self {
        Self::with_content(MessageKind::StreamToken, fragment)
    }

    #[must_use]
    pub fn stream_ended() -> Self {
        Self::control(MessageKind::StreamEnded)
    }

    #[must_use]
    pub fn stream_error(reason: impl Into<String>) -> Self {
        Self::with_content(MessageKind::StreamError, reason)
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Consume the envelope and return its content, if any.
    #[must_use]
    pub fn into_content(self) -> Option<String> {
        self.content
    }
}

/// Encode an envelope as its JSON wire text.
#[must_use]
pub fn encode(envelope: &Envelope) -> String {
    let wire = WireEnvelope {
        message_type: envelope.kind.code(),
        content: envelope.content.clone(),
    };
    // Serializing an integer and an optional string cannot fail.
    serde_json::to_string(&wire).unwrap_or_default()
}

/// Decode JSON wire text that travelled in `direction`.
///
/// # Errors
///
/// Returns [`CodecError::Json`] for malformed text, [`CodecError::UnknownType`]
/// for codes outside `direction`, and the content errors of [`Envelope::new`].
/// A `StreamToken` without `content` is an empty fragment, not an error.
pub fn decode(direction: Direction, text: &str) -> Result<Envelope, CodecError> {
    let wire: WireEnvelope = serde_json::from_str(text)?;
    let kind = MessageKind::from_code(direction, wire.message_type)?;
    let content = match (kind, wire.content) {
        // The server drops empty strings, so an empty fragment arrives bare.
        (MessageKind::StreamToken, None) => Some(String::new()),
        (_, content) => content,
    };
    Envelope::new(kind, content)
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    message_type: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
enum OutboundCode {
    Ping = 1,
    CompletionRequest = 2,
    Cancel = 3,
}

impl OutboundCode {
    fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Ping),
            2 => Some(Self::CompletionRequest),
            3 => Some(Self::Cancel),
            _ => None,
        }
    }

    fn kind(self) -> MessageKind {
        match self {
            Self::Ping => MessageKind::Ping,
            Self::CompletionRequest => MessageKind::CompletionRequest,
            Self::Cancel => MessageKind::Cancel,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
enum InboundCode {
    Pong = 1,
    StreamStarted = 2,
    StreamToken = 3,
    StreamEnded = 4,
    StreamQueued = 5,
    StreamError = 6,
}

impl InboundCode {
    fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Pong),
            2 => Some(Self::StreamStarted),
            3 => Some(Self::StreamToken),
            4 => Some(Self::StreamEnded),
            5 => Some(Self::StreamQueued),
            6 => Some(Self::StreamError),
            _ => None,
        }
    }

    fn kind(self) -> MessageKind {
        match self {
            Self::Pong => MessageKind::Pong,
            Self::StreamStarted => MessageKind::StreamStarted,
            Self::StreamToken => MessageKind::StreamToken,
            Self::StreamEnded => MessageKind::StreamEnded,
            Self::StreamQueued => MessageKind::StreamQueued,
            Self::StreamError => MessageKind::StreamError,
        }
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
