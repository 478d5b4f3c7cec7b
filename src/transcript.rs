//! Conversation read model.
//!
//! A `Transcript` is a [`SessionObserver`] that folds stream callbacks into
//! the list of finished messages plus the response being streamed, which is
//! all a chat view needs to render. Ids are assigned from one counter shared
//! by user and assistant messages.

use std::sync::Mutex;

use crate::lock;
use crate::session::SessionObserver;

/// Shown in place of the response while the request waits for the model.
pub const QUEUED_PLACEHOLDER: &str = "queue...";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: u64,
    pub role: Role,
    pub text: String,
}

/// Point-in-time copy of the transcript.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TranscriptView {
    pub messages: Vec<ChatMessage>,
    /// Response in progress, or the queued placeholder.
    pub current: String,
    pub queued: bool,
    pub streaming: bool,
    pub input_enabled: bool,
}

#[derive(Default)]
pub struct Transcript {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    view: TranscriptView,
    next_id: u64,
}

impl Inner {
    fn append(&mut self, role: Role, text: &str) -> u64 {
        self.next_id += 1;
        self.view.messages.push(ChatMessage { id: self.next_id, role, text: text.to_owned() });
        self.next_id
    }

    fn settle(&mut self) {
        self.view.current.clear();
        self.view.queued = false;
        self.view.streaming = false;
    }
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a prompt the user sent. Returns its id.
    pub fn push_user(&self, text: &str) -> u64 {
        lock(&self.inner).append(Role::User, text)
    }

    pub fn set_connected(&self, connected: bool) {
        lock(&self.inner).view.input_enabled = connected;
    }

    /// Drop the in-progress response, as after a local cancel.
    pub fn discard_current(&self) {
        lock(&self.inner).settle();
    }

    #[must_use]
    pub fn snapshot(&self) -> TranscriptView {
        lock(&self.inner).view.clone()
    }
}

impl SessionObserver for Transcript {
    fn on_queued(&self) {
        let mut inner = lock(&self.inner);
        inner.view.current = QUEUED_PLACEHOLDER.to_owned();
        inner.view.queued = true;
    }

    fn on_started(&self) {
        let mut inner = lock(&self.inner);
        inner.view.current.clear();
        inner.view.queued = false;
        inner.view.streaming = true;
    }

    fn on_token(&self, fragment: &str) {
        lock(&self.inner).view.current.push_str(fragment);
    }

    fn on_ended(&self, final_text: &str) {
        let mut inner = lock(&self.inner);
        if !final_text.is_empty() {
            inner.append(Role::Assistant, final_text);
        }
        inner.settle();
    }

    /// Recorded without touching the response in progress.
    fn on_error(&self, message: &str) {
        lock(&self.inner).append(Role::Error, message);
    }

    fn on_aborted(&self, reason: &str) {
        let mut inner = lock(&self.inner);
        inner.append(Role::Error, reason);
        inner.settle();
    }
}

#[cfg(test)]
#[path = "transcript_test.rs"]
mod tests;
