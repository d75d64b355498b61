//! Chat view-model: transcript state plus the consumer that streams one
//! assistant reply into it.
//!
//! DESIGN
//! ======
//! `ChatSession` is the pure part. It owns the transcript and walks each
//! submission through `Idle -> AwaitingFirstByte -> Streaming -> Settled`.
//! Every mutation after `begin` carries the submission generation, so a
//! late chunk from an earlier submission cannot touch the transcript.
//!
//! `ChatConsumer` opens the stream through a `ChatTransport`, decodes it
//! with `StreamDecoder`, and reports progress to a `ChatView`.
//!
//! ERROR HANDLING
//! ==============
//! Transport errors, non-success statuses and idle timeouts all end the
//! submission the same way: the open assistant message (or a new one) gets
//! the fixed error placeholder. Nothing is retried.

#[cfg(test)]
#[path = "chat_test.rs"]
mod chat_test;

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::net::api::{ChatStream, ChatTransport};
use crate::net::error::ApiError;
use crate::net::sse::{StreamDecoder, StreamEvent};
use crate::net::types::{ChatMessage, ChatRequest, Role};

/// Assistant content shown when a reply fails.
pub const ERROR_PLACEHOLDER: &str = "[エラーが発生しました]";

/// Pause between settling and asking the view to scroll.
pub const SCROLL_SETTLE_DELAY: Duration = Duration::from_millis(100);

// =============================================================================
// SESSION
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChatPhase {
    #[default]
    Idle,
    AwaitingFirstByte,
    Streaming,
    Settled(Outcome),
}

impl ChatPhase {
    #[must_use]
    pub fn in_flight(self) -> bool {
        matches!(self, Self::AwaitingFirstByte | Self::Streaming)
    }
}

/// A submission accepted by [`ChatSession::begin`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub generation: u64,
    pub request: ChatRequest,
}

/// In-memory transcript for one chat panel.
#[derive(Clone, Debug, Default)]
pub struct ChatSession {
    messages: Vec<ChatMessage>,
    phase: ChatPhase,
    generation: u64,
    reply: String,
}

impl ChatSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn phase(&self) -> ChatPhase {
        self.phase
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reply text accumulated for the current submission.
    #[must_use]
    pub fn reply(&self) -> &str {
        &self.reply
    }

    /// `true` until the first chunk of the current submission arrives.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.phase == ChatPhase::AwaitingFirstByte
    }

    /// Start a submission. Returns `None` for a blank question or while a
    /// previous submission is still in flight; the transcript is unchanged
    /// in both cases.
    pub fn begin(&mut self, question: &str) -> Option<Submission> {
        if question.trim().is_empty() || self.phase.in_flight() {
            return None;
        }
        self.generation = self.generation.wrapping_add(1);
        self.phase = ChatPhase::AwaitingFirstByte;
        self.reply.clear();
        self.messages.push(ChatMessage::user(question));
        Some(Submission {
            generation: self.generation,
            request: ChatRequest { question: question.to_owned(), messages: self.messages.clone() },
        })
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.generation && self.phase.in_flight()
    }

    /// Append a text fragment to the open assistant message. Returns
    /// `false` when the fragment was dropped.
    pub fn apply_chunk(&mut self, generation: u64, text: &str) -> bool {
        if !self.is_current(generation) || text.is_empty() {
            return false;
        }
        self.reply.push_str(text);
        match open_reply(&mut self.messages, self.phase) {
            Some(open) => open.content.clone_from(&self.reply),
            None => self.messages.push(ChatMessage::assistant(self.reply.clone())),
        }
        self.phase = ChatPhase::Streaming;
        true
    }

    /// Settle the submission as failed, writing the placeholder into the
    /// open assistant message or a new one.
    pub fn fail(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        match open_reply(&mut self.messages, self.phase) {
            Some(open) => ERROR_PLACEHOLDER.clone_into(&mut open.content),
            None => self.messages.push(ChatMessage::assistant(ERROR_PLACEHOLDER)),
        }
        self.phase = ChatPhase::Settled(Outcome::Error);
        true
    }

    /// Settle the submission as successful.
    pub fn settle(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.phase = ChatPhase::Settled(Outcome::Success);
        true
    }
}

/// The assistant message currently receiving chunks, if any.
fn open_reply(messages: &mut [ChatMessage], phase: ChatPhase) -> Option<&mut ChatMessage> {
    if phase != ChatPhase::Streaming {
        return None;
    }
    messages.last_mut().filter(|m| m.role == Role::Assistant)
}

// =============================================================================
// VIEW
// =============================================================================

/// Observer for the rendering side of a submission.
pub trait ChatView: Send {
    /// Waiting-for-first-byte indicator.
    fn pending_changed(&mut self, _pending: bool) {}

    /// `content` is the full reply so far; `delta` is what just arrived.
    fn assistant_updated(&mut self, _content: &str, _delta: &str) {}

    fn reply_failed(&mut self, _placeholder: &str) {}

    fn scroll_to_latest(&mut self) {}
}

/// View that ignores every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullView;

impl ChatView for NullView {}

// =============================================================================
// CONSUMER
// =============================================================================

pub struct ChatConsumer {
    transport: Arc<dyn ChatTransport>,
    session: ChatSession,
    idle_timeout: Duration,
    scroll_delay: Duration,
}

impl ChatConsumer {
    /// `idle_timeout` bounds the wait for the response head and for each
    /// chunk after it.
    #[must_use]
    pub fn new(transport: Arc<dyn ChatTransport>, idle_timeout: Duration) -> Self {
        Self { transport, session: ChatSession::new(), idle_timeout, scroll_delay: SCROLL_SETTLE_DELAY }
    }

    #[must_use]
    pub fn with_scroll_delay(mut self, delay: Duration) -> Self {
        self.scroll_delay = delay;
        self
    }

    #[must_use]
    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    /// Submit a question and stream the reply into the transcript.
    ///
    /// Returns `None` when the submission was rejected without a request.
    pub async fn submit(&mut self, question: &str, view: &mut dyn ChatView) -> Option<Outcome> {
        let Submission { generation, request } = self.session.begin(question)?;
        info!(generation, history = request.messages.len(), "chat submission started");
        view.pending_changed(true);

        let outcome = match self.stream(generation, &request, view).await {
            Ok(()) => {
                self.session.settle(generation);
                Outcome::Success
            }
            Err(error) => {
                warn!(generation, %error, code = error.error_code(), retryable = error.retryable(), "chat reply failed");
                self.session.fail(generation);
                view.reply_failed(ERROR_PLACEHOLDER);
                Outcome::Error
            }
        };

        view.pending_changed(false);
        tokio::time::sleep(self.scroll_delay).await;
        view.scroll_to_latest();
        Some(outcome)
    }

    async fn stream(&mut self, generation: u64, request: &ChatRequest, view: &mut dyn ChatView) -> Result<(), ApiError> {
        let ChatStream { format, mut body } = tokio::time::timeout(self.idle_timeout, self.transport.open_chat(request))
            .await
            .map_err(|_| ApiError::Timeout)??;
        let mut decoder = StreamDecoder::new(format);

        loop {
            let next = tokio::time::timeout(self.idle_timeout, body.next())
                .await
                .map_err(|_| ApiError::Timeout)?;
            let Some(chunk) = next else { break };
            let events = decoder.push(&chunk?)?;
            if self.deliver(generation, events, view).is_break() {
                debug!(generation, "chat stream reached done sentinel");
                return Ok(());
            }
        }
        let _ = self.deliver(generation, decoder.finish(), view);
        Ok(())
    }

    fn deliver(&mut self, generation: u64, events: Vec<StreamEvent>, view: &mut dyn ChatView) -> ControlFlow<()> {
        for event in events {
            match event {
                StreamEvent::Text(text) => {
                    let first = self.session.is_pending();
                    if self.session.apply_chunk(generation, &text) {
                        if first {
                            view.pending_changed(false);
                        }
                        view.assistant_updated(self.session.reply(), &text);
                    }
                }
                StreamEvent::Done => return ControlFlow::Break(()),
            }
        }
        ControlFlow::Continue(())
    }
}
