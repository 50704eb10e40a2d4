//! Streamed project chat.
//!
//! The chat endpoint answers with a live, chunked body: one completion
//! event per line, each optionally carrying a text fragment and a nullable
//! finish reason. Chunk boundaries do not align with line boundaries, so
//! [`ChatDecoder`] keeps a carry-over buffer and grows the assistant
//! message incrementally; [`ChatStream`] adapts that to a cancellable
//! `futures::Stream` of snapshots over the HTTP response.

use crate::config::ClientConfig;
use crate::logging;
use anyhow::{Context, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use tokio_util::sync::CancellationToken;

/// Trailing literal the assistant appends when it changed board data and
/// the client should refetch.
pub const REFETCH_MARKER: &str = "@refetch";

/// One conversation entry in a chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Vec<ChatContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: &str) -> Self {
        Self::text("user", text)
    }

    pub fn assistant(text: &str) -> Self {
        Self::text("assistant", text)
    }

    fn text(role: &str, text: &str) -> Self {
        Self {
            role: role.to_string(),
            content: vec![ChatContent {
                kind: "text".to_string(),
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChunkEvent {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Hook fired when the assistant signals that board data changed.
pub type RefetchHook = Box<dyn FnMut() + Send>;

/// Incremental decoder for the streamed chat body.
///
/// Feed it raw text chunks as they arrive; it reassembles lines across
/// chunk boundaries, accumulates the message text, and reports a new
/// snapshot whenever the visible text changed. The wire has two framings
/// in the field (raw newline-delimited JSON, and SSE `data: ` lines) and
/// the decoder accepts both.
pub struct ChatDecoder {
    carry: String,
    text: String,
    finished: bool,
    on_refetch: Option<RefetchHook>,
}

impl ChatDecoder {
    pub fn new() -> Self {
        Self {
            carry: String::new(),
            text: String::new(),
            finished: false,
            on_refetch: None,
        }
    }

    /// Register a hook fired once per occurrence of the refetch marker.
    pub fn with_refetch(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_refetch = Some(Box::new(hook));
        self
    }

    /// Consume one chunk. Returns the new accumulated snapshot when the
    /// visible text changed, `None` otherwise. After a terminal event the
    /// decoder ignores all further input.
    pub fn feed(&mut self, chunk: &str) -> Option<String> {
        if self.finished {
            return None;
        }

        let before_len = self.text.len();
        self.carry.push_str(chunk);

        // complete lines leave the carry buffer; a trailing partial stays
        while let Some(pos) = self.carry.find('\n') {
            let line: String = self.carry.drain(..=pos).collect();
            if self.process_line(line.trim_end_matches(['\n', '\r']).trim()) {
                self.finished = true;
                break;
            }
        }

        let marker_fired = self.strip_marker();
        if self.text.len() != before_len || marker_fired {
            Some(self.text.clone())
        } else {
            None
        }
    }

    /// Returns true when the line is a terminal event.
    fn process_line(&mut self, line: &str) -> bool {
        if line.is_empty() {
            return false;
        }
        let data = line.strip_prefix("data: ").unwrap_or(line);
        if data == "[DONE]" {
            return true;
        }
        match serde_json::from_str::<ChunkEvent>(data) {
            Ok(event) => {
                for choice in &event.choices {
                    if let Some(content) = &choice.delta.content {
                        self.text.push_str(content);
                    }
                    if choice
                        .finish_reason
                        .as_deref()
                        .is_some_and(|r| !r.is_empty())
                    {
                        return true;
                    }
                }
                false
            }
            Err(err) => {
                // one bad line must not kill the rest of the stream
                logging::debug(&format!("skipping malformed chat line: {}", err));
                false
            }
        }
    }

    /// The marker check runs against the reassembled accumulator, so a
    /// marker split across chunk boundaries is still caught. The literal
    /// is truncated from the accumulator itself; a later occurrence fires
    /// the hook again.
    fn strip_marker(&mut self) -> bool {
        if !self.text.ends_with(REFETCH_MARKER) {
            return false;
        }
        self.text.truncate(self.text.len() - REFETCH_MARKER.len());
        if let Some(hook) = self.on_refetch.as_mut() {
            hook();
        }
        true
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Message text reconstructed so far, marker stripped.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

impl Default for ChatDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Growing snapshots of one streamed assistant reply.
///
/// Ends on stream close, on a terminal event, or when the cancellation
/// token fires; cancelling drops the connection and yields nothing more.
pub struct ChatStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>,
    decoder: ChatDecoder,
    cancelled: Pin<Box<dyn Future<Output = ()> + Send>>,
    done: bool,
}

impl ChatStream {
    pub fn new(
        inner: impl Stream<Item = Result<Bytes>> + Send + 'static,
        decoder: ChatDecoder,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Box::pin(inner),
            decoder,
            cancelled: Box::pin(cancel.cancelled_owned()),
            done: false,
        }
    }

    /// Text accumulated so far; what the caller should leave on screen if
    /// the transport dies mid-reply.
    pub fn text(&self) -> &str {
        self.decoder.text()
    }
}

impl Stream for ChatStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        if self.cancelled.as_mut().poll(cx).is_ready() {
            self.done = true;
            return Poll::Ready(None);
        }
        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let chunk = String::from_utf8_lossy(&bytes).into_owned();
                    match self.decoder.feed(&chunk) {
                        Some(snapshot) => {
                            if self.decoder.is_finished() {
                                self.done = true;
                            }
                            return Poll::Ready(Some(Ok(snapshot)));
                        }
                        None => {
                            if self.decoder.is_finished() {
                                self.done = true;
                                return Poll::Ready(None);
                            }
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(Err(e.context("chat stream failed"))));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => {
                    return Poll::Pending;
                }
            }
        }
    }
}

/// Client for the chat surface.
///
/// Kept apart from [`crate::api::HttpTaskApi`] because streaming requests
/// must not carry the whole-request timeout the task client uses.
pub struct ChatClient {
    client: Client,
    config: ClientConfig,
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .context("build chat http client")?;
        Ok(Self { client, config })
    }

    /// Open one streamed chat turn. A non-success initial response is a
    /// transport error surfaced here, before any decoding starts.
    pub async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        cancel: CancellationToken,
        on_refetch: Option<RefetchHook>,
    ) -> Result<ChatStream> {
        let url = format!("{}/chat", self.config.chat_base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("Accept", "text/event-stream")
            .json(&ChatRequest { messages })
            .send()
            .await
            .context("send chat request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("chat endpoint returned {}: {}", status, body);
        }

        let mut decoder = ChatDecoder::new();
        if let Some(hook) = on_refetch {
            decoder.on_refetch = Some(hook);
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(anyhow::Error::from));
        Ok(ChatStream::new(bytes, decoder, cancel))
    }
}
