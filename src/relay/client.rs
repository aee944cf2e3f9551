//! Backend chat-completion client.
//!
//! One outbound call per inbound request: the prompt becomes a
//! single-message chat payload, and the backend's reply comes back either as
//! the full completion text or as a stream of delta-content fragments.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{header, Client};

use super::stream::{SseDecoder, DONE_PAYLOAD};
use super::types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, GenerationRequest,
};
use crate::config::BackendConfig;
use crate::error::BackendError;

/// Ordered, finite, non-restartable sequence of generated text fragments.
///
/// Ends after the backend's `[DONE]` sentinel or after yielding a single
/// `Err` item. Dropping it releases the backend connection, so a caller that
/// disconnects mid-stream stops the upstream pull as well.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, BackendError>> + Send>>;

/// Client for the OpenAI-compatible inference backend.
#[derive(Clone)]
pub struct BackendClient {
    http: Client,
    url: String,
    model: String,
}

impl BackendClient {
    /// Build a client with the configured connect and total timeouts.
    ///
    /// The total timeout bounds the whole call, streaming included, so a
    /// stalled backend cannot hold the inbound request open indefinitely.
    pub fn new(config: &BackendConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.url)
    }

    /// Run a buffered completion and return the trimmed response text.
    pub async fn complete(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        let payload = ChatCompletionRequest::from_generation(request, &self.model, false);

        let response = self
            .http
            .post(self.endpoint())
            .header(header::CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(BackendError::Connect)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Backend returned error");
            return Err(BackendError::Status { status });
        }

        let completion: ChatCompletionResponse =
            response.json().await.map_err(BackendError::Decode)?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or(BackendError::EmptyCompletion)?;

        Ok(choice.message.content.trim().to_string())
    }

    /// Start a streaming completion and return its fragment stream.
    ///
    /// Failures up to and including the backend's response status are
    /// returned as `Err` here, before the caller commits response headers;
    /// only failures after that surface inside the stream.
    pub async fn stream_completion(
        &self,
        request: &GenerationRequest,
    ) -> Result<FragmentStream, BackendError> {
        let payload = ChatCompletionRequest::from_generation(request, &self.model, true);

        let response = self
            .http
            .post(self.endpoint())
            .header(header::CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(BackendError::Connect)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Backend refused streaming request");
            return Err(BackendError::Status { status });
        }

        Ok(Box::pin(fragment_stream(Box::pin(response.bytes_stream()))))
    }
}

/// Parse one SSE data payload into its delta content, if any.
///
/// Undecodable payloads are skipped rather than fatal; role-only and empty
/// deltas yield nothing.
fn delta_content(payload: &str) -> Option<String> {
    match serde_json::from_str::<ChatCompletionChunk>(payload) {
        Ok(chunk) => chunk.content().map(str::to_string),
        Err(err) => {
            tracing::debug!(error = %err, "Skipping undecodable stream payload");
            None
        }
    }
}

struct FragmentState<S> {
    chunks: S,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

/// Turn a raw SSE byte stream into ordered text fragments.
///
/// Fragments are yielded in arrival order, one backend delta at a time. The
/// stream ends at the `[DONE]` sentinel, at upstream EOF, or after a single
/// transport error item.
fn fragment_stream<S>(chunks: S) -> impl Stream<Item = Result<String, BackendError>>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    let state = FragmentState {
        chunks,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(fragment) = state.pending.pop_front() {
                return Some((Ok(fragment), state));
            }
            if state.finished {
                return None;
            }

            match state.chunks.next().await {
                Some(Ok(bytes)) => {
                    for payload in state.decoder.feed(&bytes) {
                        if payload == DONE_PAYLOAD {
                            state.finished = true;
                            break;
                        }
                        if let Some(content) = delta_content(&payload) {
                            state.pending.push_back(content);
                        }
                    }
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(BackendError::Transport(err)), state));
                }
                None => {
                    // EOF without [DONE]; recover a final unterminated line
                    for payload in state.decoder.finish() {
                        if payload == DONE_PAYLOAD {
                            break;
                        }
                        if let Some(content) = delta_content(&payload) {
                            state.pending.push_back(content);
                        }
                    }
                    state.finished = true;
                }
            }
        }
    })
}
