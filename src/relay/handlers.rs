//! HTTP request handlers.

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{Extension, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures::{Stream, StreamExt};

use super::client::FragmentStream;
use super::server::{AppState, RequestId};
use super::types::{GenerationRequest, GenerationResponse};
use crate::auth::authorize;
use crate::error::Error;

/// Handle POST /generate
///
/// Buffered mode: waits for the complete generation, then returns the
/// trimmed text. Backend failures map to a generic 503; the cause is logged
/// here and never reaches the caller.
pub async fn generate(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<GenerationResponse>, Error> {
    authorize(&headers, &state.config.auth)?;

    tracing::info!(
        request_id = %request_id.0,
        prompt_chars = request.prompt.chars().count(),
        max_new_tokens = request.max_new_tokens,
        "Forwarding generation request"
    );

    let generated_text = state.backend.complete(&request).await.map_err(|e| {
        tracing::error!(request_id = %request_id.0, error = %e, "Backend completion failed");
        Error::BackendUnavailable(e)
    })?;

    tracing::info!(request_id = %request_id.0, "Received completion");

    Ok(Json(GenerationResponse { generated_text }))
}

/// Handle POST /generate-stream
///
/// Streaming mode: relays text fragments as the backend produces them,
/// `Content-Type: text/plain`. A failure before the backend accepts the
/// request still returns a structured 503; once the response is committed,
/// failures are reported in-band (see [`relay_fragments`]).
pub async fn generate_stream(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Json(request): Json<GenerationRequest>,
) -> Result<Response, Error> {
    authorize(&headers, &state.config.auth)?;

    tracing::info!(
        request_id = %request_id.0,
        prompt_chars = request.prompt.chars().count(),
        max_new_tokens = request.max_new_tokens,
        "Forwarding streaming generation request"
    );

    let fragments = state.backend.stream_completion(&request).await.map_err(|e| {
        tracing::error!(request_id = %request_id.0, error = %e, "Backend refused streaming request");
        Error::BackendUnavailable(e)
    })?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from_stream(relay_fragments(fragments)))
        .unwrap();

    Ok(response)
}

/// Convert a fragment stream into a response body stream.
///
/// Fragments pass through verbatim in arrival order. On an upstream error
/// the status line is long gone, so the failure is reported in-band: one
/// final fragment carrying an error marker, after which the stream ends and
/// the upstream is not polled again.
fn relay_fragments(upstream: FragmentStream) -> impl Stream<Item = Result<Bytes, Infallible>> {
    futures::stream::unfold(Some(upstream), |state| async move {
        let mut upstream = state?;
        match upstream.next().await {
            Some(Ok(fragment)) => Some((Ok(Bytes::from(fragment)), Some(upstream))),
            Some(Err(err)) => {
                tracing::error!(error = %err, "Backend stream failed mid-response");
                let marker = format!("\n[Error streaming response: {}]\n", err);
                Some((Ok(Bytes::from(marker)), None))
            }
            None => None,
        }
    })
}

/// Handle GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "textgate"
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;

    fn upstream(items: Vec<Result<String, BackendError>>) -> FragmentStream {
        Box::pin(futures::stream::iter(items))
    }

    async fn collect_body(stream: impl Stream<Item = Result<Bytes, Infallible>>) -> String {
        let chunks: Vec<Bytes> = stream.map(|item| item.unwrap()).collect().await;
        chunks
            .iter()
            .map(|b| std::str::from_utf8(b).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn fragments_pass_through_in_order() {
        let body = collect_body(relay_fragments(upstream(vec![
            Ok("Hel".to_string()),
            Ok("lo".to_string()),
        ])))
        .await;

        assert_eq!(body, "Hello");
    }

    #[tokio::test]
    async fn error_becomes_inband_marker_and_ends_stream() {
        let body = collect_body(relay_fragments(upstream(vec![
            Ok("Hel".to_string()),
            Err(BackendError::EmptyCompletion),
            Ok("never emitted".to_string()),
        ])))
        .await;

        assert!(body.starts_with("Hel"));
        assert!(
            body.contains("\n[Error streaming response: "),
            "body should carry the in-band marker: {:?}",
            body
        );
        assert!(body.ends_with("]\n"));
        assert!(
            !body.contains("never emitted"),
            "upstream must not be polled after an error"
        );
    }

    #[tokio::test]
    async fn empty_upstream_yields_empty_body() {
        let body = collect_body(relay_fragments(upstream(vec![]))).await;
        assert_eq!(body, "");
    }
}
