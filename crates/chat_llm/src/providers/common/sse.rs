//! Shared SSE -> [`LLMStream`] adapter.

use eventsource_stream::Eventsource;
use futures_util::{future, StreamExt};
use reqwest::Response;

use crate::provider::{LLMError, LLMStream, Result};
use crate::types::LLMChunk;

/// Undecodable payloads stay parse errors; anything else becomes a stream error.
fn to_stream_error(err: LLMError) -> LLMError {
    match err {
        LLMError::Stream(_) | LLMError::Parse(_) => err,
        LLMError::Json(e) => LLMError::Parse(e.to_string()),
        other => LLMError::Stream(other.to_string()),
    }
}

/// Convert an SSE HTTP [`Response`] into an [`LLMStream`] of text fragments.
///
/// `handler` receives the data payload of each event and can either:
/// - return `Ok(Some(LLMChunk::Token(_)))` to emit a fragment (empty ones are dropped)
/// - return `Ok(Some(LLMChunk::Done))` to end the stream; `Done` itself is not emitted
/// - return `Ok(None)` to skip an event
/// - return `Err(_)` to emit an error (`LLMError::Parse` for undecodable data,
///   `LLMError::Stream` otherwise)
///
/// The stream also ends after the first error.
pub fn llm_stream_from_sse<H>(response: Response, mut handler: H) -> LLMStream
where
    H: FnMut(&str) -> Result<Option<LLMChunk>> + Send + 'static,
{
    let stream = response
        .bytes_stream()
        .eventsource()
        .map(move |event| {
            let event = event.map_err(|e| LLMError::Stream(e.to_string()))?;
            handler(event.data.as_str()).map_err(to_stream_error)
        })
        .scan(false, |failed, result| {
            if *failed {
                return future::ready(None);
            }
            let item = match result {
                Ok(Some(LLMChunk::Done)) => None,
                Err(err) => {
                    *failed = true;
                    Some(Some(Err(err)))
                }
                Ok(Some(LLMChunk::Token(text))) if text.is_empty() => Some(None),
                Ok(chunk) => Some(chunk.map(Ok)),
            };
            future::ready(item)
        })
        .filter_map(future::ready);

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ErrorKind;
    use futures_util::StreamExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn sse_response(body: &'static str) -> (MockServer, Response) {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/sse"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&mock_server)
            .await;

        let response = reqwest::Client::new()
            .get(format!("{}/sse", mock_server.uri()))
            .send()
            .await
            .expect("response");

        (mock_server, response)
    }

    #[tokio::test]
    async fn llm_stream_from_sse_skips_none_and_stops_at_done() {
        let (_server, response) = sse_response(concat!(
            ": keep-alive comment\n\n",
            "data: hello\n\n",
            "data: skip\n\n",
            "data: \n\n",
            "data: world\n\n",
            "data: [DONE]\n\n",
            "data: after-done\n\n",
        ))
        .await;

        let mut stream = llm_stream_from_sse(response, |data| match data {
            "skip" => Ok(None),
            "[DONE]" => Ok(Some(LLMChunk::Done)),
            other => Ok(Some(LLMChunk::Token(other.to_string()))),
        });

        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            out.push(item.expect("chunk"));
        }

        assert_eq!(
            out,
            vec![
                LLMChunk::Token("hello".to_string()),
                LLMChunk::Token("world".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn llm_stream_from_sse_keeps_parse_errors() {
        let (_server, response) = sse_response(concat!("data: boom\n\n", "data: later\n\n")).await;

        let mut stream = llm_stream_from_sse(response, |data| {
            if data == "boom" {
                return Err(LLMError::Parse("boom".to_string()));
            }
            Ok(Some(LLMChunk::Token(data.to_string())))
        });

        let Some(item) = stream.next().await else {
            panic!("expected one stream item");
        };

        match item {
            Ok(chunk) => panic!("expected error, got chunk: {chunk:?}"),
            Err(err @ LLMError::Parse(_)) => assert_eq!(err.kind(), ErrorKind::Parse),
            Err(other) => panic!("expected LLMError::Parse, got: {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn llm_stream_from_sse_maps_other_handler_errors_to_stream_error() {
        let (_server, response) = sse_response("data: refused\n\n").await;

        let mut stream = llm_stream_from_sse(response, |_| {
            Err(LLMError::Api {
                status: 500,
                message: "refused".to_string(),
            })
        });

        match stream.next().await {
            Some(Err(LLMError::Stream(msg))) => assert!(msg.contains("refused")),
            other => panic!("expected LLMError::Stream, got: {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }
}
