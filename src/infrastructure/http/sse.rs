//! Server-Sent Events support for the streaming diagnosis endpoint
//!
//! The backend emits one JSON object per event, `data: {"type": .., "data": ..}`,
//! with a blank line between events. [`SseStreamParser`] turns the response
//! byte stream into [`StreamItem`]s; [`HttpStreamTransport`] pumps them into
//! a [`StreamConnection`].

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, instrument, warn};

use super::client::STREAM_PATH;
use super::{build_client, join_url};
use crate::domain::errors::{AnalysisError, AnalysisResult};
use crate::domain::models::{RawStreamMessage, SubjectId, TransportConfig};
use crate::domain::ports::{StreamConnection, StreamControl, StreamItem, StreamTransport};

/// Sentinel some servers send as the last event
const DONE_MARKER: &str = "[DONE]";

/// Channel depth between the HTTP reader and the stream session
const CHANNEL_CAPACITY: usize = 64;

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>;

/// Parse the text of one SSE event (the lines between two blank lines).
///
/// Returns `None` for events without data, comments and the done marker.
pub fn parse_sse_event(text: &str) -> Option<StreamItem> {
    let data: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    if data.is_empty() {
        return None;
    }
    let data = data.join("\n");
    if data.trim() == DONE_MARKER {
        return None;
    }

    Some(
        serde_json::from_str::<RawStreamMessage>(&data)
            .map_err(|e| AnalysisError::Parse(format!("invalid stream message: {e}"))),
    )
}

/// Wraps a byte stream and parses it into stream items
///
/// A failure of the underlying byte stream is yielded once as a
/// `StreamTransport` error, after which the parser ends.
pub struct SseStreamParser {
    inner: ByteStream,
    buffer: Vec<u8>,
    finished: bool,
}

impl SseStreamParser {
    pub fn new<S, E>(byte_stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display,
    {
        Self {
            inner: Box::pin(byte_stream.map(|chunk| chunk.map_err(|e| e.to_string()))),
            buffer: Vec::new(),
            finished: false,
        }
    }

    /// Remove the next complete event from the buffer.
    fn take_event(&mut self) -> Option<String> {
        let (end, separator) = find_separator(&self.buffer)?;
        let event: Vec<u8> = self.buffer.drain(..end + separator).take(end).collect();
        Some(String::from_utf8_lossy(&event).into_owned())
    }
}

/// Position and length of the first blank-line separator.
fn find_separator(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

impl Stream for SseStreamParser {
    type Item = StreamItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.finished {
                return Poll::Ready(None);
            }

            if let Some(event) = self.take_event() {
                match parse_sse_event(&event) {
                    Some(item) => return Poll::Ready(Some(item)),
                    None => continue,
                }
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => self.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(AnalysisError::StreamTransport(e))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    if self.buffer.iter().all(u8::is_ascii_whitespace) {
                        return Poll::Ready(None);
                    }
                    let remaining = String::from_utf8_lossy(&self.buffer).into_owned();
                    self.buffer.clear();
                    return Poll::Ready(parse_sse_event(&remaining));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Aborts the reader task of one stream connection.
struct PumpControl {
    task: AbortHandle,
}

impl StreamControl for PumpControl {
    fn close(&self) {
        self.task.abort();
    }
}

/// Stream transport over the backend's SSE endpoint
pub struct HttpStreamTransport {
    http_client: reqwest::Client,
    url: String,
}

impl HttpStreamTransport {
    pub fn new(config: &TransportConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http_client: build_client(config, None)?,
            url: join_url(&config.base_url, STREAM_PATH),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StreamTransport for HttpStreamTransport {
    #[instrument(skip(self, payload), fields(subject = %subject))]
    async fn open_stream(
        &self,
        subject: &SubjectId,
        payload: &Value,
    ) -> AnalysisResult<StreamConnection> {
        let response = self
            .http_client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::StreamTransport(format!(
                "stream endpoint returned {status}: {body}"
            )));
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut parser = SseStreamParser::new(response.bytes_stream());

        let task = tokio::spawn(async move {
            while let Some(item) = parser.next().await {
                let fatal = matches!(&item, Err(err) if err.is_stream_fatal());
                if tx.send(item).await.is_err() {
                    debug!("stream receiver dropped; stopping reader");
                    return;
                }
                if fatal {
                    warn!("stream reader stopped after transport error");
                    return;
                }
            }
            debug!("stream body ended");
        });

        Ok(StreamConnection {
            messages: rx,
            control: std::sync::Arc::new(PumpControl {
                task: task.abort_handle(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;

    fn parser(chunks: Vec<&'static str>) -> SseStreamParser {
        SseStreamParser::new(stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, std::io::Error>(Bytes::from(c))),
        ))
    }

    #[tokio::test]
    async fn test_parse_multiple_events() {
        let mut parser = parser(vec![
            "data: {\"type\":\"initial_analysis\",\"data\":{\"confidence\":0.4}}\n\n",
            "data: {\"type\":\"final_analysis\",\"data\":{}}\n\n",
        ]);

        let first = parser.next().await.unwrap().unwrap();
        assert_eq!(first.message_type, "initial_analysis");
        assert_eq!(first.data, json!({"confidence": 0.4}));
        let second = parser.next().await.unwrap().unwrap();
        assert_eq!(second.message_type, "final_analysis");
        assert!(parser.next().await.is_none());
    }

    #[tokio::test]
    async fn test_parse_chunked_data() {
        let mut parser = parser(vec!["data: {\"type\":\"progres", "sive_insight\",\"data\":{}}\n", "\n"]);

        let event = parser.next().await.unwrap().unwrap();
        assert_eq!(event.message_type, "progressive_insight");
    }

    #[tokio::test]
    async fn test_comments_done_and_crlf() {
        let mut parser = parser(vec![
            ": keep-alive\n\n",
            "event: update\r\ndata: {\"type\":\"final\",\"data\":{}}\r\n\r\n",
            "data: [DONE]\n\n",
        ]);

        let event = parser.next().await.unwrap().unwrap();
        assert_eq!(event.message_type, "final");
        assert!(parser.next().await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_json_is_a_parse_error() {
        let mut parser = parser(vec![
            "data: {not json}\n\n",
            "data: {\"type\":\"initial\",\"data\":{}}\n\n",
        ]);

        assert!(matches!(
            parser.next().await.unwrap(),
            Err(AnalysisError::Parse(_))
        ));
        assert!(parser.next().await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_trailing_event_without_separator() {
        let mut parser = parser(vec!["data: {\"type\":\"final\",\"data\":{}}"]);
        assert_eq!(parser.next().await.unwrap().unwrap().message_type, "final");
        assert!(parser.next().await.is_none());
    }

    #[tokio::test]
    async fn test_byte_stream_error_ends_parser() {
        let chunks: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from("data: {\"type\":\"initial\",\"data\":{}}\n\n")),
            Err("connection reset".to_string()),
            Ok(Bytes::from("data: {\"type\":\"final\",\"data\":{}}\n\n")),
        ];
        let mut parser = SseStreamParser::new(stream::iter(chunks));

        assert!(parser.next().await.unwrap().is_ok());
        assert_eq!(
            parser.next().await.unwrap().unwrap_err(),
            AnalysisError::StreamTransport("connection reset".into())
        );
        assert!(parser.next().await.is_none());
    }
}
