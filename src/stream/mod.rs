//! Streaming response assembly
//!
//! Turns a chunked response body into an ordered sequence of text deltas and
//! a running transcript. Network reads may split a line, or a UTF-8
//! character, at any byte; a single read may also carry many lines.
//!
//! - RawGenerate bodies are cut into lines on the raw bytes, so a character
//!   split across reads is reassembled before its line is decoded. An
//!   unterminated last line is parsed when the body ends.
//! - DeltaEvents bodies are parsed as server-sent events. Each `data:` line
//!   holding a JSON object is one frame; an `error` event ends the stream.
//!
//! Frame-level problems (malformed JSON, keep-alive or comment frames) are
//! logged and skipped. Only a failed read ends the stream with an error.

mod frames;

use bytes::Bytes;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::future::Either;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use frames::{
    parse_delta_event, parse_generate_line, ChatCompletionChunk, FrameError, GenerateChunk,
};

/// SSE event type the relay uses to report an upstream failure mid-stream
pub const ERROR_EVENT: &str = "error";

/// How the body of a streaming response is framed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// Newline-delimited JSON objects with a `response` field
    RawGenerate,
    /// `data: {...}` frames holding chat completion chunks
    DeltaEvents,
}

/// Fatal failure while reading the response body
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Error reading stream: {0}")]
    Read(#[from] reqwest::Error),

    #[error("Stream interrupted: {0}")]
    Interrupted(String),

    #[error("Malformed event stream: {0}")]
    Decode(String),
}

/// One applied delta and the transcript it produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub delta: String,
    pub transcript: String,
}

/// Splits raw reads into complete lines, carrying the unterminated rest
/// over to the next read.
#[derive(Debug, Default)]
pub struct LineDecoder {
    partial: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines completed by this read, in wire order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(bytes);

        let Some(end) = self.partial.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let complete: Vec<u8> = self.partial.drain(..=end).collect();
        complete[..end]
            .split(|&b| b == b'\n')
            .map(decode_line)
            .collect()
    }

    /// The unterminated last line, if any.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.partial);
        if rest.is_empty() {
            return None;
        }
        tracing::debug!(bytes = rest.len(), "Flushing unterminated line at end of stream");
        Some(decode_line(&rest))
    }
}

fn decode_line(line: &[u8]) -> String {
    String::from_utf8_lossy(line).trim_end_matches('\r').to_string()
}

fn generate_delta(line: &str) -> Option<String> {
    if line.trim().is_empty() {
        return None;
    }
    match parse_generate_line(line) {
        Ok(delta) => delta,
        Err(e) => {
            tracing::debug!(line = %line, error = %e, "Failed to parse chunk");
            None
        }
    }
}

fn event_delta(data: &str) -> Option<String> {
    match parse_delta_event(data) {
        Ok(delta) => delta,
        Err(FrameError::FormatMismatch) => {
            tracing::debug!(data = %data, "Skipping non-data frame");
            None
        }
        Err(e) => {
            tracing::debug!(data = %data, error = %e, "Failed to parse chunk");
            None
        }
    }
}

fn event_error<E: Into<StreamError>>(e: EventStreamError<E>) -> StreamError {
    match e {
        EventStreamError::Transport(e) => e.into(),
        EventStreamError::Utf8(e) => StreamError::Decode(e.to_string()),
        EventStreamError::Parser(e) => StreamError::Decode(e.to_string()),
    }
}

fn generate_deltas<S, E>(body: S) -> impl Stream<Item = Result<String, StreamError>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<StreamError>,
{
    async_stream::try_stream! {
        let mut lines = LineDecoder::new();
        futures::pin_mut!(body);

        while let Some(read) = body.next().await {
            let bytes = read.map_err(|e| -> StreamError { e.into() })?;
            for delta in lines.feed(&bytes).iter().filter_map(|l| generate_delta(l)) {
                yield delta;
            }
        }

        if let Some(delta) = lines.finish().as_deref().and_then(generate_delta) {
            yield delta;
        }
    }
}

fn event_deltas<S, E>(body: S) -> impl Stream<Item = Result<String, StreamError>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<StreamError>,
{
    // Events are only dispatched on a blank line; close a final unterminated one
    let closing = futures::stream::iter(std::iter::once(Ok(Bytes::from_static(b"\n\n"))));
    let events = body.chain(closing).eventsource();

    async_stream::try_stream! {
        futures::pin_mut!(events);

        while let Some(event) = events.next().await {
            let event = event.map_err(event_error)?;
            if event.event == ERROR_EVENT {
                Err::<(), _>(StreamError::Interrupted(event.data))?;
                break;
            }

            // Frames sent without a blank line between them share one event
            for delta in event.data.lines().filter_map(event_delta) {
                yield delta;
            }
        }
    }
}

/// Decode an async body in the given format, yielding one [`StreamChunk`]
/// per delta. The transcript only ever grows.
pub fn decode_stream<S, E>(
    body: S,
    format: WireFormat,
) -> impl Stream<Item = Result<StreamChunk, StreamError>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<StreamError>,
{
    let deltas = match format {
        WireFormat::RawGenerate => Either::Left(generate_deltas(body)),
        WireFormat::DeltaEvents => Either::Right(event_deltas(body)),
    };

    async_stream::try_stream! {
        let mut transcript = String::new();
        futures::pin_mut!(deltas);

        while let Some(delta) = deltas.next().await {
            let delta = delta?;
            transcript.push_str(&delta);
            yield StreamChunk { delta, transcript: transcript.clone() };
        }
    }
}
