//! Frame payloads for the two streaming wire formats
//!
//! - RawGenerate: one JSON object per line, `{"response": "..."}`
//! - DeltaEvents: server-sent `data: {...}` lines carrying chat completion chunks

use serde::Deserialize;
use thiserror::Error;

/// Recoverable problems with a single frame. Never fatal to a stream.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("not a data frame")]
    FormatMismatch,
}

/// A line of the engine's native generate stream
#[derive(Debug, Deserialize)]
pub struct GenerateChunk {
    #[serde(default)]
    pub response: Option<String>,
}

/// A chat completion chunk as re-streamed by the relay
#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    /// All `delta.content` values of the chunk, concatenated in choice order.
    pub fn text(&self) -> String {
        self.choices
            .iter()
            .filter_map(|c| c.delta.content.as_deref())
            .collect()
    }
}

/// Parse one complete RawGenerate line. `Ok(None)` means the line carried
/// no text (e.g. the final `done` object).
pub fn parse_generate_line(line: &str) -> Result<Option<String>, FrameError> {
    let chunk: GenerateChunk = serde_json::from_str(line)?;
    Ok(chunk.response.filter(|r| !r.is_empty()))
}

/// Parse the data of one DeltaEvents frame, `data: ` already removed.
/// Anything that is not a JSON object (`[DONE]`, stray text) is a format
/// mismatch.
pub fn parse_delta_event(data: &str) -> Result<Option<String>, FrameError> {
    if !data.starts_with('{') {
        return Err(FrameError::FormatMismatch);
    }

    let chunk: ChatCompletionChunk = serde_json::from_str(data)?;
    let text = chunk.text();

    Ok(if text.is_empty() { None } else { Some(text) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_line() {
        let delta = parse_generate_line(r#"{"model":"llama3.2","response":"He","done":false}"#).unwrap();
        assert_eq!(delta.as_deref(), Some("He"));

        let done = parse_generate_line(r#"{"response":"","done":true}"#).unwrap();
        assert!(done.is_none());

        let no_field = parse_generate_line(r#"{"done":true}"#).unwrap();
        assert!(no_field.is_none());
    }

    #[test]
    fn test_generate_line_malformed() {
        let err = parse_generate_line("not json").unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }

    #[test]
    fn test_delta_event_concatenates_choices() {
        let frame = r#"{"choices":[{"delta":{"content":"Hi"}},{"delta":{}},{"delta":{"content":" there"}}]}"#;
        assert_eq!(parse_delta_event(frame).unwrap().as_deref(), Some("Hi there"));
    }

    #[test]
    fn test_delta_event_role_only_chunk() {
        let frame = r#"{"choices":[{"index":0,"delta":{"role":"assistant"},"finish_reason":null}]}"#;
        assert!(parse_delta_event(frame).unwrap().is_none());
    }

    #[test]
    fn test_delta_event_mismatch() {
        assert!(matches!(
            parse_delta_event("keep-alive"),
            Err(FrameError::FormatMismatch)
        ));
        assert!(matches!(
            parse_delta_event("[DONE]"),
            Err(FrameError::FormatMismatch)
        ));
    }

    #[test]
    fn test_delta_event_truncated_json() {
        let err = parse_delta_event(r#"{"choices":[{"delta":{"cont"#).unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }
}
