//! Server-Sent Events (SSE) processing for streamed replies.
//!
//! This module turns the raw body of `POST /api/v1/conversations/{id}/stream` into
//! [`StreamEvent`]s.  Events are separated by a blank line.  `data:` lines carry either JSON or
//! plain text; `:` lines are keep-alives and are skipped.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;

use crate::error::{Error, Result};

/// One decoded event from a reply stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A fragment of assistant text.
    Chunk(String),
    /// The server finished the reply.
    Done,
    /// The server aborted the reply with a message.
    Error(String),
}

/// Process a stream of bytes into a stream of reply events.
///
/// Multi-byte characters split across network reads are reassembled before decoding.
pub fn process_sse<S>(byte_stream: S) -> impl Stream<Item = Result<StreamEvent>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let state = (byte_stream, String::new(), Vec::<u8>::new());

    stream::unfold(
        state,
        move |(mut stream, mut buffer, mut pending)| async move {
            loop {
                while let Some((event, remaining)) = extract_event(&buffer) {
                    buffer = remaining;
                    if let Some(event) = event {
                        return Some((event, (stream, buffer, pending)));
                    }
                }

                match stream.next().await {
                    Some(Ok(bytes)) => {
                        pending.extend_from_slice(&bytes);
                        match std::str::from_utf8(&pending) {
                            Ok(text) => {
                                push_normalized(&mut buffer, text);
                                pending.clear();
                            }
                            Err(e) if e.error_len().is_none() => {
                                // Incomplete trailing character; decode what is valid.
                                let valid = e.valid_up_to();
                                let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
                                push_normalized(&mut buffer, &text);
                                pending.drain(..valid);
                            }
                            Err(e) => {
                                pending.clear();
                                return Some((
                                    Err(Error::encoding(
                                        format!("Invalid UTF-8 in stream: {e}"),
                                        Some(Box::new(e)),
                                    )),
                                    (stream, buffer, pending),
                                ));
                            }
                        }
                    }
                    Some(Err(e)) => {
                        return Some((Err(e), (stream, buffer, pending)));
                    }
                    None => {
                        // End of stream; flush a final event that lacked its blank line.
                        if !buffer.trim().is_empty() {
                            push_normalized(&mut buffer, "\n\n");
                            while let Some((event, remaining)) = extract_event(&buffer) {
                                buffer = remaining;
                                if let Some(event) = event {
                                    return Some((event, (stream, buffer, pending)));
                                }
                            }
                        }
                        return None;
                    }
                }
            }
        },
    )
}

/// Appends `text` and folds CRLF into LF.  A trailing `\r` stays until the next read so a
/// pair split across reads still folds.
fn push_normalized(buffer: &mut String, text: &str) {
    buffer.push_str(text);
    if buffer.contains("\r\n") {
        *buffer = buffer.replace("\r\n", "\n");
    }
}

/// Extract one event block from the buffer.
///
/// Returns `None` when no complete block is buffered.  The inner option is `None` for blocks
/// that carry no data, such as keep-alive comments.
fn extract_event(buffer: &str) -> Option<(Option<Result<StreamEvent>>, String)> {
    let (block, rest) = buffer.split_once("\n\n")?;
    let rest = rest.to_string();

    let mut event_type = None;
    let mut data: Vec<&str> = Vec::new();
    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim());
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }

    if data.is_empty() {
        return Some((None, rest));
    }
    let data = data.join("\n");
    Some((parse_data(event_type, &data), rest))
}

/// Decode the data of one event.
fn parse_data(event_type: Option<&str>, data: &str) -> Option<Result<StreamEvent>> {
    if data.trim() == "[DONE]" {
        return Some(Ok(StreamEvent::Done));
    }
    let Ok(Value::Object(object)) = serde_json::from_str::<Value>(data) else {
        return Some(Ok(StreamEvent::Chunk(data.to_string())));
    };

    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .or(event_type)
        .unwrap_or("chunk");
    match kind {
        "chunk" | "token" | "content" | "delta" => {
            let content = object
                .get("content")
                .or_else(|| object.get("delta"))
                .or_else(|| object.get("text"))
                .and_then(Value::as_str);
            match content {
                Some(content) => Some(Ok(StreamEvent::Chunk(content.to_string()))),
                None => Some(Err(Error::serialization(
                    format!("Malformed chunk event: missing content in '{data}'"),
                    None,
                ))),
            }
        }
        "done" | "end" | "complete" => Some(Ok(StreamEvent::Done)),
        "error" => {
            let message = match object.get("error") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Object(inner)) => inner
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("stream error")
                    .to_string(),
                _ => object
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("stream error")
                    .to_string(),
            };
            Some(Ok(StreamEvent::Error(message)))
        }
        // Metadata events such as message ids are not part of the draft.
        _ => None,
    }
}
