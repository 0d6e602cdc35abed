//! Incremental decoding of the `/v1/chat/stream` event stream.
//!
//! The service writes newline-delimited events of the form:
//!
//! ```text
//! data: {"content":"Hel","done":false}
//!
//! data: {"content":"lo","done":false}
//!
//! data: {"content":"","done":true,"usage":{...}}
//! ```
//!
//! Transport chunks arrive at arbitrary boundaries: a chunk may end in the
//! middle of a line, in the middle of the `data: ` prefix, or in the middle
//! of a multi-byte UTF-8 sequence. The decoder keeps one residual buffer
//! across arrivals and only ever acts on complete lines, so none of those
//! splits are observable in its output.

use bytes::{Buf, Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};

use crate::client::ClientError;
use crate::model::StreamChunk;

struct DecodeState<S> {
    bytes: std::pin::Pin<Box<S>>,
    /// Raw bytes not yet decodable as UTF-8 (a split multi-byte sequence).
    pending: BytesMut,
    /// Decoded text not yet terminated by a newline.
    buffer: String,
    /// Transport reported end-of-stream.
    ended: bool,
    /// A terminal chunk was yielded or an error surfaced; nothing follows.
    finished: bool,
}

/// Decode a raw byte-chunk stream into an ordered, lazy sequence of
/// [`StreamChunk`] values.
///
/// Each successfully parsed chunk is yielded as soon as its line is complete,
/// with no batching. Lines without the `data: ` prefix (blank keep-alives,
/// `event:` lines) are discarded, and a line whose payload fails to parse as
/// JSON is skipped without aborting the stream. Decoding halts permanently
/// after the first terminal chunk; whatever is still buffered at that point
/// is discarded. The only error yielded is a transport read failure,
/// propagated unchanged, after which the sequence ends.
pub fn decode_chunks<S, E>(byte_stream: S) -> impl Stream<Item = Result<StreamChunk, ClientError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<ClientError> + Send,
{
    let state = DecodeState {
        bytes: Box::pin(byte_stream),
        pending: BytesMut::new(),
        buffer: String::new(),
        ended: false,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }

        loop {
            // Drain complete lines before reading more bytes. Only a
            // trailing `\r` is stripped; the `data: ` prefix must start the
            // line, so leading whitespace disqualifies it.
            while let Some(pos) = state.buffer.find('\n') {
                let raw = &state.buffer[..pos];
                let line = raw.strip_suffix('\r').unwrap_or(raw).to_string();
                state.buffer.drain(..=pos);

                if let Some(chunk) = parse_event_line(&line) {
                    if chunk.is_terminal() {
                        state.finished = true;
                    }
                    return Some((Ok(chunk), state));
                }
            }

            if state.ended {
                // Flush a trailing event the transport never newline-terminated.
                let line = std::mem::take(&mut state.buffer);
                state.finished = true;
                let line = line.strip_suffix('\r').unwrap_or(&line);
                return parse_event_line(line).map(|chunk| (Ok(chunk), state));
            }

            match state.bytes.as_mut().next().await {
                Some(Ok(chunk)) => {
                    state.pending.extend_from_slice(&chunk);
                    drain_utf8(&mut state.pending, &mut state.buffer);
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(err.into()), state));
                }
                None => {
                    state.ended = true;
                    drain_utf8(&mut state.pending, &mut state.buffer);
                }
            }
        }
    })
}

/// Move every decodable byte from `pending` into `buffer`.
///
/// An incomplete multi-byte sequence at the tail stays in `pending` until its
/// continuation bytes arrive; a genuinely invalid sequence is replaced with
/// U+FFFD so one corrupt byte cannot wedge the decoder.
fn drain_utf8(pending: &mut BytesMut, buffer: &mut String) {
    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                buffer.push_str(text);
                pending.clear();
                return;
            }
            Err(err) => {
                let valid = err.valid_up_to();
                buffer.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match err.error_len() {
                    None => {
                        pending.advance(valid);
                        return;
                    }
                    Some(bad) => {
                        buffer.push('\u{FFFD}');
                        pending.advance(valid + bad);
                    }
                }
            }
        }
    }
}

/// Parse one line into a chunk, if it is a well-formed event.
///
/// Returns `None` for lines not starting with `data: `, empty payloads, and
/// malformed JSON: the skip-not-fail policy for everything below the
/// transport.
fn parse_event_line(line: &str) -> Option<StreamChunk> {
    let payload = line.strip_prefix("data: ")?.trim();
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => Some(chunk),
        Err(err) => {
            tracing::debug!("skipping malformed event line: {err}");
            None
        }
    }
}

/// Extension trait for `reqwest::Response` to decode the chat stream.
pub trait SseResponseExt {
    /// Convert the response body into a stream of decoded [`StreamChunk`]s.
    fn stream_chunks(self) -> impl Stream<Item = Result<StreamChunk, ClientError>> + Send;
}

impl SseResponseExt for reqwest::Response {
    fn stream_chunks(self) -> impl Stream<Item = Result<StreamChunk, ClientError>> + Send {
        decode_chunks(self.bytes_stream())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UsageStats;

    /// Run the decoder over a fixed set of byte chunks and collect the output.
    async fn decode(parts: Vec<&[u8]>) -> Vec<Result<StreamChunk, ClientError>> {
        let byte_stream = stream::iter(
            parts
                .into_iter()
                .map(|part| Ok::<_, ClientError>(Bytes::copy_from_slice(part)))
                .collect::<Vec<_>>(),
        );
        decode_chunks(byte_stream).collect().await
    }

    fn contents(chunks: &[Result<StreamChunk, ClientError>]) -> Vec<String> {
        chunks
            .iter()
            .map(|c| c.as_ref().expect("chunk").content.clone())
            .collect()
    }

    #[tokio::test]
    async fn decodes_one_event_per_line() {
        let chunks = decode(vec![
            b"data: {\"content\":\"a\",\"done\":false}\n",
            b"data: {\"content\":\"b\",\"done\":false}\n",
        ])
        .await;
        assert_eq!(contents(&chunks), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn tolerates_arbitrary_split_points() {
        // Split mid-prefix and mid-JSON.
        let chunks = decode(vec![
            b"da",
            b"ta: {\"cont",
            b"ent\":\"Hel\",\"done\":false}\ndata: {\"content\":\"lo\",\"do",
            b"ne\":false}\n",
        ])
        .await;
        assert_eq!(contents(&chunks), vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn reassembles_multibyte_character_split_across_chunks() {
        let line = "data: {\"content\":\"héllo\",\"done\":false}\n".as_bytes();
        // Split inside the two-byte encoding of 'é'.
        let split = line.iter().position(|&b| b == 0xc3).expect("é present") + 1;
        let chunks = decode(vec![&line[..split], &line[split..]]).await;
        assert_eq!(contents(&chunks), vec!["héllo"]);
    }

    #[tokio::test]
    async fn ignores_non_data_and_keepalive_lines() {
        let chunks = decode(vec![
            b"\n: keep-alive\nevent: message\ndata: {\"content\":\"x\",\"done\":false}\n",
        ])
        .await;
        assert_eq!(contents(&chunks), vec!["x"]);
    }

    #[tokio::test]
    async fn malformed_json_is_skipped_not_fatal() {
        let chunks = decode(vec![
            b"data: {not json}\ndata: {\"content\":\"ok\",\"done\":false}\n",
        ])
        .await;
        assert_eq!(contents(&chunks), vec!["ok"]);
    }

    #[tokio::test]
    async fn halts_permanently_after_done_chunk() {
        let chunks = decode(vec![
            b"data: {\"content\":\"end\",\"done\":true}\ndata: {\"content\":\"never\",\"done\":false}\n",
            b"data: {\"content\":\"never either\",\"done\":false}\n",
        ])
        .await;
        assert_eq!(chunks.len(), 1);
        let last = chunks[0].as_ref().expect("chunk");
        assert_eq!(last.content, "end");
        assert!(last.done);
    }

    #[tokio::test]
    async fn error_chunk_is_terminal() {
        let chunks = decode(vec![
            b"data: {\"error\":\"gpu on fire\",\"done\":true}\ndata: {\"content\":\"never\",\"done\":false}\n",
        ])
        .await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].as_ref().expect("chunk").error.as_deref(),
            Some("gpu on fire")
        );
    }

    #[tokio::test]
    async fn flushes_trailing_event_without_newline_at_end_of_stream() {
        let chunks = decode(vec![b"data: {\"content\":\"tail\",\"done\":false}"]).await;
        assert_eq!(contents(&chunks), vec!["tail"]);
    }

    #[tokio::test]
    async fn end_of_stream_without_terminal_chunk_just_ends() {
        let chunks = decode(vec![b"data: {\"content\":\"partial\",\"done\":false}\n"]).await;
        assert_eq!(contents(&chunks), vec!["partial"]);
    }

    #[tokio::test]
    async fn handles_crlf_line_endings() {
        let chunks = decode(vec![b"data: {\"content\":\"win\",\"done\":false}\r\n"]).await;
        assert_eq!(contents(&chunks), vec!["win"]);
    }

    #[tokio::test]
    async fn indented_line_is_not_an_event() {
        let chunks = decode(vec![
            b"  data: {\"content\":\"indented\",\"done\":false}\ndata: {\"content\":\"ok\",\"done\":false}\n",
        ])
        .await;
        assert_eq!(contents(&chunks), vec!["ok"]);
    }

    #[tokio::test]
    async fn transport_error_is_propagated_and_ends_stream() {
        let byte_stream = stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"content\":\"a\",\"done\":false}\n")),
            Err(ClientError::Config("socket reset".into())),
            Ok(Bytes::from_static(b"data: {\"content\":\"b\",\"done\":false}\n")),
        ]);
        let chunks: Vec<_> = decode_chunks(byte_stream).collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_ref().expect("chunk").content, "a");
        assert!(chunks[1].is_err());
    }

    #[tokio::test]
    async fn hello_reassembled_over_three_odd_writes() {
        let body = concat!(
            "data: {\"content\":\"Hel\",\"done\":false}\n",
            "data: {\"content\":\"lo\",\"done\":false}\n",
            "data: {\"content\":\"\",\"done\":true,\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":2,\"total_tokens\":7}}\n",
        )
        .as_bytes();
        let chunks = decode(vec![&body[..7], &body[7..53], &body[53..]]).await;

        let decoded: Vec<_> = chunks.into_iter().map(|c| c.expect("chunk")).collect();
        let total: String = decoded.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(total, "Hello");
        assert!(decoded.last().expect("terminal").done);
        assert_eq!(
            decoded.last().and_then(|c| c.usage),
            Some(UsageStats {
                prompt_tokens: 5,
                completion_tokens: 2,
                total_tokens: 7,
            })
        );
    }

    #[test]
    fn event_line_parsing() {
        assert_eq!(
            parse_event_line("data: {\"content\":\"x\",\"done\":false}")
                .map(|c| c.content),
            Some("x".to_string())
        );
        assert!(parse_event_line("data: ").is_none());
        assert!(parse_event_line("data: not json").is_none());
        assert!(parse_event_line(" data: {\"content\":\"x\",\"done\":false}").is_none());
        assert!(parse_event_line(": comment").is_none());
        assert!(parse_event_line("").is_none());
    }
}
