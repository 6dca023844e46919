//! Incremental decoding of provider streaming bodies.
//!
//! Providers stream either newline-delimited JSON objects (Ollama) or
//! server-sent events with `data: ` lines ending in a `[DONE]` sentinel
//! (OpenAI-compatible). Both are line oriented, so a single decoder buffers
//! raw bytes, splits complete lines and hands each one to the framing rule.
//!
//! A frame that fails to parse is skipped. The decoder always ends with one
//! `done` chunk, whether or not the provider sent an explicit end marker.

use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{trace, warn};

use super::ChunkStream;
use crate::types::StreamChunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One JSON object per line: `{"message":{"content":"..."},"done":false}`
    Ndjson,
    /// `data: {...}` lines, terminated by `data: [DONE]`
    Sse,
}

/// What a single line contributed to the stream.
#[derive(Debug, Default, PartialEq)]
struct LineOutcome {
    text: Option<String>,
    done: bool,
}

// --- Frame shapes ---

#[derive(Deserialize)]
struct NdjsonFrame {
    #[serde(default)]
    message: Option<NdjsonMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct NdjsonMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct SseFrame {
    #[serde(default)]
    choices: Vec<SseChoice>,
}

#[derive(Deserialize)]
struct SseChoice {
    #[serde(default)]
    delta: Option<SseDelta>,
}

#[derive(Deserialize)]
struct SseDelta {
    #[serde(default)]
    content: Option<String>,
}

impl Framing {
    fn decode_line(&self, line: &str) -> LineOutcome {
        match self {
            Framing::Ndjson => decode_ndjson_line(line),
            Framing::Sse => decode_sse_line(line),
        }
    }
}

fn decode_ndjson_line(line: &str) -> LineOutcome {
    match serde_json::from_str::<NdjsonFrame>(line) {
        Ok(frame) => LineOutcome {
            text: frame
                .message
                .and_then(|m| m.content)
                .filter(|c| !c.is_empty()),
            done: frame.done,
        },
        Err(e) => {
            trace!(error = %e, "skipping malformed NDJSON frame");
            LineOutcome::default()
        }
    }
}

fn decode_sse_line(line: &str) -> LineOutcome {
    let data = match line.strip_prefix("data:") {
        Some(d) => d.trim(),
        // event:, id:, comments and keep-alives carry no content
        None => return LineOutcome::default(),
    };

    if data == "[DONE]" {
        return LineOutcome {
            text: None,
            done: true,
        };
    }

    match serde_json::from_str::<SseFrame>(data) {
        Ok(frame) => LineOutcome {
            text: frame
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta)
                .and_then(|d| d.content)
                .filter(|c| !c.is_empty()),
            done: false,
        },
        Err(e) => {
            trace!(error = %e, "skipping malformed SSE frame");
            LineOutcome::default()
        }
    }
}

/// Byte-level line splitter feeding a [`Framing`].
///
/// Bytes are buffered until a newline arrives so multi-byte characters and
/// frames split across reads decode correctly.
#[derive(Debug)]
pub struct ChunkDecoder {
    framing: Framing,
    buffer: Vec<u8>,
    finished: bool,
}

impl ChunkDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buffer: Vec::new(),
            finished: false,
        }
    }

    /// True once the terminal chunk has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed raw bytes; returns the chunks completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamChunk> {
        if self.finished {
            return Vec::new();
        }
        self.buffer.extend_from_slice(bytes);

        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.decode_into(&line, &mut out);
            if self.finished {
                self.buffer.clear();
                break;
            }
        }
        out
    }

    /// Flush whatever is left and close the stream.
    pub fn finish(&mut self) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        if !self.finished && !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.decode_into(&rest, &mut out);
        }
        if !self.finished {
            self.finished = true;
            out.push(StreamChunk::done());
        }
        out
    }

    fn decode_into(&mut self, raw: &[u8], out: &mut Vec<StreamChunk>) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();
        if line.is_empty() {
            return;
        }
        let outcome = self.framing.decode_line(line);
        if let Some(content) = outcome.text {
            out.push(StreamChunk::text(content));
        }
        if outcome.done {
            self.finished = true;
            out.push(StreamChunk::done());
        }
    }
}

/// Decode a provider byte stream into `StreamChunk`s.
///
/// A read error after the response started is treated as the provider
/// closing early: the stream ends with an implicit `done`.
pub fn decode_stream<S, B, E>(source: S, framing: Framing) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut source = Box::pin(source);
        let mut decoder = ChunkDecoder::new(framing);

        while let Some(item) = source.next().await {
            match item {
                Ok(bytes) => {
                    for chunk in decoder.push(bytes.as_ref()) {
                        yield chunk;
                    }
                    if decoder.is_finished() {
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "provider stream ended early");
                    break;
                }
            }
        }

        for chunk in decoder.finish() {
            yield chunk;
        }
    })
}
