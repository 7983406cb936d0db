//! Incremental decoder for Anthropic `text/event-stream` bodies.
//!
//! Every data payload the API sends carries a JSON `type` field, so the
//! decoder ignores SSE `event:` lines entirely and dispatches on the
//! payload tag. Frames with no wire counterpart (ping, message_stop,
//! anything unrecognized) decode to nothing.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::provider::{StreamEnd, StreamEvent, ToolCall};

/// Decoder state carried across transport chunks: the unterminated line
/// tail, the tool block currently being assembled, and the running usage
/// summary that seals the stream.
pub(crate) struct SseDecoder {
    buf: String,
    open_tool: Option<ToolAssembly>,
    end: StreamEnd,
}

/// A tool_use block mid-assembly. Its JSON input arrives as string
/// fragments and only becomes a [`ToolCall`] when the block closes.
struct ToolAssembly {
    id: String,
    name: String,
    args: String,
}

impl SseDecoder {
    pub(crate) fn new() -> Self {
        Self {
            buf: String::new(),
            open_tool: None,
            end: StreamEnd::default(),
        }
    }

    /// Feed one transport chunk, appending any completed events to `out`.
    /// Non-UTF-8 chunks are skipped.
    pub(crate) fn feed(&mut self, chunk: &[u8], out: &mut Vec<StreamEvent>) {
        let Ok(text) = std::str::from_utf8(chunk) else {
            return;
        };
        self.buf.push_str(text);

        while let Some(newline) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=newline).collect();
            out.extend(self.decode_line(line.trim()));
        }
    }

    /// Seal the stream once the transport closes.
    pub(crate) fn finish(self) -> StreamEvent {
        StreamEvent::Done(self.end)
    }

    fn decode_line(&mut self, line: &str) -> Option<StreamEvent> {
        // Only data lines matter: `event:` names just repeat the payload
        // tag, and comment/keepalive lines carry nothing.
        let payload = line.strip_prefix("data:")?.trim_start();
        match serde_json::from_str::<Frame>(payload) {
            Ok(frame) => self.apply(frame),
            Err(_) => {
                debug!(payload, "dropping unrecognized stream frame");
                None
            }
        }
    }

    fn apply(&mut self, frame: Frame) -> Option<StreamEvent> {
        match frame {
            Frame::MessageStart { message } => {
                self.end.model = message.model;
                self.end.tokens_in = message.usage.input_tokens;
                None
            }

            Frame::ContentBlockStart { content_block } => {
                if content_block.kind == "tool_use" {
                    self.open_tool = Some(ToolAssembly {
                        id: content_block.id,
                        name: content_block.name,
                        args: String::new(),
                    });
                }
                None
            }

            Frame::ContentBlockDelta { delta } => match delta {
                Delta::Text { text } => Some(StreamEvent::Text(text)),
                Delta::Thinking { thinking } => Some(StreamEvent::Thinking(thinking)),
                Delta::ToolArgs { partial_json } => {
                    if let Some(tool) = &mut self.open_tool {
                        tool.args.push_str(&partial_json);
                    }
                    None
                }
                Delta::Other(_) => None,
            },

            Frame::ContentBlockStop {} => {
                let tool = self.open_tool.take()?;
                let input = serde_json::from_str(&tool.args)
                    .unwrap_or_else(|_| serde_json::json!({}));
                Some(StreamEvent::ToolUse(ToolCall {
                    id: tool.id,
                    name: tool.name,
                    input,
                }))
            }

            Frame::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    self.end.tokens_out = usage.output_tokens;
                }
                if let Some(reason) = delta.stop_reason {
                    self.end.stop_reason = reason;
                }
                None
            }

            Frame::Error { error } => {
                warn!(%error, "provider reported a stream error");
                Some(StreamEvent::Error(error.to_string()))
            }

            Frame::Ping {} | Frame::MessageStop {} => None,
        }
    }
}

/// The wire frames, keyed by their JSON `type` tag. A tag outside this set
/// fails to decode and the frame is dropped.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Frame {
    MessageStart {
        message: MessageMeta,
    },
    ContentBlockStart {
        content_block: BlockOpen,
    },
    ContentBlockDelta {
        delta: Delta,
    },
    ContentBlockStop {},
    MessageDelta {
        delta: StopMeta,
        #[serde(default)]
        usage: Option<Usage>,
    },
    MessageStop {},
    Ping {},
    Error {
        error: serde_json::Value,
    },
}

/// Delta payloads are distinguished by which field they carry.
#[derive(Deserialize)]
#[serde(untagged)]
enum Delta {
    Text { text: String },
    Thinking { thinking: String },
    ToolArgs { partial_json: String },
    Other(serde_json::Value),
}

#[derive(Deserialize)]
struct MessageMeta {
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Deserialize)]
struct BlockOpen {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct StopMeta {
    stop_reason: Option<String>,
}
